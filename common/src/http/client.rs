use log::debug;

use crate::{
    config::HttpConfig,
    error::HttpError,
    platform::{Clock, LinkStatus, Transport},
};

use super::{
    parser::{Headers, HttpResponse, ResponseParser},
    request::HttpRequest,
};

const READ_CHUNK: usize = 256;

pub struct HttpClient<T, C> {
    transport: T,
    clock: C,
    config: HttpConfig,
}

impl<T: Transport, C: Clock> HttpClient<T, C> {
    pub fn new(transport: T, clock: C, config: HttpConfig) -> Self {
        Self {
            transport,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn get(
        &mut self,
        link: &dyn LinkStatus,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<HttpResponse, HttpError> {
        self.send(link, port, &HttpRequest::get(host, path))
    }

    pub fn post(
        &mut self,
        link: &dyn LinkStatus,
        host: &str,
        port: u16,
        path: &str,
        body: &[u8],
    ) -> Result<HttpResponse, HttpError> {
        self.send(link, port, &HttpRequest::post_json(host, path, body))
    }

    pub fn send(
        &mut self,
        link: &dyn LinkStatus,
        port: u16,
        request: &HttpRequest,
    ) -> Result<HttpResponse, HttpError> {
        let mut conn = self.connect(link, &request.host, port)?;
        conn.write_request(request)?;

        let mut parser = ResponseParser::new();
        conn.pump(&mut parser, ResponseParser::is_complete)?;
        let response = parser.finish()?;

        debug!(
            "{} {} -> {} ({} bytes)",
            request.method.as_str(),
            request.path,
            response.status,
            response.body.len()
        );
        Ok(response)
    }

    pub fn open(
        &mut self,
        link: &dyn LinkStatus,
        port: u16,
        request: &HttpRequest,
    ) -> Result<ResponseStream<'_, T, C>, HttpError> {
        let mut conn = self.connect(link, &request.host, port)?;
        conn.write_request(request)?;

        let mut parser = ResponseParser::new();
        conn.pump(&mut parser, ResponseParser::headers_complete)?;
        let (status, headers, buffered) = parser.into_head()?;

        Ok(ResponseStream {
            conn,
            status,
            headers,
            buffered,
            offset: 0,
        })
    }

    fn connect(
        &mut self,
        link: &dyn LinkStatus,
        host: &str,
        port: u16,
    ) -> Result<Connection<'_, T, C>, HttpError> {
        if !link.is_connected() {
            return Err(HttpError::NotConnected);
        }

        if let Err(source) = self.transport.connect(host, port) {
            self.transport.close();
            return Err(HttpError::Connect {
                host: host.to_string(),
                port,
                source,
            });
        }

        Ok(Connection {
            transport: &mut self.transport,
            clock: &self.clock,
            config: &self.config,
        })
    }
}

/// An open socket. Closed on drop, on every exit path.
struct Connection<'a, T: Transport, C: Clock> {
    transport: &'a mut T,
    clock: &'a C,
    config: &'a HttpConfig,
}

impl<T: Transport, C: Clock> Connection<'_, T, C> {
    fn write_request(&mut self, request: &HttpRequest) -> Result<(), HttpError> {
        self.transport
            .write(&request.encode())
            .map_err(HttpError::Write)
    }

    fn pump(
        &mut self,
        parser: &mut ResponseParser,
        done: fn(&ResponseParser) -> bool,
    ) -> Result<(), HttpError> {
        let started = self.clock.now_ms();
        let timeout = self.config.response_timeout_ms;
        let mut buf = [0_u8; READ_CHUNK];

        loop {
            let read = self.transport.read_available(&mut buf);
            if read > 0 {
                parser.feed(&buf[..read])?;
                if done(parser) {
                    return Ok(());
                }
            } else if !self.transport.is_connected() {
                return Ok(());
            }

            if self.clock.elapsed_since(started) >= timeout {
                return Err(HttpError::Timeout(timeout));
            }

            if read == 0 {
                self.clock.sleep_ms(self.config.idle_poll_ms);
            }
        }
    }
}

impl<T: Transport, C: Clock> Drop for Connection<'_, T, C> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

pub struct ResponseStream<'a, T: Transport, C: Clock> {
    conn: Connection<'a, T, C>,
    status: u16,
    headers: Headers,
    buffered: Vec<u8>,
    offset: usize,
}

impl<T: Transport, C: Clock> ResponseStream<'_, T, C> {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Never blocks; 0 means nothing is pending.
    pub fn read_available(&mut self, buf: &mut [u8]) -> usize {
        if self.offset < self.buffered.len() {
            let pending = &self.buffered[self.offset..];
            let count = pending.len().min(buf.len());
            buf[..count].copy_from_slice(&pending[..count]);
            self.offset += count;
            return count;
        }
        self.conn.transport.read_available(buf)
    }

    pub fn is_open(&self) -> bool {
        self.offset < self.buffered.len() || self.conn.transport.is_connected()
    }
}
