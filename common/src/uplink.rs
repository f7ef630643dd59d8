use crate::{
    config::ServerConfig,
    connectivity::ConnectivityManager,
    error::HttpError,
    http::{HttpClient, HttpRequest, HttpResponse, ResponseStream},
    platform::{Clock, Display, Transport, WifiRadio},
    types::ConnectionState,
};

/// The node's single network path: the WiFi link plus the HTTP client bound
/// to the configured server. Only one request is ever in flight.
pub struct Uplink<R, T, C, D> {
    wifi: ConnectivityManager<R, C, D>,
    http: HttpClient<T, C>,
    server: ServerConfig,
}

impl<R, T, C, D> Uplink<R, T, C, D>
where
    R: WifiRadio,
    T: Transport,
    C: Clock,
    D: Display,
{
    pub fn new(
        wifi: ConnectivityManager<R, C, D>,
        http: HttpClient<T, C>,
        server: ServerConfig,
    ) -> Self {
        Self { wifi, http, server }
    }

    pub fn wifi(&self) -> &ConnectivityManager<R, C, D> {
        &self.wifi
    }

    pub fn wifi_mut(&mut self) -> &mut ConnectivityManager<R, C, D> {
        &mut self.wifi
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn display(&self) -> &D {
        self.wifi.display()
    }

    pub fn is_connected(&self) -> bool {
        self.wifi.is_connected()
    }

    pub fn poll(&mut self) -> ConnectionState {
        self.wifi.poll()
    }

    pub fn reconnect(&mut self) -> bool {
        self.wifi.reconnect()
    }

    pub fn get(&mut self, path: &str) -> Result<HttpResponse, HttpError> {
        let Self { wifi, http, server } = self;
        http.get(&*wifi, &server.host, server.port, path)
    }

    pub fn post_json(&mut self, path: &str, body: &[u8]) -> Result<HttpResponse, HttpError> {
        let Self { wifi, http, server } = self;
        http.post(&*wifi, &server.host, server.port, path, body)
    }

    pub fn open_get(&mut self, path: &str) -> Result<ResponseStream<'_, T, C>, HttpError> {
        let Self { wifi, http, server } = self;
        http.open(&*wifi, server.port, &HttpRequest::get(&server.host, path))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        config::{HttpConfig, WifiConfig},
        testing::{FakeClock, FakeRadio, RecordingDisplay, ScriptedTransport},
    };

    pub type TestUplink = Uplink<FakeRadio, ScriptedTransport, FakeClock, RecordingDisplay>;

    pub fn server() -> ServerConfig {
        ServerConfig {
            host: "10.0.0.2".to_string(),
            port: 3000,
        }
    }

    /// Uplink whose WiFi link is already up.
    pub fn connected(
        clock: &FakeClock,
        transport: ScriptedTransport,
        display: &RecordingDisplay,
    ) -> (TestUplink, FakeRadio) {
        let radio = FakeRadio::new();
        let mut wifi = ConnectivityManager::new(
            radio.clone(),
            clock.clone(),
            display.clone(),
            WifiConfig::default(),
        );
        assert!(wifi.connect("home", "secret"));

        let http = HttpClient::new(transport, clock.clone(), HttpConfig::default());
        (Uplink::new(wifi, http, server()), radio)
    }
}
