use std::collections::BTreeMap;

use crate::error::HttpError;

const MAX_LINE_BYTES: usize = 2_048;
const MAX_HEADERS: usize = 64;

/// Response headers with case-insensitive names. A repeated header replaces
/// the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length")?.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 201)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    StatusLine,
    Headers,
    Body,
}

/// Incremental HTTP/1.1 response parser, fed in arbitrary splits.
#[derive(Debug)]
pub struct ResponseParser {
    phase: Phase,
    line: Vec<u8>,
    seen_bytes: bool,
    status: Option<u16>,
    headers: Headers,
    body: Vec<u8>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            phase: Phase::StatusLine,
            line: Vec::with_capacity(128),
            seen_bytes: false,
            status: None,
            headers: Headers::default(),
            body: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_complete(&self) -> bool {
        self.phase == Phase::Body
    }

    /// True once the header block is done and a declared `Content-Length`
    /// has been received in full.
    pub fn is_complete(&self) -> bool {
        self.headers_complete()
            && self
                .headers
                .content_length()
                .is_some_and(|expected| self.body.len() >= expected)
    }

    pub fn feed(&mut self, mut bytes: &[u8]) -> Result<(), HttpError> {
        if !bytes.is_empty() {
            self.seen_bytes = true;
        }

        while !bytes.is_empty() {
            if self.phase == Phase::Body {
                self.body.extend_from_slice(bytes);
                return Ok(());
            }

            match bytes.iter().position(|byte| *byte == b'\n') {
                Some(end) => {
                    self.push_line_bytes(&bytes[..end])?;
                    bytes = &bytes[end + 1..];
                    let line = std::mem::take(&mut self.line);
                    self.process_line(&line)?;
                }
                None => {
                    self.push_line_bytes(bytes)?;
                    bytes = &[];
                }
            }
        }

        Ok(())
    }

    fn push_line_bytes(&mut self, bytes: &[u8]) -> Result<(), HttpError> {
        if self.line.len() + bytes.len() > MAX_LINE_BYTES {
            return Err(HttpError::MalformedResponse(format!(
                "line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        self.line.extend_from_slice(bytes);
        Ok(())
    }

    fn process_line(&mut self, raw: &[u8]) -> Result<(), HttpError> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);

        match self.phase {
            Phase::StatusLine => {
                // Tolerate stray CRLFs ahead of the status line.
                if line.trim().is_empty() {
                    return Ok(());
                }
                self.status = Some(parse_status_line(&line)?);
                self.phase = Phase::Headers;
            }
            Phase::Headers => {
                if line.is_empty() {
                    self.phase = Phase::Body;
                    return Ok(());
                }
                let Some((name, value)) = line.split_once(':') else {
                    return Err(HttpError::MalformedResponse(format!(
                        "header without colon: {line}"
                    )));
                };
                if self.headers.len() >= MAX_HEADERS {
                    return Err(HttpError::MalformedResponse(
                        "too many headers".to_string(),
                    ));
                }
                self.headers.insert(name, value);
            }
            Phase::Body => {}
        }

        Ok(())
    }

    pub fn into_head(self) -> Result<(u16, Headers, Vec<u8>), HttpError> {
        let status = self.require_head()?;
        Ok((status, self.headers, self.body))
    }

    pub fn finish(self) -> Result<HttpResponse, HttpError> {
        let status = self.require_head()?;
        let mut body = self.body;

        if let Some(expected) = self.headers.content_length() {
            if body.len() < expected {
                return Err(HttpError::IncompleteResponse(format!(
                    "body has {} of {expected} bytes",
                    body.len()
                )));
            }
            body.truncate(expected);
        }

        Ok(HttpResponse {
            status,
            headers: self.headers,
            body,
        })
    }

    fn require_head(&self) -> Result<u16, HttpError> {
        if !self.seen_bytes {
            return Err(HttpError::IncompleteResponse("empty response".to_string()));
        }
        let Some(status) = self.status else {
            return Err(HttpError::MalformedResponse(
                "missing status line".to_string(),
            ));
        };
        if self.phase != Phase::Body {
            return Err(HttpError::MalformedResponse(
                "missing header terminator".to_string(),
            ));
        }
        Ok(status)
    }
}

fn parse_status_line(line: &str) -> Result<u16, HttpError> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HttpError::MalformedResponse(format!(
            "bad status line: {line}"
        )));
    }

    let code = parts.next().unwrap_or_default();
    if code.len() != 3 || !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(HttpError::MalformedResponse(format!(
            "non-numeric status: {line}"
        )));
    }

    code.parse::<u16>()
        .map_err(|_| HttpError::MalformedResponse(format!("non-numeric status: {line}")))
}
