use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub host: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(host: &str, path: &str) -> Self {
        Self {
            method: Method::Get,
            host: host.to_string(),
            path: path.to_string(),
            content_type: None,
            body: None,
        }
    }

    pub fn post(host: &str, path: &str, content_type: &str, body: &[u8]) -> Self {
        Self {
            method: Method::Post,
            host: host.to_string(),
            path: path.to_string(),
            content_type: Some(content_type.to_string()),
            body: Some(body.to_vec()),
        }
    }

    pub fn post_json(host: &str, path: &str, body: &[u8]) -> Self {
        Self::post(host, path, "application/json", body)
    }

    /// Wire form of the request. Every request asks the server to close the
    /// connection so end-of-body is observable as end-of-stream.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_deref().unwrap_or_default();
        let mut head = String::with_capacity(128 + self.path.len());

        let _ = write!(
            &mut head,
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            self.method.as_str(),
            self.path,
            self.host
        );
        if self.method == Method::Post {
            let content_type = self.content_type.as_deref().unwrap_or("application/json");
            let _ = write!(
                &mut head,
                "Content-Type: {content_type}\r\nContent-Length: {}\r\n",
                body.len()
            );
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }
}
