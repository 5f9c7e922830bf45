//! Parsed HTTP request representation and parser limits.

pub const MAX_URL_LEN: usize = 8 * 1024;
pub const MAX_HEADER_NAME_LEN: usize = 256;
pub const MAX_HEADER_VALUE_LEN: usize = 8 * 1024;
pub const MAX_HEADER_COUNT: usize = 100;
pub const MAX_BODY_LEN: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
    Head,
    Unknown,
}

impl Method {
    pub fn parse(s: &str) -> Method {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "HEAD" => Method::Head,
            _ => Method::Unknown,
        }
    }
}

/// Case-insensitive, order-preserving header list.
#[derive(Debug, Clone, Default)]
pub struct Headers(pub Vec<(String, String)>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, name: String, value: String) {
        self.0.push((name, value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version_major: u8,
    pub version_minor: u8,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub content_length: usize,
}

impl ParsedRequest {
    pub fn keep_alive(&self) -> bool {
        let explicit_close = self
            .headers
            .get("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false);
        if explicit_close {
            return false;
        }
        if self.version_major == 1 && self.version_minor == 0 {
            self.headers
                .get("connection")
                .map(|v| v.eq_ignore_ascii_case("keep-alive"))
                .unwrap_or(false)
        } else {
            true
        }
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("")
    }
}
