//! Response builder: status line, headers in registration order, an
//! injected `Content-Length` last, blank line, body.

pub struct ResponseBuilder {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Permissive CORS, per the router's "every non-preflight response"
    /// rule.
    pub fn cors(self) -> Self {
        self.header("Access-Control-Allow-Origin", "*")
    }

    pub fn json(mut self, value: &serde_json::Value) -> Self {
        self.body = serde_json::to_vec(value).unwrap_or_default();
        self.header("Content-Type", "application/json")
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes(),
        );
        for (k, v) in &self.headers {
            out.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_is_last_header() {
        let bytes = ResponseBuilder::new(200)
            .header("X-Custom", "a")
            .json(&serde_json::json!({"ok": true}))
            .into_bytes();
        let text = String::from_utf8(bytes).unwrap();
        let content_length_pos = text.find("Content-Length").unwrap();
        let blank_line_pos = text.find("\r\n\r\n").unwrap();
        let custom_pos = text.find("X-Custom").unwrap();
        assert!(custom_pos < content_length_pos);
        assert!(content_length_pos < blank_line_pos);
    }
}
