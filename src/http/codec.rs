//! HTTP/1.1 request parser — a pure function from a connection's read
//! buffer to {need-more, complete, protocol-error}. Re-run on every read;
//! cheap enough given the bounded header/body sizes and avoids tracking
//! parse position across partial reads.

use super::request::{
    Headers, Method, ParsedRequest, MAX_BODY_LEN, MAX_HEADER_COUNT, MAX_HEADER_NAME_LEN,
    MAX_HEADER_VALUE_LEN, MAX_URL_LEN,
};
use crate::error::GatewayError;

pub enum ParseOutcome {
    NeedMore,
    Complete { request: ParsedRequest, consumed: usize },
    Error(GatewayError),
}

pub fn parse(buf: &[u8]) -> ParseOutcome {
    let header_end = match find_header_terminator(buf) {
        Some(pos) => pos,
        None => {
            let max_header_block =
                MAX_URL_LEN + MAX_HEADER_COUNT * (MAX_HEADER_NAME_LEN + MAX_HEADER_VALUE_LEN);
            if buf.len() > max_header_block {
                return ParseOutcome::Error(GatewayError::Protocol("header block too large".into()));
            }
            return ParseOutcome::NeedMore;
        }
    };

    let head = &buf[..header_end];
    let mut lines = head.split(|&b| b == b'\n').map(strip_cr);

    let request_line = match lines.next() {
        Some(l) if !l.is_empty() => l,
        _ => return ParseOutcome::Error(GatewayError::Protocol("missing request line".into())),
    };

    let (method, path, query, version_major, version_minor) = match parse_request_line(request_line)
    {
        Ok(v) => v,
        Err(e) => return ParseOutcome::Error(e),
    };

    let mut headers = Headers::default();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if headers.len() >= MAX_HEADER_COUNT {
            return ParseOutcome::Error(GatewayError::Protocol("too many headers".into()));
        }
        match parse_header_line(line) {
            Ok((k, v)) => headers.push(k, v),
            Err(e) => return ParseOutcome::Error(e),
        }
    }

    let content_length = match headers.get("content-length") {
        Some(v) => match v.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                return ParseOutcome::Error(GatewayError::Protocol("invalid Content-Length".into()))
            }
        },
        None => 0,
    };

    if content_length > MAX_BODY_LEN {
        return ParseOutcome::Error(GatewayError::Protocol("body too large".into()));
    }

    let body_start = header_end + 4;

    if content_length == 0 {
        return ParseOutcome::Complete {
            request: ParsedRequest {
                method,
                path,
                query,
                version_major,
                version_minor,
                headers,
                body: Vec::new(),
                content_length: 0,
            },
            consumed: body_start,
        };
    }

    let available_body = buf.len().saturating_sub(body_start);
    if available_body < content_length {
        return ParseOutcome::NeedMore;
    }

    let body = buf[body_start..body_start + content_length].to_vec();
    ParseOutcome::Complete {
        request: ParsedRequest {
            method,
            path,
            query,
            version_major,
            version_minor,
            headers,
            body,
            content_length,
        },
        consumed: body_start + content_length,
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Whether the header block has fully arrived — used by the reactor to
/// tell "no headers yet" apart from "headers parsed, body pending" when
/// `parse` reports `NeedMore`.
pub fn headers_complete(buf: &[u8]) -> bool {
    find_header_terminator(buf).is_some()
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, String, u8, u8), GatewayError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| GatewayError::Protocol("invalid request line encoding".into()))?;
    let mut parts = line.splitn(3, ' ');
    let method_str = parts
        .next()
        .ok_or_else(|| GatewayError::Protocol("missing method".into()))?;
    let url = parts
        .next()
        .ok_or_else(|| GatewayError::Protocol("missing URL".into()))?;
    let version = parts
        .next()
        .ok_or_else(|| GatewayError::Protocol("missing version".into()))?;

    if url.len() > MAX_URL_LEN {
        return Err(GatewayError::Protocol("URL too long".into()));
    }

    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (url.to_string(), String::new()),
    };

    let (major, minor) = parse_http_version(version)?;

    Ok((Method::parse(method_str), path, query, major, minor))
}

fn parse_http_version(v: &str) -> Result<(u8, u8), GatewayError> {
    let digits = v
        .strip_prefix("HTTP/")
        .ok_or_else(|| GatewayError::Protocol("invalid HTTP version".into()))?;
    let (maj, min) = digits
        .split_once('.')
        .ok_or_else(|| GatewayError::Protocol("invalid HTTP version".into()))?;
    let major = maj
        .parse()
        .map_err(|_| GatewayError::Protocol("invalid HTTP version".into()))?;
    let minor = min
        .parse()
        .map_err(|_| GatewayError::Protocol("invalid HTTP version".into()))?;
    Ok((major, minor))
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), GatewayError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| GatewayError::Protocol("malformed header line".into()))?;
    let (key, rest) = line.split_at(colon);
    if key.len() > MAX_HEADER_NAME_LEN {
        return Err(GatewayError::Protocol("header name too long".into()));
    }
    let value = trim_leading_spaces(&rest[1..]);
    if value.len() > MAX_HEADER_VALUE_LEN {
        return Err(GatewayError::Protocol("header value too long".into()));
    }
    let key = std::str::from_utf8(key)
        .map_err(|_| GatewayError::Protocol("invalid header encoding".into()))?
        .to_string();
    let value = std::str::from_utf8(value)
        .map_err(|_| GatewayError::Protocol("invalid header encoding".into()))?
        .trim_end()
        .to_string();
    Ok((key, value))
}

fn trim_leading_spaces(mut b: &[u8]) -> &[u8] {
    while b.first() == Some(&b' ') {
        b = &b[1..];
    }
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_with_query_and_headers() {
        let raw = b"GET /v1/chat/completions?x=1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        match parse(raw) {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(request.path, "/v1/chat/completions");
                assert_eq!(request.query, "x=1");
                assert_eq!(request.headers.get("host"), Some("localhost"));
                assert!(!request.keep_alive());
                assert_eq!(consumed, raw.len());
            }
            _ => panic!("expected complete parse"),
        }
    }

    #[test]
    fn waits_for_full_body() {
        let raw = b"POST /hooks/webchat HTTP/1.1\r\nContent-Length: 10\r\n\r\npartial";
        assert!(matches!(parse(raw), ParseOutcome::NeedMore));
    }

    #[test]
    fn completes_once_body_arrives() {
        let raw = b"POST /hooks/webchat HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        match parse(raw) {
            ParseOutcome::Complete { request, .. } => assert_eq!(request.body_str(), "hello"),
            _ => panic!("expected complete parse"),
        }
    }

    #[test]
    fn rejects_too_many_headers() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for i in 0..MAX_HEADER_COUNT + 1 {
            raw.push_str(&format!("X-H{i}: v\r\n"));
        }
        raw.push_str("\r\n");
        assert!(matches!(parse(raw.as_bytes()), ParseOutcome::Error(_)));
    }
}
