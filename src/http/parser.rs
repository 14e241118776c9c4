//! Head parsing
//!
//! Works on a header block that [`framing`](super::framing) has already
//! buffered in full, i.e. everything before the `\r\n\r\n` delimiter.

use super::{Error, Headers, Method, Result, Status, Version, HEADER_DELIMITER};

/// Position of the first `\r\n\r\n` at or after `from`
pub fn find_header_end(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + HEADER_DELIMITER.len() {
        return None;
    }
    buf[from..]
        .windows(HEADER_DELIMITER.len())
        .position(|w| w == HEADER_DELIMITER)
        .map(|pos| pos + from)
}

/// Parse `METHOD TARGET VERSION`
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() != 3 {
        return Err(Error::Parse(format!(
            "Invalid request line: expected 3 parts, got {}",
            parts.len()
        )));
    }

    let method = parts[0].parse::<Method>()?;
    let version = parts[2].parse::<Version>()?;

    Ok((method, parts[1].to_string(), version))
}

/// Parse `VERSION STATUS [REASON]`
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let mut parts = line.splitn(3, ' ');

    let version = parts.next().unwrap_or("").parse::<Version>()?;
    let code = parts
        .next()
        .ok_or_else(|| Error::Parse(format!("Invalid status line: {}", line)))?;
    let status = code
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(code.to_string()))
        .and_then(Status::new)?;
    let reason = match parts.next() {
        Some(reason) if !reason.is_empty() => reason.to_string(),
        _ => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

/// Status line and headers
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: Status,
    pub reason: String,
    pub headers: Headers,
}

/// Parse a buffered request head
pub fn parse_request_head(head: &[u8]) -> Result<RequestHead> {
    let text = String::from_utf8_lossy(head);
    let (first, headers) = split_head(&text)?;
    let (method, target, version) = parse_request_line(first)?;

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

/// Parse a buffered response head
pub fn parse_response_head(head: &[u8]) -> Result<ResponseHead> {
    let text = String::from_utf8_lossy(head);
    let (first, headers) = split_head(&text)?;
    let (version, status, reason) = parse_status_line(first)?;

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}

fn split_head(text: &str) -> Result<(&str, Headers)> {
    // Stray CRLFs ahead of the start line are tolerated.
    let mut lines = text
        .trim_start_matches("\r\n")
        .split("\r\n")
        .take_while(|line| !line.is_empty());

    let first = lines
        .next()
        .ok_or_else(|| Error::Parse("Empty message head".to_string()))?;

    let mut headers = Headers::new();
    for line in lines {
        let (name, value) = Headers::parse_header_line(line)?;
        headers.insert(name, value);
    }

    Ok((first, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\n", 0), Some(14));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n", 0), None);
        assert_eq!(find_header_end(b"\r\n\r\nbody", 0), Some(0));
        assert_eq!(find_header_end(b"ab\r\n\r\n", 2), Some(2));
        assert_eq!(find_header_end(b"ab", 5), None);
    }

    #[test]
    fn test_parse_request_line() {
        let (method, target, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(target, "/index.html");
        assert_eq!(version, Version::Http11);

        assert!(parse_request_line("GET /").is_err());
        assert!(parse_request_line("GET / HTTP/1.1 extra").is_err());
        assert!(matches!(
            parse_request_line("GET / HTTP/3"),
            Err(Error::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 200);
        assert_eq!(reason, "OK");

        let (version, status, reason) = parse_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(version, Version::Http10);
        assert_eq!(status, Status::NOT_FOUND);
        assert_eq!(reason, "Not Found");

        let (_, _, reason) = parse_status_line("HTTP/1.1 500 Something Broke").unwrap();
        assert_eq!(reason, "Something Broke");

        assert!(parse_status_line("HTTP/1.1 abc").is_err());
        assert!(parse_status_line("HTTP/1.1").is_err());
    }

    #[test]
    fn test_parse_request_head() {
        let head = parse_request_head(b"POST /a?b=c HTTP/1.0\r\nHost: x\r\nContent-Length: 3").unwrap();
        assert_eq!(head.method, Method::Post);
        assert_eq!(head.target, "/a?b=c");
        assert_eq!(head.version, Version::Http10);
        assert_eq!(head.headers.get("host"), Some("x"));
        assert_eq!(head.headers.content_length().unwrap(), Some(3));
    }

    #[test]
    fn test_parse_request_head_leading_crlf() {
        let head = parse_request_head(b"\r\n\r\nGET / HTTP/1.1\r\nHost: a").unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.headers.len(), 1);
    }

    #[test]
    fn test_parse_request_head_errors() {
        assert!(parse_request_head(b"").is_err());
        assert!(parse_request_head(b"GET / HTTP/1.1\r\nNoColon").is_err());
        assert!(matches!(
            parse_request_head(b"FETCH / HTTP/1.1"),
            Err(Error::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_parse_response_head() {
        let head = parse_response_head(b"HTTP/1.1 201 Created\r\nLocation: /x").unwrap();
        assert_eq!(head.status.code(), 201);
        assert_eq!(head.reason, "Created");
        assert_eq!(head.headers.get("Location"), Some("/x"));
    }
}
