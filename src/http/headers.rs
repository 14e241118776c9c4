//! Header multimap
//!
//! Header names compare case-insensitively, a name may repeat, and
//! iteration yields fields in the order they arrived.

use super::{Error, Result, CRLF};
use std::fmt;

/// HTTP header fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header collection
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Append a field, keeping any existing fields with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replace every field named `name` with a single value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether any field is named `name`, ignoring case
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove every field named `name`, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    /// Number of fields, counting repeated names separately
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check whether there are no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in insertion order, names as given
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Declared `Content-Length`
    ///
    /// Repeated fields must agree; anything that is not a decimal length is
    /// rejected.
    pub fn content_length(&self) -> Result<Option<usize>> {
        let mut declared = None;

        for value in self.get_all("Content-Length") {
            let digits = value.trim();
            // `parse` alone would accept a leading `+`.
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidHeader(format!("Content-Length: {}", value)));
            }
            let length = digits
                .parse::<usize>()
                .map_err(|_| Error::InvalidHeader(format!("Content-Length: {}", value)))?;

            match declared {
                Some(previous) if previous != length => {
                    return Err(Error::InvalidHeader(format!(
                        "conflicting Content-Length values {} and {}",
                        previous, length
                    )));
                }
                _ => declared = Some(length),
            }
        }

        Ok(declared)
    }

    /// Whether chunked is the final transfer coding
    pub fn is_chunked(&self) -> bool {
        self.get_all("Transfer-Encoding")
            .into_iter()
            .flat_map(|v| v.split(','))
            .last()
            .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// Multipart boundary from `Content-Type`
    ///
    /// `Ok(None)` for non-multipart content, [`Error::MissingBoundary`] for a
    /// multipart type that lacks one.
    pub fn multipart_boundary(&self) -> Result<Option<String>> {
        let content_type = match self.get("Content-Type") {
            Some(value) => value,
            None => return Ok(None),
        };

        let mut params = content_type.split(';');
        let mime = params.next().unwrap_or("").trim();
        if !mime.to_ascii_lowercase().starts_with("multipart/") {
            return Ok(None);
        }

        params
            .filter_map(|param| param.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
            .filter(|boundary| !boundary.is_empty())
            .map(Some)
            .ok_or(Error::MissingBoundary)
    }

    /// Append `Name: value\r\n` for every field
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.fields {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
    }

    /// Split a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;

        // Whitespace between name and colon is a smuggling vector.
        if name.is_empty() || name.ends_with(|c: char| c.is_ascii_whitespace()) {
            return Err(Error::InvalidHeader(format!("Bad header name: {:?}", name)));
        }

        Ok((name.to_string(), value.trim().to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert!(headers.contains("CoNtEnT-TyPe"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_multiple_values() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("set-cookie", "b=2");

        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
        assert_eq!(headers.get_all("SET-COOKIE"), vec!["a=1", "b=2"]);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = Headers::new();
        headers.insert("X-Tag", "one");
        headers.insert("x-tag", "two");
        headers.set("X-Tag", "three");

        assert_eq!(headers.get_all("X-Tag"), vec!["three"]);
    }

    #[test]
    fn test_remove_and_order() {
        let mut headers = Headers::new();
        headers.insert("A", "1");
        headers.insert("B", "2");
        headers.insert("a", "3");

        assert_eq!(headers.remove("A"), 2);
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec![("B", "2")]);
    }

    #[test]
    fn test_content_length() {
        let mut headers = Headers::new();
        assert_eq!(headers.content_length().unwrap(), None);

        headers.insert("Content-Length", "42");
        assert_eq!(headers.content_length().unwrap(), Some(42));

        headers.insert("content-length", "42");
        assert_eq!(headers.content_length().unwrap(), Some(42));

        headers.insert("Content-Length", "43");
        assert!(headers.content_length().is_err());

        let mut headers = Headers::new();
        headers.insert("Content-Length", "-1");
        assert!(headers.content_length().is_err());

        for bad in ["+3", "", " ", "3 4", "0x10", "99999999999999999999999"] {
            let mut headers = Headers::new();
            headers.insert("Content-Length", bad);
            assert!(headers.content_length().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_is_chunked() {
        let mut headers = Headers::new();
        assert!(!headers.is_chunked());

        headers.insert("Transfer-Encoding", "gzip, Chunked");
        assert!(headers.is_chunked());

        let mut headers = Headers::new();
        headers.insert("Transfer-Encoding", "chunked, gzip");
        assert!(!headers.is_chunked());
    }

    #[test]
    fn test_multipart_boundary() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "multipart/form-data; boundary=\"----abc\"");
        assert_eq!(headers.multipart_boundary().unwrap(), Some("----abc".to_string()));

        let mut headers = Headers::new();
        headers.insert("Content-Type", "Multipart/Form-Data");
        assert!(matches!(
            headers.multipart_boundary(),
            Err(Error::MissingBoundary)
        ));

        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json; charset=utf-8");
        assert_eq!(headers.multipart_boundary().unwrap(), None);
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        let (name, value) = Headers::parse_header_line("X-Custom:  value  ").unwrap();
        assert_eq!(name, "X-Custom");
        assert_eq!(value, "value");

        let (_, value) = Headers::parse_header_line("Host: a:8080").unwrap();
        assert_eq!(value, "a:8080");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
        assert!(Headers::parse_header_line("Host : a").is_err());
    }

    #[test]
    fn test_write_to() {
        let mut headers = Headers::new();
        headers.insert("Host", "a");
        headers.insert("Accept", "*/*");

        let mut buf = Vec::new();
        headers.write_to(&mut buf);
        assert_eq!(buf, b"Host: a\r\nAccept: */*\r\n");
    }
}
