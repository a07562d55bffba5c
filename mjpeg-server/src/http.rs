//! Minimal HTTP/1.1 request reader.
//!
//! Only what the server needs: a request line, headers up to the blank line
//! and an optional `Content-Length` body. A POST without `Content-Length`
//! takes whatever already arrived with its headers as the body. No chunked
//! bodies, no pipelining.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Upper bound on the request line plus headers
pub const MAX_HEADER_BYTES: u64 = 8 * 1024;
/// Upper bound on a request body
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum RequestError {
    /// Peer closed the connection before sending a request
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl From<&str> for Method {
    fn from(method: &str) -> Self {
        match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Other(other) => write!(f, "{other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub version: String,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }

    /// Path without the query string
    pub fn route(&self) -> &str {
        self.path
            .split_once('?')
            .map_or(self.path.as_str(), |(route, _)| route)
    }
}

/// Split `METHOD SP PATH SP HTTP/1.1`.
pub fn parse_request_line(line: &str) -> Result<(Method, String, String), RequestError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let [method, path, version] = parts[..] else {
        return Err(RequestError::Malformed(line.to_string()));
    };
    if !path.starts_with('/') {
        return Err(RequestError::Malformed(line.to_string()));
    }
    if version != "HTTP/1.1" {
        return Err(RequestError::UnsupportedVersion(version.to_string()));
    }
    Ok((Method::from(method), path.to_string(), version.to_string()))
}

/// Read one line, counting it against `budget`.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    budget: &mut u64,
) -> Result<Option<String>, RequestError> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(*budget)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return if *budget == 0 {
            Err(RequestError::TooLarge(MAX_HEADER_BYTES as usize))
        } else {
            Ok(None)
        };
    }
    *budget -= n as u64;
    if buf.last() != Some(&b'\n') {
        return if *budget == 0 {
            Err(RequestError::TooLarge(MAX_HEADER_BYTES as usize))
        } else {
            Err(RequestError::Malformed("truncated request".to_string()))
        };
    }
    Ok(Some(String::from_utf8_lossy(&buf).trim_end().to_string()))
}

/// Read one request from `reader`.
///
/// Returns [`RequestError::Closed`] if the peer closes between requests.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<HttpRequest, RequestError> {
    let mut budget = MAX_HEADER_BYTES;

    // Tolerate stray blank lines left over from a previous request
    let request_line = loop {
        match read_line(reader, &mut budget).await? {
            None => return Err(RequestError::Closed),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };
    let (method, path, version) = parse_request_line(&request_line)?;

    let mut headers = HashMap::new();
    loop {
        let line = read_line(reader, &mut budget)
            .await?
            .ok_or_else(|| RequestError::Malformed("connection closed in headers".to_string()))?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let mut body = Vec::new();
    if let Some(length) = headers.get("content-length") {
        let length: usize = length
            .parse()
            .map_err(|_| RequestError::Malformed(format!("bad Content-Length {length:?}")))?;
        if length > MAX_BODY_BYTES {
            return Err(RequestError::TooLarge(MAX_BODY_BYTES));
        }
        body.resize(length, 0);
        reader.read_exact(&mut body).await?;
    } else if method == Method::Post {
        // Clients that omit Content-Length send the value in the same segment
        let buffered = reader.buffer();
        let n = buffered.len().min(MAX_BODY_BYTES);
        body.extend_from_slice(&buffered[..n]);
        reader.consume(n);
    }

    Ok(HttpRequest {
        method,
        path,
        version,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(raw: &[u8]) -> Result<HttpRequest, RequestError> {
        let mut reader = BufReader::new(raw);
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn test_get_request() {
        let req = parse(b"GET /mjpg HTTP/1.1\r\nHost: cam:8080\r\nUser-Agent: test\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.route(), "/mjpg");
        assert_eq!(req.header("host"), Some("cam:8080"));
        assert_eq!(req.header("User-Agent"), Some("test"));
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn test_post_with_body() {
        let req = parse(b"POST /quality HTTP/1.1\r\nContent-Length: 3\r\n\r\n 50")
            .await
            .unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body_text(), "50");
    }

    #[tokio::test]
    async fn test_post_body_without_content_length() {
        let req = parse(b"POST /quality HTTP/1.1\r\nHost: x\r\n\r\n50")
            .await
            .unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body_text(), "50");

        let req = parse(b"POST /fps HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn test_get_leaves_buffered_bytes() {
        let raw = b"GET /fps HTTP/1.1\r\n\r\nGET /quality HTTP/1.1\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let first = read_request(&mut reader).await.unwrap();
        assert!(first.body.is_empty());
        let second = read_request(&mut reader).await.unwrap();
        assert_eq!(second.route(), "/quality");
    }

    #[tokio::test]
    async fn test_query_string_ignored_for_route() {
        let req = parse(b"GET /jpg?t=123 HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(req.route(), "/jpg");
        assert_eq!(req.path, "/jpg?t=123");
    }

    #[tokio::test]
    async fn test_two_requests_on_one_stream() {
        let raw = b"GET /fps HTTP/1.1\r\n\r\nPOST /fps HTTP/1.1\r\nContent-Length: 2\r\n\r\n10";
        let mut reader = BufReader::new(&raw[..]);
        let first = read_request(&mut reader).await.unwrap();
        let second = read_request(&mut reader).await.unwrap();
        assert_eq!(first.method, Method::Get);
        assert_eq!(second.body_text(), "10");
        assert!(matches!(
            read_request(&mut reader).await,
            Err(RequestError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_wrong_version() {
        assert!(matches!(
            parse(b"GET / HTTP/1.0\r\n\r\n").await,
            Err(RequestError::UnsupportedVersion(v)) if v == "HTTP/1.0"
        ));
    }

    #[tokio::test]
    async fn test_malformed_lines() {
        assert!(matches!(
            parse(b"GET\r\n\r\n").await,
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"GET nope HTTP/1.1\r\n\r\n").await,
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"GET / HTTP/1.1\r\nHost: x\r\n").await,
            Err(RequestError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_headers() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEADER_BYTES as usize));
        raw.extend_from_slice(b"\r\n\r\n");
        assert!(matches!(parse(&raw).await, Err(RequestError::TooLarge(_))));
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let raw = format!("POST /fps HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_BYTES + 1);
        assert!(matches!(
            parse(raw.as_bytes()).await,
            Err(RequestError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_stream_is_closed() {
        assert!(matches!(parse(b"").await, Err(RequestError::Closed)));
    }
}
