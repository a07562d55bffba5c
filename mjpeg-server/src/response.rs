//! HTTP response construction.

use crate::state::BOUNDARY;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Value of the `Server` header
pub const SERVER_ID: &str = concat!("mjpeg-server/", env!("CARGO_PKG_VERSION"));

const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("Cache-Control", "no-cache, no-store, must-revalidate"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

/// A complete response with a known body length.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
    close: bool,
}

impl Response {
    /// Empty response with the given status line, e.g. `"404 Not Found"`
    pub fn new(status: &'static str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            close: false,
        }
    }

    /// Empty `200 OK`
    pub fn ok() -> Self {
        Self::new("200 OK")
    }

    /// Append a header. `Content-Length` is always computed from the body.
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Set the body and its `Content-Type`
    pub fn body(mut self, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.header("Content-Type", content_type)
    }

    /// Add headers telling clients and proxies not to cache the response
    pub fn no_cache(mut self) -> Self {
        for (name, value) in NO_CACHE_HEADERS {
            self = self.header(name, value);
        }
        self
    }

    /// Mark the connection as closing after this response
    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }

    /// Status line without the protocol, e.g. `"200 OK"`
    pub fn status(&self) -> &str {
        self.status
    }

    /// The response body
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Whether the connection closes after this response
    pub fn closes(&self) -> bool {
        self.close
    }

    fn head(&self) -> BytesMut {
        let mut head = BytesMut::with_capacity(256);
        head.put_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());
        head.put_slice(format!("Server: {SERVER_ID}\r\n").as_bytes());
        for (name, value) in &self.headers {
            head.put_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        head.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        if self.close {
            head.put_slice(b"Connection: close\r\n");
        }
        head.put_slice(b"\r\n");
        head
    }

    /// Serialized head followed by the body
    pub fn to_bytes(&self) -> Bytes {
        let mut out = self.head();
        out.put_slice(&self.body);
        out.freeze()
    }

    /// Write head and body to `writer` and flush.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.head()).await?;
        writer.write_all(&self.body).await?;
        writer.flush().await
    }
}

/// Error pages, all served with a 500 status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPage {
    BadRequest,
    TooManyConnections,
    UnsupportedVersion,
    NotFound,
    ImageFailed,
}

impl ErrorPage {
    /// HTML fragment describing the error
    pub fn message(&self) -> &'static str {
        match self {
            ErrorPage::BadRequest => "<p>Bad request</p>",
            ErrorPage::TooManyConnections => {
                "<p>There are <b>too many</b> connections on the line!</p>"
            }
            ErrorPage::UnsupportedVersion => "<p>Request needs to be <b>HTTP/1.1</b></p>",
            ErrorPage::NotFound => {
                "<p>404 Page not found! please use <b>.../mjpg, .../html, .../jpg or controls (fps, quality, resolution)</b></p>"
            }
            ErrorPage::ImageFailed => "<p>Failed sending image</p>",
        }
    }

    /// Full error page titled with the server `name`
    pub fn response(&self, name: &str) -> Response {
        let html = format!(
            "<html><body><h1>{} error:</h1>{}</body></html>",
            escape_html(name),
            self.message()
        );
        Response::new("500 Internal Server Error").body("text/html", html)
    }
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Viewer page embedding the stream.
///
/// With a `Host` header the image points at that host explicitly, otherwise
/// at the relative path.
pub fn viewer_page(name: &str, host: Option<&str>) -> Response {
    let src = match host {
        Some(host) => format!("http://{}/mjpg", escape_html(host)),
        None => "/mjpg".to_string(),
    };
    let html = format!(
        "<html><head><title>{}</title></head><body><img src=\"{src}\"/></body></html>",
        escape_html(name)
    );
    Response::ok().body("text/html", html)
}

/// `200 OK` with `value` as a `text/plain` body
pub fn text_response(value: impl ToString) -> Response {
    Response::ok().body("text/plain", value.to_string())
}

/// Uncached `image/jpeg` response with an exact Content-Length
pub fn jpeg_response(jpeg: Bytes) -> Response {
    Response::ok().no_cache().body("image/jpeg", jpeg)
}

/// Head of a multipart stream. There is no Content-Length; the body runs
/// until the connection closes.
pub fn stream_header() -> Bytes {
    let mut head = format!("HTTP/1.1 200 OK\r\nServer: {SERVER_ID}\r\nConnection: close\r\n");
    for (name, value) in NO_CACHE_HEADERS {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!(
        "Content-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\n\r\n"
    ));
    Bytes::from(head)
}

/// Delimiter and headers preceding one JPEG part
pub fn part_header(len: usize) -> Bytes {
    Bytes::from(format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(bytes: &Bytes) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_response_has_server_and_length() {
        let text = as_text(&text_response(42).to_bytes());
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains(&format!("Server: {SERVER_ID}\r\n")));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n42"));
        assert!(!text.contains("Connection: close"));
    }

    #[test]
    fn test_empty_ok_response() {
        let text = as_text(&Response::ok().to_bytes());
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_error_page() {
        let response = ErrorPage::NotFound.response("Cam <1>").closing();
        let text = as_text(&response.to_bytes());
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("<h1>Cam &lt;1&gt; error:</h1><p>404 Page not found!"));
        assert_eq!(
            response.body_bytes().len(),
            text.split("\r\n\r\n").nth(1).unwrap().len()
        );
    }

    #[test]
    fn test_viewer_page() {
        let with_host = as_text(viewer_page("Cam", Some("10.0.0.2:8080")).body_bytes());
        assert_eq!(
            with_host,
            "<html><head><title>Cam</title></head><body><img src=\"http://10.0.0.2:8080/mjpg\"/></body></html>"
        );
        let without = as_text(viewer_page("Cam", None).body_bytes());
        assert!(without.contains("src=\"/mjpg\""));
        let hostile = as_text(viewer_page("Cam", Some("x\"><script>")).body_bytes());
        assert!(!hostile.contains("<script>"));
    }

    #[test]
    fn test_stream_and_part_headers() {
        let head = as_text(&stream_header());
        assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=mjpgserverboundary\r\n"));
        assert!(head.contains("Cache-Control: no-cache"));
        assert!(head.ends_with("\r\n\r\n"));
        assert!(!head.contains("Content-Length"));

        assert_eq!(
            as_text(&part_header(1234)),
            "--mjpgserverboundary\r\nContent-Type: image/jpeg\r\nContent-Length: 1234\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_write_to() {
        let mut out = Vec::new();
        jpeg_response(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]))
            .write_to(&mut out)
            .await
            .unwrap();
        assert!(out.ends_with(&[b'\r', b'\n', b'\r', b'\n', 0xFF, 0xD8, 0xFF, 0xD9]));
    }
}
