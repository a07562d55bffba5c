//! Loopback server and a tiny HTTP client for integration tests.

#![allow(dead_code)]

use frame_source::{FrameSize, TestPatternSource};
use mjpeg_server::{MjpegServer, ServerSettings, StreamState};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub const FRAME_SIZE: FrameSize = FrameSize {
    width: 64,
    height: 48,
};

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<StreamState>,
}

impl TestServer {
    pub async fn start(mut settings: ServerSettings) -> Self {
        settings.bind = Ipv4Addr::LOCALHOST.into();
        settings.port = 0;
        let source = TestPatternSource::new(FRAME_SIZE);
        let state = StreamState::new(&settings, Box::new(source));
        let server = MjpegServer::bind(settings.socket_addr(), state.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        if settings.eager_acquisition {
            mjpeg_server::acquisition::ensure_started(&state);
        }
        tokio::spawn(server.run());
        Self { addr, state }
    }

    pub async fn connect(&self) -> Client {
        Client::connect(self.addr).await
    }
}

#[derive(Debug)]
pub struct Response {
    pub status_line: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status_line == "HTTP/1.1 200 OK"
    }

    pub fn is_error(&self) -> bool {
        self.status_line.starts_with("HTTP/1.1 500")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

pub struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send_raw(&mut self, raw: &[u8]) {
        self.writer.write_all(raw).await.unwrap();
    }

    pub async fn send(&mut self, method: &str, path: &str, body: &str) {
        let raw = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        self.send_raw(raw.as_bytes()).await;
    }

    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    /// Status line and headers up to the blank line
    pub async fn read_head(&mut self) -> (String, HashMap<String, String>) {
        let status_line = self.read_line().await;
        let mut headers = HashMap::new();
        loop {
            let line = self.read_line().await;
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').unwrap();
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        (status_line, headers)
    }

    pub async fn read_response(&mut self) -> Response {
        let (status_line, headers) = self.read_head().await;
        let length: usize = headers
            .get("content-length")
            .map(|v| v.parse().unwrap())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await.unwrap();
        Response {
            status_line,
            headers,
            body,
        }
    }

    pub async fn request(&mut self, method: &str, path: &str, body: &str) -> Response {
        self.send(method, path, body).await;
        self.read_response().await
    }

    /// Next multipart part body, checking its framing
    pub async fn read_part(&mut self) -> Vec<u8> {
        let mut delimiter = self.read_line().await;
        while delimiter.is_empty() {
            delimiter = self.read_line().await;
        }
        assert_eq!(delimiter, format!("--{}", mjpeg_server::BOUNDARY));
        assert_eq!(self.read_line().await, "Content-Type: image/jpeg");
        let length_line = self.read_line().await;
        let length: usize = length_line
            .strip_prefix("Content-Length: ")
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(self.read_line().await, "");
        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await.unwrap();
        assert_eq!(self.read_line().await, "");
        body
    }

    /// True once the server has closed the connection
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.reader.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

/// Poll `check` until it holds or `deadline` passes.
pub async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
