//! Per-connection request loop.
//!
//! Each connection reads one request at a time, dispatches it by path and
//! then either waits for the next request or closes. Media endpoints always
//! close; control endpoints and the viewer page keep the connection open.

use crate::control::{handle_control, Control};
use crate::http::{read_request, HttpRequest, RequestError};
use crate::response::{viewer_page, ErrorPage};
use crate::snapshot::serve_snapshot;
use crate::state::StreamState;
use crate::stream::serve_stream;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// What the connection does after a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Stream,
    Viewer,
    Snapshot,
    Control(Control),
    NotFound,
}

impl Route {
    pub fn from_path(route: &str) -> Self {
        match route {
            "/mjpg" => Route::Stream,
            "/" | "/html" => Route::Viewer,
            "/jpg" => Route::Snapshot,
            other => Control::from_route(other).map_or(Route::NotFound, Route::Control),
        }
    }
}

/// Answer one parsed request.
pub async fn handle_request<W: AsyncWrite + Unpin>(
    state: &Arc<StreamState>,
    request: &HttpRequest,
    writer: &mut W,
) -> std::io::Result<Flow> {
    match Route::from_path(request.route()) {
        Route::Stream => {
            let end = serve_stream(state, writer).await;
            debug!("Stream ended: {end:?}");
            Ok(Flow::Terminate)
        }
        Route::Viewer if state.at_capacity() => {
            ErrorPage::TooManyConnections
                .response(state.name())
                .closing()
                .write_to(writer)
                .await?;
            Ok(Flow::Terminate)
        }
        Route::Viewer => {
            viewer_page(state.name(), request.header("host"))
                .write_to(writer)
                .await?;
            Ok(Flow::Continue)
        }
        Route::Snapshot => {
            serve_snapshot(state, writer).await?;
            Ok(Flow::Terminate)
        }
        Route::Control(control) => {
            let response = handle_control(state, control, request);
            response.write_to(writer).await?;
            Ok(if response.closes() {
                Flow::Terminate
            } else {
                Flow::Continue
            })
        }
        Route::NotFound => {
            debug!("No route for {}", request.path);
            ErrorPage::NotFound
                .response(state.name())
                .closing()
                .write_to(writer)
                .await?;
            Ok(Flow::Terminate)
        }
    }
}

/// Serve requests from `reader` until the peer leaves or a request ends the
/// connection.
pub async fn serve_connection<R, W>(state: Arc<StreamState>, reader: R, writer: &mut W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let request = match read_request(&mut reader).await {
            Ok(request) => request,
            Err(RequestError::Closed) => break,
            Err(RequestError::Io(e)) => {
                debug!("Read failed: {e}");
                break;
            }
            Err(e) => {
                debug!("Bad request: {e}");
                let page = match e {
                    RequestError::UnsupportedVersion(_) => ErrorPage::UnsupportedVersion,
                    _ => ErrorPage::BadRequest,
                };
                if let Err(e) = page.response(state.name()).closing().write_to(writer).await {
                    debug!("Failed to send error page: {e}");
                }
                break;
            }
        };

        debug!("{} {}", request.method, request.path);
        match handle_request(&state, &request, writer).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Terminate) => break,
            Err(e) => {
                debug!("Write failed: {e}");
                break;
            }
        }
    }
}

/// Run one accepted TCP connection to completion.
pub async fn run_session(state: Arc<StreamState>, socket: TcpStream) {
    let (reader, mut writer) = socket.into_split();
    serve_connection(state, reader, &mut writer).await;
    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionLimit, Quality, ServerSettings};
    use frame_source::{FrameSize, TestPatternSource};

    fn state(settings: ServerSettings) -> Arc<StreamState> {
        let source = TestPatternSource::new(FrameSize::from_width_height(16, 12));
        StreamState::new(&settings, Box::new(source))
    }

    async fn exchange(state: Arc<StreamState>, raw: &str) -> String {
        let mut out = Vec::new();
        serve_connection(state, raw.as_bytes(), &mut out).await;
        String::from_utf8_lossy(&out).to_string()
    }

    #[test]
    fn test_routes() {
        assert_eq!(Route::from_path("/mjpg"), Route::Stream);
        assert_eq!(Route::from_path("/"), Route::Viewer);
        assert_eq!(Route::from_path("/html"), Route::Viewer);
        assert_eq!(Route::from_path("/jpg"), Route::Snapshot);
        assert_eq!(Route::from_path("/quality"), Route::Control(Control::Quality));
        assert_eq!(Route::from_path("/mjpg/x"), Route::NotFound);
    }

    #[tokio::test]
    async fn test_controls_keep_connection_open() {
        let out = exchange(
            state(ServerSettings::default()),
            "POST /quality HTTP/1.1\r\nContent-Length: 2\r\n\r\n70GET /quality HTTP/1.1\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.ends_with("\r\n\r\n70"));
    }

    #[tokio::test]
    async fn test_post_without_content_length_applies() {
        let state = state(ServerSettings::default());
        let out = exchange(state.clone(), "POST /quality HTTP/1.1\r\nHost: x\r\n\r\n50").await;
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(state.config().quality, Quality::Level(50));
    }

    #[tokio::test]
    async fn test_not_found_terminates() {
        let out = exchange(
            state(ServerSettings::default()),
            "GET /nope HTTP/1.1\r\n\r\nGET /fps HTTP/1.1\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 500"));
        assert!(out.contains("404 Page not found"));
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_version_terminates() {
        let out = exchange(state(ServerSettings::default()), "GET /fps HTTP/1.0\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 500"));
        assert!(out.contains("<b>HTTP/1.1</b>"));
    }

    #[tokio::test]
    async fn test_garbage_is_bad_request() {
        let out = exchange(state(ServerSettings::default()), "HELLO\r\n\r\n").await;
        assert!(out.contains("Bad request"));
    }

    #[tokio::test]
    async fn test_viewer_rejected_at_capacity() {
        let mut settings = ServerSettings::default();
        settings.stream.max_connections = ConnectionLimit::Max(1);
        let state = state(settings);
        let _slot = state.try_acquire_slot().unwrap();

        let out = exchange(state.clone(), "GET /html HTTP/1.1\r\nHost: cam\r\n\r\n").await;
        assert!(out.contains("too many"));
    }

    #[tokio::test]
    async fn test_viewer_page() {
        let out = exchange(
            state(ServerSettings::default()),
            "GET / HTTP/1.1\r\nHost: cam:8080\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(out.contains("<img src=\"http://cam:8080/mjpg\"/>"));
    }
}
