//! Single JPEG on demand.

use crate::response::{jpeg_response, ErrorPage};
use crate::state::StreamState;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::warn;

/// Pull a fresh frame, encode it and send it as one `image/jpeg` response.
///
/// Served regardless of the connection limit. The request is counted as an
/// in-flight snapshot while encoding and sending, and the connection is
/// closed afterwards.
pub async fn serve_snapshot<W: AsyncWrite + Unpin>(
    state: &Arc<StreamState>,
    writer: &mut W,
) -> std::io::Result<()> {
    let _in_flight = state.track_snapshot();

    let capture = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.capture_and_encode()).await
    };

    let response = match capture {
        Ok(Ok(encoded)) => jpeg_response(encoded.jpeg),
        Ok(Err(e)) => {
            warn!("Snapshot failed: {e}");
            ErrorPage::ImageFailed.response(state.name())
        }
        Err(e) => {
            warn!("Snapshot task failed: {e}");
            ErrorPage::ImageFailed.response(state.name())
        }
    };
    response.closing().write_to(writer).await
}
