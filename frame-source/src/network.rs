//! Network stream source.
//!
//! Pulls frames from another HTTP server, either by following its
//! `multipart/x-mixed-replace` MJPEG stream or, when the URL serves a single
//! JPEG, by re-requesting it on every pull. Useful for re-broadcasting a
//! remote camera locally so many viewers share one upstream connection.
//!
//! A multipart stream is read on its own thread at the upstream's pace. Only
//! the newest complete part is kept, so a slow puller skips stale frames
//! instead of falling behind.

use crate::multipart::{boundary_from_content_type, MultipartReader, MAX_PART};
use crate::{Frame, FrameSource, SourceError, SourceResult};
use image::ImageFormat;
use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

type PartStream = MultipartReader<BufReader<ureq::BodyReader<'static>>>;

/// How long a pull waits for the upstream to deliver a new part
const PART_WAIT: Duration = Duration::from_secs(2);
/// Pause between reconnect attempts after the upstream drops
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Newest complete part read from the upstream. Each store replaces the
/// previous part whether or not it was taken.
#[derive(Default)]
struct LatestPart {
    slot: Mutex<Option<Vec<u8>>>,
    ready: Condvar,
}

impl LatestPart {
    fn store(&self, part: Vec<u8>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(part);
        self.ready.notify_all();
    }

    /// Take the newest part, waiting up to `timeout` for one to arrive.
    fn take(&self, timeout: Duration) -> Option<Vec<u8>> {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }
}

/// Read parts into `latest` until the stream ends or `stop` is set.
fn pump_parts<R: BufRead>(
    mut reader: MultipartReader<R>,
    latest: &LatestPart,
    stop: &AtomicBool,
) -> io::Result<()> {
    while !stop.load(Ordering::Acquire) {
        match reader.read_part()? {
            Some(part) => latest.store(part),
            None => break,
        }
    }
    Ok(())
}

/// Body of the upstream reader thread. Reconnects until stopped.
fn follow_upstream(
    url: String,
    first: PartStream,
    latest: Arc<LatestPart>,
    stop: Arc<AtomicBool>,
) {
    let mut next = Some(first);
    while !stop.load(Ordering::Acquire) {
        let reader = match next.take() {
            Some(reader) => reader,
            None => match connect_stream(&url) {
                Ok(reader) => {
                    info!("Reconnected to {url}");
                    reader
                }
                Err(e) => {
                    debug!("Reconnect to {url} failed: {e}");
                    thread::sleep(RECONNECT_DELAY);
                    continue;
                }
            },
        };
        match pump_parts(reader, &latest, &stop) {
            Ok(()) if stop.load(Ordering::Acquire) => break,
            Ok(()) => warn!("Upstream stream {url} ended"),
            Err(e) => warn!("Upstream stream {url} failed: {e}"),
        }
        thread::sleep(RECONNECT_DELAY);
    }
    debug!("Stopped following {url}");
}

/// Handle to the upstream reader thread. Dropping it stops the thread after
/// its current read returns.
struct Follower {
    latest: Arc<LatestPart>,
    stop: Arc<AtomicBool>,
}

impl Follower {
    fn spawn(url: &str, first: PartStream) -> io::Result<Self> {
        let latest = Arc::new(LatestPart::default());
        let stop = Arc::new(AtomicBool::new(false));
        {
            let url = url.to_string();
            let latest = latest.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("upstream".to_string())
                .spawn(move || follow_upstream(url, first, latest, stop))?;
        }
        Ok(Self { latest, stop })
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

enum Upstream {
    /// Following a multipart stream on a reader thread
    Multipart(Follower),
    /// Single-image endpoint, polled once per pull
    Snapshot,
    /// Reader thread stopped by `release`
    Stopped,
}

pub struct NetworkStreamSource {
    url: String,
    upstream: Upstream,
    frame_count: u64,
    released: bool,
}

impl NetworkStreamSource {
    /// Connect to `url` and detect whether it serves a stream or a snapshot.
    pub fn open(url: &str) -> SourceResult<Self> {
        let response = ureq::get(url).call().map_err(|e| SourceError::Open {
            identifier: url.to_string(),
            reason: e.to_string(),
        })?;
        let content_type = content_type(&response);

        let upstream = match boundary_from_content_type(&content_type) {
            Some(boundary) if content_type.starts_with("multipart/") => {
                info!("Following multipart stream at {url} (boundary {boundary:?})");
                let reader = response.into_body().into_reader();
                let first = MultipartReader::new(BufReader::new(reader), boundary);
                let follower = Follower::spawn(url, first).map_err(|e| SourceError::Open {
                    identifier: url.to_string(),
                    reason: format!("failed to start reader thread: {e}"),
                })?;
                Upstream::Multipart(follower)
            }
            _ if content_type.starts_with("image/") => {
                info!("Polling single images from {url}");
                Upstream::Snapshot
            }
            _ => {
                return Err(SourceError::Open {
                    identifier: url.to_string(),
                    reason: format!("unsupported content type {content_type:?}"),
                })
            }
        };

        Ok(Self {
            url: url.to_string(),
            upstream,
            frame_count: 0,
            released: false,
        })
    }

    fn decode(&mut self, jpeg: &[u8]) -> SourceResult<Frame> {
        let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?;
        let frame = Frame::new(image, self.frame_count);
        self.frame_count += 1;
        Ok(frame)
    }
}

fn connect_stream(url: &str) -> SourceResult<PartStream> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| SourceError::Http(e.to_string()))?;
    let content_type = content_type(&response);
    let boundary = boundary_from_content_type(&content_type).ok_or_else(|| {
        SourceError::Http(format!("stream lost its boundary ({content_type:?})"))
    })?;
    let reader = response.into_body().into_reader();
    Ok(MultipartReader::new(BufReader::new(reader), boundary))
}

fn fetch_snapshot(url: &str) -> SourceResult<Vec<u8>> {
    let mut response = ureq::get(url)
        .call()
        .map_err(|e| SourceError::Http(e.to_string()))?;
    response
        .body_mut()
        .with_config()
        .limit(MAX_PART as u64)
        .read_to_vec()
        .map_err(|e| SourceError::Http(e.to_string()))
}

fn content_type(response: &ureq::http::Response<ureq::Body>) -> String {
    response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

impl FrameSource for NetworkStreamSource {
    fn next_frame(&mut self) -> SourceResult<Option<Frame>> {
        if self.released {
            return Err(SourceError::Released);
        }

        let jpeg = match &self.upstream {
            Upstream::Snapshot => fetch_snapshot(&self.url)?,
            Upstream::Multipart(follower) => match follower.latest.take(PART_WAIT) {
                Some(part) => part,
                None => {
                    debug!("No new part from {} within {PART_WAIT:?}", self.url);
                    return Ok(None);
                }
            },
            Upstream::Stopped => return Err(SourceError::Released),
        };

        self.decode(&jpeg).map(Some)
    }

    fn release(&mut self) -> SourceResult<()> {
        self.upstream = Upstream::Stopped;
        self.released = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    fn stream_of(bodies: &[&[u8]]) -> MultipartReader<Cursor<Vec<u8>>> {
        let mut raw = Vec::new();
        for body in bodies {
            raw.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n");
            raw.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            raw.extend_from_slice(body);
            raw.extend_from_slice(b"\r\n");
        }
        MultipartReader::new(Cursor::new(raw), "frame")
    }

    #[test]
    fn test_only_newest_part_is_kept() {
        let latest = LatestPart::default();
        let stop = AtomicBool::new(false);
        let reader = stream_of(&[
            b"\xFF\xD8one\xFF\xD9",
            b"\xFF\xD8two\xFF\xD9",
            b"\xFF\xD8three\xFF\xD9",
        ]);

        pump_parts(reader, &latest, &stop).unwrap();
        assert_eq!(latest.take(Duration::ZERO).unwrap(), b"\xFF\xD8three\xFF\xD9");
        assert!(latest.take(Duration::ZERO).is_none());
    }

    #[test]
    fn test_stopped_pump_stores_nothing() {
        let latest = LatestPart::default();
        let stop = AtomicBool::new(true);
        pump_parts(stream_of(&[b"\xFF\xD8x\xFF\xD9"]), &latest, &stop).unwrap();
        assert!(latest.take(Duration::ZERO).is_none());
    }

    #[test]
    fn test_take_waits_for_next_part() {
        let latest = Arc::new(LatestPart::default());
        let writer = {
            let latest = latest.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                latest.store(b"late".to_vec());
            })
        };

        assert_eq!(latest.take(Duration::from_secs(5)).unwrap(), b"late");
        writer.join().unwrap();

        let start = Instant::now();
        assert!(latest.take(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
