//! Reader for `multipart/x-mixed-replace` bodies (MJPEG over HTTP).

use std::io::{self, BufRead, Read};

/// Longest header or boundary line accepted inside a part
const MAX_LINE: u64 = 4096;

/// Upper bound on a single JPEG part
pub(crate) const MAX_PART: usize = 32 * 1024 * 1024;

/// Extract the `boundary=` parameter from a Content-Type value.
pub(crate) fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Splits a multipart stream into part bodies.
///
/// Parts are framed by `--boundary` lines. Servers that put the leading
/// dashes into the boundary parameter itself are tolerated. When a part
/// declares `Content-Length` exactly that many bytes are read; otherwise the
/// body is scanned up to the JPEG end-of-image marker.
pub(crate) struct MultipartReader<R> {
    inner: R,
    boundary: String,
}

impl<R: BufRead> MultipartReader<R> {
    pub(crate) fn new(inner: R, boundary: impl Into<String>) -> Self {
        Self {
            inner,
            boundary: boundary.into(),
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let n = (&mut self.inner).take(MAX_LINE).read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') && n as u64 == MAX_LINE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "multipart line too long",
            ));
        }
        Ok(Some(String::from_utf8_lossy(&buf).trim_end().to_string()))
    }

    fn is_delimiter(&self, line: &str) -> bool {
        line == self.boundary || line.strip_prefix("--") == Some(self.boundary.as_str())
    }

    fn is_terminator(&self, line: &str) -> bool {
        line.strip_suffix("--")
            .map(|l| self.is_delimiter(l))
            .unwrap_or(false)
    }

    /// Read the next part body. Returns `Ok(None)` at end of stream.
    pub(crate) fn read_part(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(line) if self.is_terminator(&line) => return Ok(None),
                Some(line) if self.is_delimiter(&line) => break,
                Some(_) => continue,
            }
        }

        let mut content_length = None;
        loop {
            let line = self.read_line()?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended in part headers")
            })?;
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse::<usize>().ok();
                }
            }
        }

        match content_length {
            Some(len) if len > MAX_PART => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("part of {len} bytes exceeds limit"),
            )),
            Some(len) => {
                let mut body = vec![0u8; len];
                self.inner.read_exact(&mut body)?;
                Ok(Some(body))
            }
            None => self.read_until_eoi().map(Some),
        }
    }

    fn read_until_eoi(&mut self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let n = self.inner.read_until(0xD9, &mut body)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before end of image",
                ));
            }
            if body.len() >= 2 && body[body.len() - 2] == 0xFF && body[body.len() - 1] == 0xD9 {
                return Ok(body);
            }
            if body.len() > MAX_PART {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "part exceeds limit without end of image",
                ));
            }
        }
    }
}
