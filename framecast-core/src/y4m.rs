//! YUV4MPEG2 stream reader — the sender's frame source.
//!
//! Parses the stream header (`YUV4MPEG2 W… H… F… C…`) and yields
//! successive [`Raster`]s from `FRAME` records. Only 4:2:0 chroma
//! subsampling is accepted; the stream's own frame-rate tag is parsed
//! for diagnostics but never drives pacing — the sender's tick clock
//! is the only clock.
//!
//! [`spawn_source`] moves the blocking reads onto a dedicated thread
//! and forwards rasters over a bounded channel; the closed channel is
//! the end-of-stream signal.

use std::io::{BufReader, Read};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::FramecastError;
use crate::raster::{Plane, Raster, RasterHandle};

/// Accepted `C` tag values (all 4:2:0 variants).
const CHROMA_420: [&str; 4] = ["420", "420jpeg", "420mpeg2", "420paldv"];

/// Channel depth between the reader thread and the scheduler. Small on
/// purpose: the scheduler discards stale rasters anyway, and a full
/// channel backpressures the input instead of buffering old frames.
const SOURCE_CHANNEL_DEPTH: usize = 4;

// ── Y4mReader ────────────────────────────────────────────────────

/// Pull-based YUV4MPEG2 parser over any byte stream.
#[derive(Debug)]
pub struct Y4mReader<R: Read> {
    input: BufReader<R>,
    width: usize,
    height: usize,
    /// Stream frame rate as `(numerator, denominator)`, if tagged.
    frame_rate: Option<(u32, u32)>,
    colorspace: String,
}

impl<R: Read> Y4mReader<R> {
    /// Consume the stream header and construct a reader.
    pub fn new(reader: R) -> Result<Self, FramecastError> {
        let mut input = BufReader::new(reader);

        let header = read_line(&mut input)?
            .ok_or_else(|| FramecastError::InvalidStream("empty input".into()))?;
        let mut tokens = header.split(' ').filter(|t| !t.is_empty());

        if tokens.next() != Some("YUV4MPEG2") {
            return Err(FramecastError::InvalidStream(
                "missing YUV4MPEG2 signature".into(),
            ));
        }

        let mut width = None;
        let mut height = None;
        let mut frame_rate = None;
        let mut colorspace = String::from("420jpeg");

        for token in tokens {
            let Some((tag, value)) = token.split_at_checked(1) else {
                return Err(FramecastError::InvalidStream(format!(
                    "unknown header tag: {token}"
                )));
            };
            match tag {
                "W" => width = Some(parse_dimension(value)?),
                "H" => height = Some(parse_dimension(value)?),
                "F" => frame_rate = Some(parse_ratio(value)?),
                "C" => colorspace = value.to_string(),
                // Interlacing, aspect ratio, and extensions do not
                // affect plane layout.
                "I" | "A" | "X" => {}
                _ => {
                    return Err(FramecastError::InvalidStream(format!(
                        "unknown header tag: {token}"
                    )))
                }
            }
        }

        if !CHROMA_420.contains(&colorspace.as_str()) {
            return Err(FramecastError::UnsupportedColorspace(colorspace));
        }

        let width =
            width.ok_or_else(|| FramecastError::InvalidStream("missing W tag".into()))?;
        let height =
            height.ok_or_else(|| FramecastError::InvalidStream("missing H tag".into()))?;

        Ok(Self {
            input,
            width,
            height,
            frame_rate,
            colorspace,
        })
    }

    /// Display width from the stream header.
    pub fn display_width(&self) -> usize {
        self.width
    }

    /// Display height from the stream header.
    pub fn display_height(&self) -> usize {
        self.height
    }

    /// Stream frame rate tag, if present. Diagnostic only.
    pub fn frame_rate(&self) -> Option<(u32, u32)> {
        self.frame_rate
    }

    /// The stream's chroma layout tag.
    pub fn colorspace(&self) -> &str {
        &self.colorspace
    }

    /// Read the next frame. `Ok(None)` at clean end-of-stream.
    pub fn next_raster(&mut self) -> Result<Option<RasterHandle>, FramecastError> {
        let marker = match read_line(&mut self.input)? {
            Some(line) => line,
            None => return Ok(None),
        };

        // "FRAME" optionally followed by space-separated parameters.
        if marker != "FRAME" && !marker.starts_with("FRAME ") {
            return Err(FramecastError::InvalidStream(format!(
                "expected FRAME marker, got {marker:?}"
            )));
        }

        let (cw, ch) = Raster::chroma_dimensions(self.width, self.height);
        let y = self.read_plane(self.width, self.height)?;
        let u = self.read_plane(cw, ch)?;
        let v = self.read_plane(cw, ch)?;

        Ok(Some(Arc::new(Raster::new(self.width, self.height, y, u, v))))
    }

    fn read_plane(&mut self, width: usize, height: usize) -> Result<Plane<u8>, FramecastError> {
        let mut buf = vec![0u8; width * height];
        self.input
            .read_exact(&mut buf)
            .map_err(|_| FramecastError::InvalidStream("truncated frame data".into()))?;
        Ok(Plane::from_vec(width, height, buf))
    }
}

// ── Source thread ────────────────────────────────────────────────

/// Move `reader` onto a dedicated thread and stream its rasters.
///
/// The thread reads until end-of-stream or a parse error; either way
/// the channel closes, which the scheduler treats as input exhaustion.
/// A parse error is forwarded as the final item so the caller can
/// report the real cause.
pub fn spawn_source<R>(
    mut reader: Y4mReader<R>,
) -> mpsc::Receiver<Result<RasterHandle, FramecastError>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_DEPTH);

    thread::Builder::new()
        .name("framecast-source".into())
        .spawn(move || {
            let mut frames: u64 = 0;
            loop {
                match reader.next_raster() {
                    Ok(Some(raster)) => {
                        frames += 1;
                        if tx.blocking_send(Ok(raster)).is_err() {
                            // Scheduler went away; nothing left to feed.
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!(frames, "input stream ended");
                        return;
                    }
                    Err(e) => {
                        error!(frames, "input stream error: {e}");
                        let _ = tx.blocking_send(Err(e));
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn source thread");

    rx
}

// ── Parsing helpers ──────────────────────────────────────────────

/// Read one `\n`-terminated ASCII line. `Ok(None)` on EOF at a line
/// boundary; EOF mid-line is an error.
fn read_line<R: Read>(input: &mut BufReader<R>) -> Result<Option<String>, FramecastError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match input.read(&mut byte) {
            Ok(0) => {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(FramecastError::InvalidStream(
                    "unexpected EOF inside header line".into(),
                ));
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    let text = String::from_utf8(line).map_err(|_| {
                        FramecastError::InvalidStream("non-UTF-8 header line".into())
                    })?;
                    return Ok(Some(text));
                }
                if line.len() > 1024 {
                    return Err(FramecastError::InvalidStream(
                        "header line too long".into(),
                    ));
                }
                line.push(byte[0]);
            }
            Err(e) => return Err(FramecastError::Io(e)),
        }
    }
}

fn parse_dimension(value: &str) -> Result<usize, FramecastError> {
    let n: usize = value
        .parse()
        .map_err(|_| FramecastError::InvalidStream(format!("bad dimension: {value:?}")))?;
    if n == 0 {
        return Err(FramecastError::InvalidStream("zero dimension".into()));
    }
    Ok(n)
}

fn parse_ratio(value: &str) -> Result<(u32, u32), FramecastError> {
    let (num, den) = value
        .split_once(':')
        .ok_or_else(|| FramecastError::InvalidStream(format!("bad ratio: {value:?}")))?;
    let num = num
        .parse()
        .map_err(|_| FramecastError::InvalidStream(format!("bad ratio: {value:?}")))?;
    let den = den
        .parse()
        .map_err(|_| FramecastError::InvalidStream(format!("bad ratio: {value:?}")))?;
    Ok((num, den))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Build an in-memory Y4M stream with `frames` solid-grey frames.
    fn sample_stream(width: usize, height: usize, frames: usize) -> Vec<u8> {
        let (cw, ch) = Raster::chroma_dimensions(width, height);
        let mut out = format!("YUV4MPEG2 W{width} H{height} F30000:1001 Ip A1:1 C420jpeg\n")
            .into_bytes();
        for i in 0..frames {
            out.extend_from_slice(b"FRAME\n");
            out.extend(std::iter::repeat(i as u8).take(width * height)); // Y
            out.extend(std::iter::repeat(128u8).take(cw * ch)); // U
            out.extend(std::iter::repeat(128u8).take(cw * ch)); // V
        }
        out
    }

    #[test]
    fn parses_header() {
        let stream = sample_stream(64, 48, 0);
        let reader = Y4mReader::new(Cursor::new(stream)).unwrap();
        assert_eq!(reader.display_width(), 64);
        assert_eq!(reader.display_height(), 48);
        assert_eq!(reader.frame_rate(), Some((30000, 1001)));
        assert_eq!(reader.colorspace(), "420jpeg");
    }

    #[test]
    fn reads_frames_then_eof() {
        let stream = sample_stream(16, 8, 2);
        let mut reader = Y4mReader::new(Cursor::new(stream)).unwrap();

        let first = reader.next_raster().unwrap().unwrap();
        assert_eq!(first.width(), 16);
        assert_eq!(first.height(), 8);
        assert_eq!(first.y().at(0, 0), 0);

        let second = reader.next_raster().unwrap().unwrap();
        assert_eq!(second.y().at(0, 0), 1);

        assert!(reader.next_raster().unwrap().is_none());
    }

    #[test]
    fn frame_marker_with_parameters() {
        let mut stream = b"YUV4MPEG2 W2 H2 C420\nFRAME Xtimecode\n".to_vec();
        stream.extend_from_slice(&[10u8; 4]); // Y
        stream.extend_from_slice(&[20u8; 1]); // U
        stream.extend_from_slice(&[30u8; 1]); // V
        let mut reader = Y4mReader::new(Cursor::new(stream)).unwrap();
        let raster = reader.next_raster().unwrap().unwrap();
        assert_eq!(raster.u().at(0, 0), 20);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        let stream = sample_stream(3, 3, 1);
        let mut reader = Y4mReader::new(Cursor::new(stream)).unwrap();
        let raster = reader.next_raster().unwrap().unwrap();
        assert_eq!(raster.u().width(), 2);
        assert_eq!(raster.u().height(), 2);
    }

    #[test]
    fn rejects_bad_signature() {
        let err = Y4mReader::new(Cursor::new(b"MPEG4 W2 H2\n".to_vec())).unwrap_err();
        assert!(matches!(err, FramecastError::InvalidStream(_)));
    }

    #[test]
    fn rejects_non_420_colorspace() {
        let err = Y4mReader::new(Cursor::new(b"YUV4MPEG2 W2 H2 C444\n".to_vec())).unwrap_err();
        assert!(matches!(err, FramecastError::UnsupportedColorspace(_)));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut stream = b"YUV4MPEG2 W4 H4 C420\nFRAME\n".to_vec();
        stream.extend_from_slice(&[0u8; 5]); // far short of 16 + 4 + 4
        let mut reader = Y4mReader::new(Cursor::new(stream)).unwrap();
        let err = reader.next_raster().unwrap_err();
        assert!(matches!(err, FramecastError::InvalidStream(_)));
    }

    #[tokio::test]
    async fn source_thread_streams_and_closes() {
        let stream = sample_stream(8, 8, 3);
        let reader = Y4mReader::new(Cursor::new(stream)).unwrap();
        let mut rx = spawn_source(reader);

        for expected in 0..3u8 {
            let raster = rx.recv().await.unwrap().unwrap();
            assert_eq!(raster.y().at(0, 0), expected);
        }
        // Clean EOS closes the channel with no trailing error item.
        assert!(rx.recv().await.is_none());
    }
}
