//! Splits a concatenated JPEG byte stream into individual frames.
//!
//! Capture tools such as `ffmpeg -f mjpeg -` write JPEG images back to back
//! with no container.  Each image starts with the SOI marker `FF D8` and ends
//! with the EOI marker `FF D9`.  Inside the compressed data every literal
//! `FF` is followed by a stuffed `00`, so the markers cannot appear by
//! accident within a frame.

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Default ceiling on a single buffered frame (8 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Incremental SOI/EOI frame splitter.
#[derive(Debug)]
pub struct JpegSplitter {
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a splitter that discards any frame growing past `max_frame_len`.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_len,
        }
    }

    /// Number of bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends bytes and returns every complete frame, oldest first.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &SOI, 0) else {
                // Keep a trailing 0xFF: it may be the first half of an SOI.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let cut = self.buf.len() - keep;
                self.buf.drain(..cut);
                break;
            };
            if start > 0 {
                self.buf.drain(..start);
            }

            match find(&self.buf, &EOI, SOI.len()) {
                Some(end) => {
                    let frame: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
                    frames.push(frame);
                }
                None => {
                    if self.buf.len() > self.max_frame_len {
                        tracing::warn!(
                            "dropping oversized JPEG ({} bytes buffered without EOI)",
                            self.buf.len()
                        );
                        // Skip past this SOI and resynchronise on the next one.
                        self.buf.drain(..SOI.len());
                        continue;
                    }
                    break;
                }
            }
        }

        frames
    }
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut out = SOI.to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(&EOI);
        out
    }

    #[test]
    fn test_single_frame_in_one_chunk() {
        // Arrange
        let mut splitter = JpegSplitter::new();
        let frame = jpeg(&[1, 2, 3]);

        // Act
        let frames = splitter.feed(&frame);

        // Assert
        assert_eq!(frames, vec![frame]);
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut splitter = JpegSplitter::new();
        let frame = jpeg(&[0xFF, 0x00, 9, 9]);

        assert!(splitter.feed(&frame[..3]).is_empty());
        assert!(splitter.feed(&frame[3..frame.len() - 1]).is_empty());
        let frames = splitter.feed(&frame[frame.len() - 1..]);

        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_soi_split_across_chunks() {
        let mut splitter = JpegSplitter::new();
        let frame = jpeg(&[7]);

        assert!(splitter.feed(&[0x00, 0x11, 0xFF]).is_empty());
        let frames = splitter.feed(&frame[1..]);

        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_multiple_frames_and_garbage_between() {
        let mut splitter = JpegSplitter::new();
        let a = jpeg(&[1]);
        let b = jpeg(&[2, 2]);
        let mut stream = vec![0x42, 0x42];
        stream.extend_from_slice(&a);
        stream.extend_from_slice(b"junk");
        stream.extend_from_slice(&b);

        let frames = splitter.feed(&stream);

        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn test_oversized_frame_is_dropped_and_stream_resyncs() {
        let mut splitter = JpegSplitter::with_max_frame_len(16);
        let mut stream = SOI.to_vec();
        stream.extend_from_slice(&[0u8; 32]);

        assert!(splitter.feed(&stream).is_empty());
        assert!(splitter.buffered() <= 1);

        let good = jpeg(&[5]);
        assert_eq!(splitter.feed(&good), vec![good]);
    }
}
