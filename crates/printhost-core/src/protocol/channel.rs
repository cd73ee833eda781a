//! Framing for the virtual serial channel shared with the print server.
//!
//! The print server believes it is talking to a serial port.  Everything it
//! writes arrives on the channel, and the bridge has to tell apart two kinds
//! of traffic:
//!
//! ```text
//! !octo4a: BAUDRATE 115200     → control frame: (re)open the printer at 115200
//! !octo4a: CLOSE               → control frame: close the printer
//! G28                          → data frame: forward "G28\n" to the printer
//! ```
//!
//! The plugin on the print-server side writes the baud-rate command without a
//! space (`!octo4a: BAUDRATE115200`), so both spellings are accepted.
//!
//! # Framings
//!
//! - [`Framing::Lines`] – the channel is a plain byte pipe.  Each
//!   newline-terminated line is one frame.  Data frames are re-terminated with
//!   a single `\n` before being written to the device.
//! - [`Framing::Packet`] – the channel is a pseudo terminal in packet mode.
//!   Every read starts with one status byte which is stripped.  Bit 0 of the
//!   status byte marks a "start" indicator, which forces the bridge to
//!   establish a fresh device connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker that introduces a control command on the channel.
pub const CONTROL_MARKER: &[u8] = b"!octo4a:";

/// Bit in a packet-mode status byte that flags a connection (re)start.
pub const PACKET_START_FLAG: u8 = 0x01;

/// Errors produced while classifying channel traffic.
///
/// All of these are protocol errors: the offending frame is dropped and the
/// bridge keeps running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The text after the control marker is not a known command.
    #[error("unknown control command: {0:?}")]
    UnknownCommand(String),

    /// `BAUDRATE` was followed by something that is not a positive integer.
    #[error("invalid baud rate in control frame: {0:?}")]
    InvalidBaudRate(String),

    /// The control frame contained bytes that are not valid UTF-8.
    #[error("control frame is not valid UTF-8")]
    NotUtf8,

    /// A packet-mode read returned zero bytes, so there is no status byte.
    #[error("packet is missing its status byte")]
    EmptyPacket,

    /// A line grew past the decoder's limit without a newline.
    #[error("line of at least {len} bytes exceeds the {max}-byte limit")]
    LineTooLong { len: usize, max: usize },
}

/// What a frame asks the bridge to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Plain printer data.
    None,
    /// Open (or re-open) the printer at the given baud rate.
    SetBaudRate(u32),
    /// Close the printer and restart the channel.
    Close,
}

/// One unit of traffic read from the virtual serial channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFrame {
    /// Bytes to forward to the device (data frames) or the raw command text
    /// (control frames).
    pub payload: Vec<u8>,
    /// Decoded command, [`ControlKind::None`] for data frames.
    pub control: ControlKind,
    /// `true` when the packet status byte carried the start indicator.
    pub start: bool,
}

impl SerialFrame {
    /// Builds a data frame.
    pub fn data(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            control: ControlKind::None,
            start: false,
        }
    }

    /// Returns `true` if the payload carries the control marker.
    pub fn is_control_prefixed(&self) -> bool {
        find_marker(&self.payload).is_some()
    }

    /// Returns `true` for baud-rate and close frames.
    pub fn is_control(&self) -> bool {
        self.control != ControlKind::None
    }
}

/// How the channel delimits frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    #[default]
    Lines,
    Packet,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Classifies one line read from a [`Framing::Lines`] channel.
///
/// `line` must not include its terminating `\n`; a trailing `\r` is dropped.
/// Data frames get a single `\n` appended so the printer sees the line
/// exactly as the print server wrote it.
///
/// # Errors
///
/// Returns [`FrameError`] if the line carries the control marker but the
/// command after it cannot be parsed.
///
/// # Examples
///
/// ```rust
/// use printhost_core::protocol::channel::{decode_line, ControlKind};
///
/// let frame = decode_line(b"!octo4a: BAUDRATE 250000").unwrap();
/// assert_eq!(frame.control, ControlKind::SetBaudRate(250000));
///
/// let frame = decode_line(b"M105").unwrap();
/// assert_eq!(frame.payload, b"M105\n");
/// ```
pub fn decode_line(line: &[u8]) -> Result<SerialFrame, FrameError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    if let Some(at) = find_marker(line) {
        let control = parse_command(&line[at + CONTROL_MARKER.len()..])?;
        return Ok(SerialFrame {
            payload: line.to_vec(),
            control,
            start: false,
        });
    }

    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line);
    payload.push(b'\n');
    Ok(SerialFrame::data(payload))
}

/// Classifies one read from a [`Framing::Packet`] channel.
///
/// The leading status byte is stripped; the rest is either a control command
/// or data forwarded verbatim.
///
/// # Errors
///
/// Returns [`FrameError::EmptyPacket`] for a zero-length read and the parse
/// errors of [`decode_line`] for malformed control commands.
pub fn decode_packet(packet: &[u8]) -> Result<SerialFrame, FrameError> {
    let (&status, body) = packet.split_first().ok_or(FrameError::EmptyPacket)?;
    let start = status & PACKET_START_FLAG != 0;

    let control = match find_marker(body) {
        Some(at) => parse_command(&body[at + CONTROL_MARKER.len()..])?,
        None => ControlKind::None,
    };

    Ok(SerialFrame {
        payload: body.to_vec(),
        control,
        start,
    })
}

/// Renders a control command the way the print-server plugin writes it.
///
/// Returns an empty vector for [`ControlKind::None`].
pub fn encode_control(kind: ControlKind) -> Vec<u8> {
    let command = match kind {
        ControlKind::None => return Vec::new(),
        ControlKind::SetBaudRate(baud) => format!(" BAUDRATE {baud}\n"),
        ControlKind::Close => " CLOSE\n".to_string(),
    };
    let mut out = CONTROL_MARKER.to_vec();
    out.extend_from_slice(command.as_bytes());
    out
}

// ── Incremental decoder ───────────────────────────────────────────────────────

/// Default ceiling on one buffered line (64 KiB).  G-code lines are far
/// shorter; anything longer is a stuck or misbehaving writer.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Stateful decoder that turns raw channel reads into frames.
///
/// In line mode a read may end mid-line; the tail is buffered until the next
/// `\n` arrives.  A tail that grows past `max_line_len` is dropped with
/// [`FrameError::LineTooLong`], and the rest of that line is skipped up to its
/// newline.  In packet mode every read is exactly one packet.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    pending: Vec<u8>,
    max_line_len: usize,
    // Inside an oversized line that was already reported.
    discarding: bool,
}

impl FrameDecoder {
    /// Creates a decoder for the given framing.
    pub fn new(framing: Framing) -> Self {
        Self::with_max_line_len(framing, DEFAULT_MAX_LINE_LEN)
    }

    /// Creates a decoder that drops any line longer than `max_line_len`.
    pub fn with_max_line_len(framing: Framing, max_line_len: usize) -> Self {
        Self {
            framing,
            pending: Vec::new(),
            max_line_len,
            discarding: false,
        }
    }

    /// Returns the framing this decoder was built for.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Number of bytes waiting for the end of their line.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one read's worth of bytes and returns every completed frame in
    /// arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<SerialFrame, FrameError>> {
        match self.framing {
            Framing::Packet => vec![decode_packet(chunk)],
            Framing::Lines => self.feed_lines(chunk),
        }
    }

    fn feed_lines(&mut self, chunk: &[u8]) -> Vec<Result<SerialFrame, FrameError>> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        // Only the new bytes are searched; `pending` never holds a newline.
        while let Some(nl) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = (&rest[..nl], &rest[nl + 1..]);
            rest = tail;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.pending.len() + line.len() > self.max_line_len {
                frames.push(Err(self.too_long(line.len())));
                self.discarding = false;
                continue;
            }
            if self.pending.is_empty() {
                frames.push(decode_line(line));
            } else {
                self.pending.extend_from_slice(line);
                frames.push(decode_line(&self.pending));
                self.pending.clear();
            }
        }

        if !self.discarding && !rest.is_empty() {
            if self.pending.len() + rest.len() > self.max_line_len {
                frames.push(Err(self.too_long(rest.len())));
            } else {
                self.pending.extend_from_slice(rest);
            }
        }
        frames
    }

    /// Drops the buffered part of an oversized line and starts skipping the
    /// remainder.
    fn too_long(&mut self, extra: usize) -> FrameError {
        let len = self.pending.len() + extra;
        self.pending.clear();
        self.discarding = true;
        FrameError::LineTooLong {
            len,
            max: self.max_line_len,
        }
    }

    /// Flushes an unterminated trailing line at end of stream.
    pub fn finish(&mut self) -> Option<Result<SerialFrame, FrameError>> {
        self.discarding = false;
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(decode_line(&line))
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn find_marker(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(CONTROL_MARKER.len())
        .position(|window| window == CONTROL_MARKER)
}

fn parse_command(raw: &[u8]) -> Result<ControlKind, FrameError> {
    let text = std::str::from_utf8(raw).map_err(|_| FrameError::NotUtf8)?.trim();

    if let Some(rest) = text.strip_prefix("BAUDRATE") {
        let digits = rest.trim();
        return match digits.parse::<u32>() {
            Ok(baud) if baud > 0 => Ok(ControlKind::SetBaudRate(baud)),
            _ => Err(FrameError::InvalidBaudRate(digits.to_string())),
        };
    }

    if text == "CLOSE" {
        return Ok(ControlKind::Close);
    }

    Err(FrameError::UnknownCommand(text.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── decode_line ───────────────────────────────────────────────────────────

    #[test]
    fn test_decode_line_baudrate_with_space() {
        // Arrange / Act
        let frame = decode_line(b"!octo4a: BAUDRATE 115200").unwrap();

        // Assert
        assert_eq!(frame.control, ControlKind::SetBaudRate(115200));
        assert!(frame.is_control_prefixed());
        assert!(!frame.start);
    }

    #[test]
    fn test_decode_line_baudrate_without_space() {
        let frame = decode_line(b"!octo4a: BAUDRATE250000").unwrap();
        assert_eq!(frame.control, ControlKind::SetBaudRate(250000));
    }

    #[test]
    fn test_decode_line_close() {
        let frame = decode_line(b"!octo4a: CLOSE").unwrap();
        assert_eq!(frame.control, ControlKind::Close);
        assert!(frame.is_control());
    }

    #[test]
    fn test_decode_line_data_appends_newline() {
        // Arrange / Act
        let frame = decode_line(b"G1 X10 Y10").unwrap();

        // Assert
        assert_eq!(frame.control, ControlKind::None);
        assert_eq!(frame.payload, b"G1 X10 Y10\n");
        assert!(!frame.is_control_prefixed());
    }

    #[test]
    fn test_decode_line_strips_carriage_return() {
        let frame = decode_line(b"M105\r").unwrap();
        assert_eq!(frame.payload, b"M105\n");

        let frame = decode_line(b"!octo4a: CLOSE\r").unwrap();
        assert_eq!(frame.control, ControlKind::Close);
    }

    #[test]
    fn test_decode_line_empty_line_is_bare_newline() {
        let frame = decode_line(b"").unwrap();
        assert_eq!(frame.payload, b"\n");
    }

    #[test]
    fn test_decode_line_unparseable_baud_is_error() {
        let err = decode_line(b"!octo4a: BAUDRATE fast").unwrap_err();
        assert_eq!(err, FrameError::InvalidBaudRate("fast".to_string()));
    }

    #[test]
    fn test_decode_line_zero_baud_is_error() {
        let err = decode_line(b"!octo4a: BAUDRATE 0").unwrap_err();
        assert_eq!(err, FrameError::InvalidBaudRate("0".to_string()));
    }

    #[test]
    fn test_decode_line_unknown_command_is_error() {
        let err = decode_line(b"!octo4a: RESET").unwrap_err();
        assert_eq!(err, FrameError::UnknownCommand("RESET".to_string()));
    }

    #[test]
    fn test_decode_line_invalid_utf8_after_marker_is_error() {
        let mut line = CONTROL_MARKER.to_vec();
        line.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(decode_line(&line).unwrap_err(), FrameError::NotUtf8);
    }

    // ── decode_packet ─────────────────────────────────────────────────────────

    #[test]
    fn test_decode_packet_strips_status_byte() {
        // Arrange
        let packet = [0x00, b'M', b'1', b'0', b'5', b'\n'];

        // Act
        let frame = decode_packet(&packet).unwrap();

        // Assert
        assert_eq!(frame.payload, b"M105\n");
        assert_eq!(frame.control, ControlKind::None);
        assert!(!frame.start);
    }

    #[test]
    fn test_decode_packet_start_flag() {
        let mut packet = vec![PACKET_START_FLAG];
        packet.extend_from_slice(b"!octo4a: BAUDRATE115200\n");

        let frame = decode_packet(&packet).unwrap();

        assert!(frame.start);
        assert_eq!(frame.control, ControlKind::SetBaudRate(115200));
    }

    #[test]
    fn test_decode_packet_empty_is_error() {
        assert_eq!(decode_packet(&[]).unwrap_err(), FrameError::EmptyPacket);
    }

    #[test]
    fn test_decode_packet_status_only_has_empty_payload() {
        let frame = decode_packet(&[0x00]).unwrap();
        assert!(frame.payload.is_empty());
    }

    // ── encode_control ────────────────────────────────────────────────────────

    #[test]
    fn test_encode_control_decodes_back() {
        let bytes = encode_control(ControlKind::SetBaudRate(57600));
        assert_eq!(bytes, b"!octo4a: BAUDRATE 57600\n");

        let frame = decode_line(bytes.strip_suffix(b"\n").unwrap()).unwrap();
        assert_eq!(frame.control, ControlKind::SetBaudRate(57600));
    }

    #[test]
    fn test_encode_control_none_is_empty() {
        assert!(encode_control(ControlKind::None).is_empty());
    }

    // ── FrameDecoder ──────────────────────────────────────────────────────────

    #[test]
    fn test_frame_decoder_buffers_partial_lines() {
        // Arrange
        let mut decoder = FrameDecoder::new(Framing::Lines);

        // Act
        let first = decoder.feed(b"G2");
        let second = decoder.feed(b"8\nM10");
        let third = decoder.feed(b"5\n");

        // Assert
        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().unwrap().payload, b"G28\n");
        assert_eq!(third[0].as_ref().unwrap().payload, b"M105\n");
    }

    #[test]
    fn test_frame_decoder_multiple_lines_in_one_read_keep_order() {
        let mut decoder = FrameDecoder::new(Framing::Lines);

        let frames = decoder.feed(b"!octo4a: BAUDRATE 115200\nG28\n!octo4a: CLOSE\n");

        let controls: Vec<ControlKind> = frames.iter().map(|f| f.as_ref().unwrap().control).collect();
        assert_eq!(
            controls,
            vec![ControlKind::SetBaudRate(115200), ControlKind::None, ControlKind::Close]
        );
    }

    #[test]
    fn test_frame_decoder_bad_frame_does_not_poison_following_frames() {
        let mut decoder = FrameDecoder::new(Framing::Lines);

        let frames = decoder.feed(b"!octo4a: BAUDRATE ?\nM105\n");

        assert!(frames[0].is_err());
        assert_eq!(frames[1].as_ref().unwrap().payload, b"M105\n");
    }

    #[test]
    fn test_frame_decoder_finish_flushes_tail() {
        let mut decoder = FrameDecoder::new(Framing::Lines);
        decoder.feed(b"M84");

        let tail = decoder.finish().unwrap().unwrap();

        assert_eq!(tail.payload, b"M84\n");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_frame_decoder_packet_mode_is_one_frame_per_read() {
        let mut decoder = FrameDecoder::new(Framing::Packet);

        let frames = decoder.feed(&[0x00, b'a', b'\n', b'b', b'\n']);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().payload, b"a\nb\n");
    }

    #[test]
    fn test_frame_decoder_drops_oversized_line_and_resyncs() {
        // Arrange
        let mut decoder = FrameDecoder::with_max_line_len(Framing::Lines, 8);

        // Act: 12 bytes with no newline, then the end of that line and a
        // normal one.
        let first = decoder.feed(b"XXXXXXXXXXXX");
        let second = decoder.feed(b"YYYY\nM105\n");

        // Assert
        assert_eq!(
            first,
            vec![Err(FrameError::LineTooLong { len: 12, max: 8 })]
        );
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().unwrap().payload, b"M105\n");
    }

    #[test]
    fn test_frame_decoder_buffer_stays_bounded_without_newlines() {
        let mut decoder = FrameDecoder::with_max_line_len(Framing::Lines, 1024);
        let chunk = vec![b'A'; 4096];

        let mut errors = 0;
        for _ in 0..64 {
            errors += decoder.feed(&chunk).iter().filter(|f| f.is_err()).count();
            assert!(decoder.buffered() <= 1024);
        }

        // Reported once, then skipped until the line ends.
        assert_eq!(errors, 1);
        let frames = decoder.feed(b"\nG28\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().payload, b"G28\n");
    }

    #[test]
    fn test_frame_decoder_line_at_limit_is_kept() {
        let mut decoder = FrameDecoder::with_max_line_len(Framing::Lines, 4);

        decoder.feed(b"M1");
        let frames = decoder.feed(b"05\n");

        assert_eq!(frames[0].as_ref().unwrap().payload, b"M105\n");
    }

    #[test]
    fn test_framing_default_is_lines() {
        assert_eq!(Framing::default(), Framing::Lines);
    }
}
