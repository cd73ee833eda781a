//! Integration tests for decoding a realistic print-server session from the
//! virtual serial channel.
//!
//! The print server connects, picks a baud rate, sends G-code, switches baud
//! rate, and finally disconnects.  Reads from the channel are chopped at
//! arbitrary byte boundaries, so the decoder must produce the same frame
//! sequence no matter how the stream is split.

use printhost_core::protocol::channel::encode_control;
use printhost_core::{ControlKind, FrameDecoder, Framing, SerialFrame};

fn session_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"!octo4a: BAUDRATE115200\n");
    bytes.extend_from_slice(b"N0 M110 N0*125\r\n");
    bytes.extend_from_slice(b"M105\n");
    bytes.extend_from_slice(&encode_control(ControlKind::SetBaudRate(250000)));
    bytes.extend_from_slice(b"G28 X Y\n");
    bytes.extend_from_slice(b"!octo4a: CLOSE\n");
    bytes
}

fn decode_in_chunks(bytes: &[u8], chunk: usize) -> Vec<SerialFrame> {
    let mut decoder = FrameDecoder::new(Framing::Lines);
    let mut frames = Vec::new();
    for piece in bytes.chunks(chunk) {
        for frame in decoder.feed(piece) {
            frames.push(frame.expect("session contains only valid frames"));
        }
    }
    if let Some(tail) = decoder.finish() {
        frames.push(tail.expect("valid tail"));
    }
    frames
}

#[test]
fn test_session_decodes_into_expected_frames() {
    // Arrange
    let bytes = session_bytes();

    // Act
    let frames = decode_in_chunks(&bytes, bytes.len());

    // Assert
    let controls: Vec<ControlKind> = frames.iter().map(|f| f.control).collect();
    assert_eq!(
        controls,
        vec![
            ControlKind::SetBaudRate(115200),
            ControlKind::None,
            ControlKind::None,
            ControlKind::SetBaudRate(250000),
            ControlKind::None,
            ControlKind::Close,
        ]
    );
    assert_eq!(frames[1].payload, b"N0 M110 N0*125\n");
    assert_eq!(frames[4].payload, b"G28 X Y\n");
}

#[test]
fn test_session_decoding_is_independent_of_read_boundaries() {
    let bytes = session_bytes();
    let reference = decode_in_chunks(&bytes, bytes.len());

    for chunk in [1, 2, 3, 7, 16, 31] {
        assert_eq!(
            decode_in_chunks(&bytes, chunk),
            reference,
            "chunk size {chunk} changed the decoded frames"
        );
    }
}
