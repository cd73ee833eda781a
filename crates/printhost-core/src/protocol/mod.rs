//! Wire formats exchanged with processes outside PrintHost.
//!
//! - [`channel`] – framing of the virtual serial channel between the print
//!   server and the bridge.
//! - [`manifest`] – the `SYMLINKS.txt` manifest shipped inside the bootstrap
//!   archive.

pub mod channel;
pub mod manifest;

pub use channel::{decode_line, decode_packet, encode_control, CONTROL_MARKER};
pub use manifest::{SYMLINK_MANIFEST_NAME, SYMLINK_SEPARATOR};
