//! # printhost-core
//!
//! Shared library for PrintHost containing the virtual-serial channel codec,
//! the single-slot camera frame buffer, and the domain types used by the
//! daemon and the camera server.
//!
//! This crate has zero dependencies on OS APIs, serial ports, sockets, or
//! child processes.  Everything here can be unit tested on any host.
//!
//! # Architecture overview (for beginners)
//!
//! PrintHost turns a phone into a headless 3D-printer controller.  A print
//! server (OctoPrint) runs inside a bootstrapped Linux user space and talks
//! "serial" over a virtual channel; PrintHost bridges that channel to the real
//! USB printer, streams the phone camera over HTTP, and supervises the child
//! processes.
//!
//! This crate (`printhost-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How lines on the virtual serial channel are classified
//!   into control frames (baud-rate change, close) and raw printer data, and
//!   how the bootstrap archive's symlink manifest is parsed.
//!
//! - **`domain`** – Pure state with no OS dependencies: the latest-frame
//!   buffer shared by the camera producer and the stream consumers, serial
//!   line settings and device selection, the supervised process state
//!   machine, and the status events shown to the surrounding UI.

pub mod domain;
pub mod protocol;

pub use domain::events::{EventSink, HostEvent, InstallPhase, NoopSink};
pub use domain::frame_buffer::{FrameBuffer, ListenerGuard};
pub use domain::process::ProcessStatus;
pub use domain::serial::{DeviceInfo, DeviceSelector, LineSettings, Parity, StopBits};
pub use protocol::channel::{ControlKind, FrameDecoder, FrameError, Framing, SerialFrame};
pub use protocol::manifest::{parse_symlink_manifest, ManifestError, SymlinkEntry};
