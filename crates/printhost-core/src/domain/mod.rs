//! Domain layer: pure state types shared by the PrintHost crates.
//!
//! No type in this module performs I/O.  Mutation happens through `&self`
//! methods backed by atomics or short critical sections so the same instance
//! can be shared across tasks behind an `Arc`.

pub mod events;
pub mod frame_buffer;
pub mod process;
pub mod serial;
