//! Pure daemon types: what to run, in which environment, and what the print
//! server may ask for.

pub mod commands;
pub mod process_spec;
pub mod runtime_env;

pub use commands::PipeCommand;
pub use process_spec::{ProcessSpec, Readiness, StopCommand};
pub use runtime_env::RuntimeEnv;
