//! Requests the print server sends back to the host.

/// Closed set of commands accepted on the event pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeCommand {
    /// Stop the print server and start it again.
    RestartServer,
    /// Stop the print server and leave it stopped.
    StopServer,
}

impl PipeCommand {
    /// Maps the wire name (`eventType`) to a command.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "restartServer" => Some(Self::RestartServer),
            "stopServer" => Some(Self::StopServer),
            _ => None,
        }
    }
}
