//! Fan-out of [`HostEvent`]s to the status board and any subscriber.

use std::sync::Arc;

use printhost_core::{EventSink, HostEvent};
use tokio::sync::broadcast;
use tracing::debug;

use crate::application::host_status::StatusBoard;

const CAPACITY: usize = 256;

/// The single [`EventSink`] handed to every component.
///
/// Each event updates the [`StatusBoard`] first, then goes out on a
/// broadcast channel.  Slow subscribers lose old events, never the board.
#[derive(Clone)]
pub struct EventBus {
    board: Arc<StatusBoard>,
    tx: broadcast::Sender<HostEvent>,
}

impl EventBus {
    pub fn new(board: Arc<StatusBoard>) -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { board, tx }
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: HostEvent) {
        debug!("host event: {event:?}");
        self.board.apply(&event);
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use printhost_core::ProcessStatus;

    use super::*;

    #[test]
    fn test_emit_updates_board_and_subscribers() {
        // Arrange
        let bus = EventBus::new(Arc::new(StatusBoard::new("octoprint")));
        let mut rx = bus.subscribe();

        // Act
        bus.emit(HostEvent::ProcessStatusChanged {
            name: "octoprint".to_string(),
            status: ProcessStatus::Starting,
        });

        // Assert
        assert_eq!(bus.board().snapshot().print_server, ProcessStatus::Starting);
        assert!(matches!(
            rx.try_recv(),
            Ok(HostEvent::ProcessStatusChanged { .. })
        ));
    }

    #[test]
    fn test_emit_without_subscribers_still_updates_board() {
        let bus = EventBus::new(Arc::new(StatusBoard::new("octoprint")));

        bus.emit(HostEvent::UsbDetached);
        bus.emit(HostEvent::UsbAttached {
            port: "/dev/ttyACM0".to_string(),
        });

        assert_eq!(bus.board().snapshot().usb_device.as_deref(), Some("/dev/ttyACM0"));
    }
}
