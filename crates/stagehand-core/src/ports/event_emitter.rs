//! Task event emitter port.
//!
//! This port abstracts event emission, allowing tasks to report progress and
//! outcomes without coupling to transport details (UI bindings, channels, logs).

use tokio::sync::mpsc;

use crate::events::TaskEvent;

/// Port for emitting task events.
///
/// Implementations handle the actual event delivery. This method should
/// not block.
pub trait TaskEventEmitterPort: Send + Sync {
    /// Emit a task event.
    fn emit(&self, event: TaskEvent);
}

/// A no-op emitter for contexts where events are not observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTaskEmitter;

impl TaskEventEmitterPort for NoopTaskEmitter {
    fn emit(&self, _event: TaskEvent) {
        // Intentionally do nothing
    }
}

/// Emitter that forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTaskEmitter {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelTaskEmitter {
    /// Create an emitter and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TaskEventEmitterPort for ChannelTaskEmitter {
    fn emit(&self, event: TaskEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}
