//! Common test utilities.
//!
//! Hand-written fakes for the worker service and the HTTP transport.

#![allow(dead_code)]

pub mod transport;
pub mod worker;

use stagehand_core::TaskEvent;
use tokio::sync::mpsc;

/// Drain every event emitted so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
