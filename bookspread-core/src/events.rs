//! Signals emitted for the view layer.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::controller::SpreadView;
use crate::error::ErrorKind;

/// Callbacks a view layer implements to follow the controller. The engine
/// only emits these; it never manipulates layout.
pub trait PresentationHooks: Send + Sync {
    fn on_transition_start(&self) {}
    fn on_transition_end(&self) {}
    fn on_spread_ready(&self, _spread: &SpreadView) {}
    fn on_error(&self, _kind: ErrorKind, _message: &str) {}
}

#[derive(Debug, Clone)]
pub enum ReaderEvent {
    TransitionStarted,
    TransitionEnded,
    SpreadReady(SpreadView),
    Error { kind: ErrorKind, message: String },
}

/// Hooks implementation that records events for a UI loop to drain.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: Arc<Mutex<Vec<ReaderEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ReaderEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn push(&self, event: ReaderEvent) {
        self.events.lock().push(event);
    }
}

impl PresentationHooks for EventQueue {
    fn on_transition_start(&self) {
        self.push(ReaderEvent::TransitionStarted);
    }

    fn on_transition_end(&self) {
        self.push(ReaderEvent::TransitionEnded);
    }

    fn on_spread_ready(&self, spread: &SpreadView) {
        self.push(ReaderEvent::SpreadReady(spread.clone()));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.push(ReaderEvent::Error {
            kind,
            message: message.to_owned(),
        });
    }
}
