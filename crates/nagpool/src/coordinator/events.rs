//! Session → coordinator notifications
//!
//! Sessions post events here instead of calling the coordinator, which keeps the
//! lock order one-way. A single pump thread applies them in posting order.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

use super::Coordinator;
use crate::nag::Nag;
use crate::session::SessionId;

#[derive(Debug)]
pub(crate) enum Event {
    Negotiated(SessionId),
    Available(SessionId),
    Ready(SessionId),
    Completed(Arc<Nag>),
    Disconnected(SessionId),
    /// Stops the pump
    Shutdown,
}

pub(crate) fn spawn_pump(coordinator: Weak<Coordinator>, events: Receiver<Event>) -> JoinHandle<()> {
    thread::spawn(move || {
        for event in events.iter() {
            if matches!(event, Event::Shutdown) {
                break;
            }
            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            coordinator.handle_event(event);
        }
        log::debug!("event pump stopped");
    })
}

/// Applies queued events on the calling thread until the queue is empty.
#[cfg(test)]
pub(crate) fn drain(coordinator: &Coordinator, events: &Receiver<Event>) {
    while let Ok(event) = events.try_recv() {
        if !matches!(event, Event::Shutdown) {
            coordinator.handle_event(event);
        }
    }
}
