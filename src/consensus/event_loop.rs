// src/consensus/event_loop.rs
//
// One task owns one validator. Every state transition happens on that task;
// peers and embedders only ever touch the inbound queue.

use tokio::sync::watch;

use super::Node;

impl Node {
    /// Handle at most one queued event. Returns false when the queue is
    /// empty. Deterministic drivers (tests, simulators) use this instead of
    /// the async loop.
    pub fn step(&mut self) -> bool {
        match self.inbound.try_recv() {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(_) => false,
        }
    }

    /// Handle every currently queued event; returns how many were handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while self.step() {
            handled += 1;
        }
        handled
    }

    /// Event loop: consume the inbound queue until `stop` flips to true,
    /// drain what is already queued, then hand the node back.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Self {
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                event = self.inbound.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
            }
        }
        self.drain();
        self
    }
}
