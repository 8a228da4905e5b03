//! The cross-thread action queue.
//!
//! UI input handlers and background loaders enqueue [`ActionMoment`]s from
//! any thread through a cloned [`ActionProducer`]; the main loop drains with
//! [`ActionQueue::drain`]. Draining is bounded by the queue length observed
//! at drain start, so a producer cannot starve the frame.

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::action::Action;
use crate::gesture::{ActionMoment, Timestamp};

/// Thread-safe producer half of the action queue.
#[derive(Clone)]
pub struct ActionProducer {
    tx: Sender<ActionMoment>,
}

impl ActionProducer {
    /// Enqueues `action` stamped with the current wall-clock time.
    pub fn queue(&self, action: impl Into<Action>) {
        self.queue_at(action, Timestamp::now());
    }

    /// Enqueues `action` with an explicit queue time.
    pub fn queue_at(&self, action: impl Into<Action>, queued_at: Timestamp) {
        // Send only fails when the consumer is gone, i.e. during shutdown.
        let _ = self.tx.send(ActionMoment {
            action: action.into(),
            queued_at,
        });
    }
}

/// The queue itself; owned by the main loop.
pub struct ActionQueue {
    tx: Sender<ActionMoment>,
    rx: Receiver<ActionMoment>,
}

impl Default for ActionQueue {
    fn default() -> Self {
        ActionQueue::new()
    }
}

impl ActionQueue {
    /// An empty queue.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        ActionQueue { tx, rx }
    }

    /// A producer handle for this queue; clone freely across threads.
    pub fn producer(&self) -> ActionProducer {
        ActionProducer {
            tx: self.tx.clone(),
        }
    }

    /// Dequeues at most the number of moments present when the call began.
    pub fn drain(&self) -> Vec<ActionMoment> {
        let bound = self.rx.len();
        let mut out = Vec::with_capacity(bound);
        for _ in 0..bound {
            match self.rx.try_recv() {
                Ok(moment) => out.push(moment),
                Err(_) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ProjectAction;

    #[test]
    fn producers_feed_the_drain_in_order() {
        let queue = ActionQueue::new();
        let producer = queue.producer();
        producer.queue_at(ProjectAction::Undo, Timestamp(1));
        producer.queue_at(ProjectAction::Redo, Timestamp(2));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].action, Action::Project(ProjectAction::Undo));
        assert_eq!(drained[1].action, Action::Project(ProjectAction::Redo));
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn producers_work_from_other_threads() {
        let queue = ActionQueue::new();
        let producer = queue.producer();
        let handle = std::thread::spawn(move || {
            producer.queue_at(ProjectAction::Undo, Timestamp(1));
        });
        handle.join().unwrap();
        assert_eq!(queue.drain().len(), 1);
    }
}
