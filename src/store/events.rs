use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// Change notification fired by the store. `Changed` is the generic
/// "something about the run set changed" signal and accompanies every
/// specific notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunChange {
    Created { run_id: String },
    Updated { run_id: String },
    Completed { run_id: String },
    Changed,
}

#[derive(Debug, Default)]
pub struct RunChangeBus {
    subscribers: Mutex<Vec<Sender<RunChange>>>,
}

impl RunChangeBus {
    pub fn subscribe(&self) -> Receiver<RunChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .expect("run change bus lock poisoned")
            .push(tx);
        rx
    }

    /// Delivers `change` followed by the generic `Changed` signal; dropped
    /// receivers are pruned as sends fail.
    pub fn emit(&self, change: RunChange) {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("run change bus lock poisoned");
        subscribers.retain(|tx| {
            if tx.send(change.clone()).is_err() {
                return false;
            }
            if change != RunChange::Changed {
                return tx.send(RunChange::Changed).is_ok();
            }
            true
        });
    }
}
