//! Trailing-edge debouncer with a single resettable timer.
//!
//! The first poke arms the timer, every further poke inside the window
//! restarts it, and only a full quiet window fires the callback once.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running debouncer. Dropping it cancels any pending fire.
#[derive(Debug)]
pub struct Debouncer {
    pokes: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn a debouncer on the current tokio runtime.
    pub fn spawn<F>(window: Duration, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (pokes, mut rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            // Wait for the event that opens a window.
            while rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(window) => {
                            on_fire();
                            break;
                        }
                        poke = rx.recv() => {
                            if poke.is_none() {
                                return;
                            }
                        }
                    }
                }
            }
        });
        Self { pokes, task }
    }

    /// Register an event, (re)starting the trailing timer.
    pub fn poke(&self) {
        let _ = self.pokes.send(());
    }

    /// Cancel the debouncer without firing.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
