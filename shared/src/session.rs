//! Owner of a connection's background tasks

use log::{debug, error};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Collects the tasks a connection spawns so teardown can cancel and join
/// all of them instead of leaking them across reconnects.
pub struct Session {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Session {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: Vec::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("session: spawn {}", name);
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Cancels every task and waits for each one to finish.
    pub async fn close(self) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            match handle.await {
                Ok(()) => debug!("session: {} stopped", name),
                Err(e) => error!("session: {} task panicked: {}", name, e),
            }
        }
    }
}
