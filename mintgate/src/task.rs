use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// A spawned loop that stops when its handle is shut down or dropped.
pub struct BackgroundTask {
    name: &'static str,
    cancel: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(body(cancel_rx));
        Self {
            name,
            cancel,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.cancel.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                if !e.is_cancelled() {
                    warn!(task = self.name, error = %e, "background task panicked");
                }
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}

/// Resolves once cancellation is requested or the handle is gone.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
