//! Background worker draining a bounded task channel.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc
//! channel via a `BackgroundRunnable` implementation, with a periodic tick
//! callback. Producers hand work off through a cloned [`TaskSender`], which
//! never waits.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once after the queue has been drained on stop. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Why a task could not be handed to the worker.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker queue is full")]
    Full,
    #[error("worker is not running")]
    Stopped,
}

/// Cloneable, non-blocking handle for submitting tasks.
#[derive(Debug)]
pub struct TaskSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TaskSender<T> {
    /// A sender whose receiver is already gone; every send reports
    /// [`SubmitError::Stopped`].
    #[must_use]
    pub fn closed() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Enqueues `task` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Full`] when the queue is at capacity and
    /// [`SubmitError::Stopped`] once the worker has shut down.
    pub fn try_send(&self, task: T) -> Result<(), SubmitError> {
        self.tx.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Closed(_) => SubmitError::Stopped,
        })
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via a bounded mpsc channel.
///
/// The spawned tokio task:
/// 1. Calls `BackgroundRunnable::run()` for each received task
/// 2. Calls `BackgroundRunnable::on_tick()` at the configured interval
/// 3. On stop, closes the queue, runs every task still buffered, then calls
///    `BackgroundRunnable::shutdown()`
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker with a queue of `capacity` tasks (minimum 1).
    #[must_use]
    pub fn start(mut runnable: R, capacity: usize, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        rx.close();
                        while let Some(t) = rx.recv().await {
                            runnable.run(t).await;
                        }
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Returns a submission handle, or `None` once the worker is stopped.
    #[must_use]
    pub fn sender(&self) -> Option<TaskSender<R::Task>> {
        self.tx.as_ref().map(|tx| TaskSender { tx: tx.clone() })
    }

    /// Stops the worker after it has processed everything already queued.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
