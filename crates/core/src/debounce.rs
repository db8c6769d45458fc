//! Debounced invoker – collapses a burst of calls into the trailing one.
//!
//! Every call re-arms a single timer. When the quiescence window elapses with
//! no further calls, the underlying operation runs once with the arguments of
//! the last call, and its outcome is delivered to *every* caller of the burst
//! (superseded callers included). At most one underlying execution is in
//! flight per [`Debouncer`]. A burst whose callers have all stopped waiting
//! is dropped without executing.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default quiescence window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
type Operation<A, T> = Arc<dyn Fn(A) -> BoxFuture<T> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebounceError {
    #[error("pending invocation was dropped before it settled")]
    Dropped,
}

struct Pending<T> {
    generation: u64,
    waiters: Vec<oneshot::Sender<T>>,
    /// Dropping this sender cancels the armed timer.
    cancel: Option<oneshot::Sender<()>>,
}

pub struct Debouncer<A, T> {
    window: Duration,
    op: Operation<A, T>,
    pending: Arc<Mutex<Pending<T>>>,
    running: Arc<tokio::sync::Mutex<()>>,
}

impl<A, T> Debouncer<A, T>
where
    A: Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(window: Duration, op: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let op: Operation<A, T> = Arc::new(move |args: A| -> BoxFuture<T> { Box::pin(op(args)) });
        Self {
            window,
            op,
            pending: Arc::new(Mutex::new(Pending {
                generation: 0,
                waiters: Vec::new(),
                cancel: None,
            })),
            running: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule a call and wait for the outcome of the burst it belongs to.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn invoke(&self, args: A) -> Result<T, DebounceError> {
        let (tx, rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let generation = {
            let mut pending = lock(&self.pending);
            pending.generation = pending.generation.wrapping_add(1);
            pending.waiters.push(tx);
            pending.cancel = Some(cancel_tx);
            pending.generation
        };

        tokio::spawn(fire(
            self.window,
            generation,
            args,
            Arc::clone(&self.op),
            Arc::clone(&self.pending),
            Arc::clone(&self.running),
            cancel_rx,
        ));

        rx.await.map_err(|_| DebounceError::Dropped)
    }
}

async fn fire<A, T>(
    window: Duration,
    generation: u64,
    args: A,
    op: Operation<A, T>,
    pending: Arc<Mutex<Pending<T>>>,
    running: Arc<tokio::sync::Mutex<()>>,
    cancel_rx: oneshot::Receiver<()>,
) where
    T: Clone,
{
    tokio::select! {
        _ = tokio::time::sleep(window) => {}
        _ = cancel_rx => return,
    }

    let waiters = {
        let mut pending = lock(&pending);
        if pending.generation != generation {
            return;
        }
        pending.cancel = None;
        std::mem::take(&mut pending.waiters)
    };

    let _in_flight = running.lock().await;
    // Nobody is left to observe the outcome; the call must not reach the engine.
    if waiters.iter().all(|w| w.is_closed()) {
        return;
    }
    let outcome = op(args).await;

    let mut waiters = waiters;
    let last = waiters.pop();
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
    if let Some(last) = last {
        let _ = last.send(outcome);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
