use crate::config::{PoolConfig, ResolvedConfig};
use crate::counter::Outstanding;
use crate::error::PoolError;
use crate::task::{share_handler, QueueMessage, SharedHandler, WorkItem};
use crate::worker::{Worker, WorkerState, WorkerStates};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// How a call to [`WorkerPool::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
  /// Every submitted item ran to completion.
  Completed,
  /// The pool was stopped, by [`WorkerPool::stop`] or by a handler returning
  /// `false`. Queued items may not have run.
  Stopped,
}

/// Stops a pool without holding on to the pool itself.
#[derive(Debug, Clone)]
pub struct StopHandle {
  pool_name: Arc<String>,
  stop_token: CancellationToken,
}

impl StopHandle {
  pub fn stop(&self) {
    if !self.stop_token.is_cancelled() {
      info!(pool_name = %*self.pool_name, "Stop requested through StopHandle.");
    }
    self.stop_token.cancel();
  }

  pub fn is_stopped(&self) -> bool {
    self.stop_token.is_cancelled()
  }
}

/// A fixed set of workers consuming `WorkItem<T>`s from one shared queue.
///
/// Submissions never block: each item is delivered to the queue on a detached
/// Tokio task. [`wait`](Self::wait) resolves once every submitted item has
/// been processed or the pool has been stopped.
pub struct WorkerPool<T: Send + 'static> {
  pool_name: Arc<String>,
  worker_count: usize,
  tokio_handle: TokioHandle,
  queue_tx: kanal::AsyncSender<QueueMessage<T>>,
  has_default_handler: bool,
  outstanding: Arc<Outstanding>,
  stop_token: CancellationToken,
  worker_states: WorkerStates,
  worker_join_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
  /// Creates a pool whose items must each carry their own handler.
  pub fn new<I>(tokio_handle: TokioHandle, fragments: I) -> Arc<Self>
  where
    I: IntoIterator,
    I::Item: Into<Option<PoolConfig>>,
  {
    Self::build(tokio_handle, None, PoolConfig::resolve(fragments))
  }

  /// Creates a pool with a pool-wide handler, used for plain values passed to
  /// [`submit`](Self::submit) and for items that carry no handler of their own.
  pub fn with_handler<F, Fut, I>(tokio_handle: TokioHandle, handler: F, fragments: I) -> Arc<Self>
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
    I: IntoIterator,
    I::Item: Into<Option<PoolConfig>>,
  {
    Self::build(tokio_handle, Some(share_handler(handler)), PoolConfig::resolve(fragments))
  }

  fn build(tokio_handle: TokioHandle, default_handler: Option<SharedHandler<T>>, config: ResolvedConfig) -> Arc<Self> {
    let (queue_tx, queue_rx) = match config.queue_slots() {
      Some(slots) => kanal::bounded_async(slots),
      None => kanal::unbounded_async(),
    };
    let pool_name = Arc::new(config.name.clone().unwrap_or_else(next_default_name));
    let worker_count = config.worker_count;
    let stop_token = CancellationToken::new();
    let outstanding = Arc::new(Outstanding::new());
    let worker_states: WorkerStates = Arc::new(DashMap::with_capacity(worker_count));
    let has_default_handler = default_handler.is_some();

    let mut join_handles = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
      worker_states.insert(id, WorkerState::Idle);
      let worker = Worker {
        id,
        pool_name: pool_name.clone(),
        queue_rx: queue_rx.clone(),
        default_handler: default_handler.clone(),
        stop_token: stop_token.clone(),
        states: worker_states.clone(),
      };
      join_handles.push(worker.spawn(&tokio_handle));
    }

    // Whoever fires the token (stop, a handler, a StopHandle, Drop), the queue
    // gets closed so deliveries blocked on a full queue are released. Closing
    // drops every queued message, and with it the message's ticket.
    let closer_token = stop_token.clone();
    let closer_rx = queue_rx;
    tokio_handle.spawn(
      async move {
        closer_token.cancelled().await;
        let _ = closer_rx.close();
        debug!("Stop signal observed. Work queue closed.");
      }
      .instrument(info_span!("pool_queue_closer", pool_name = %*pool_name)),
    );

    info!(
      pool_name = %*pool_name,
      worker_count,
      queue_capacity = ?config.queue_capacity,
      has_default_handler,
      "Worker pool created."
    );

    Arc::new(Self {
      pool_name,
      worker_count,
      tokio_handle,
      queue_tx,
      has_default_handler,
      outstanding,
      stop_token,
      worker_states,
      worker_join_handles: Mutex::new(join_handles),
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  /// Items submitted but not yet finished.
  pub fn outstanding(&self) -> usize {
    self.outstanding.get()
  }

  /// Items sitting in the shared queue.
  pub fn queued_count(&self) -> usize {
    self.queue_tx.len()
  }

  /// Workers currently executing a handler.
  pub fn active_count(&self) -> usize {
    self
      .worker_states
      .iter()
      .filter(|entry| *entry.value() == WorkerState::Running)
      .count()
  }

  pub fn worker_state(&self, worker_id: usize) -> Option<WorkerState> {
    self.worker_states.get(&worker_id).map(|entry| *entry.value())
  }

  pub fn is_stopped(&self) -> bool {
    self.stop_token.is_cancelled()
  }

  pub fn stop_handle(&self) -> StopHandle {
    StopHandle {
      pool_name: self.pool_name.clone(),
      stop_token: self.stop_token.clone(),
    }
  }

  /// Submits a value for the pool-wide handler.
  ///
  /// # Errors
  /// `PoolError::MissingHandler` if the pool was created without a handler.
  /// `PoolError::PoolStopped` if the pool has been stopped.
  pub fn submit(&self, payload: T) -> Result<(), PoolError> {
    if !self.has_default_handler {
      warn!(pool_name = %*self.pool_name, "Submit: value submitted to a pool without a default handler.");
      return Err(PoolError::MissingHandler(self.pool_name.to_string()));
    }
    self.enqueue(WorkItem::new(payload))
  }

  /// Submits an item. Items without their own handler use the pool-wide one.
  ///
  /// # Errors
  /// Same as [`submit`](Self::submit).
  pub fn submit_item(&self, item: WorkItem<T>) -> Result<(), PoolError> {
    if !item.has_handler() && !self.has_default_handler {
      warn!(pool_name = %*self.pool_name, "Submit: item has no handler and the pool has no default handler.");
      return Err(PoolError::MissingHandler(self.pool_name.to_string()));
    }
    self.enqueue(item)
  }

  fn enqueue(&self, item: WorkItem<T>) -> Result<(), PoolError> {
    if self.stop_token.is_cancelled() || self.queue_tx.is_closed() {
      warn!(pool_name = %*self.pool_name, "Submit: pool is stopped, rejecting work.");
      return Err(PoolError::PoolStopped(self.pool_name.to_string()));
    }

    let message = QueueMessage {
      item,
      ticket: self.outstanding.issue(),
    };

    let queue_tx = self.queue_tx.clone();
    let pool_name = self.pool_name.clone();
    self.tokio_handle.spawn(async move {
      // On failure the channel drops the message, which returns its ticket.
      match queue_tx.send(message).await {
        Ok(()) => trace!(pool_name = %*pool_name, "Item delivered to work queue."),
        Err(send_error) => debug!(
          pool_name = %*pool_name,
          "Delivery failed because the queue closed: {:?}. Item dropped.",
          send_error
        ),
      }
    });
    Ok(())
  }

  /// Resolves when every submitted item has finished or the pool has been
  /// stopped, whichever comes first.
  ///
  /// There is no timeout; wrap the call in `tokio::time::timeout` if
  /// submissions may continue indefinitely.
  pub async fn wait(&self) -> WaitOutcome {
    let outcome = tokio::select! {
      biased;
      _ = self.stop_token.cancelled() => WaitOutcome::Stopped,
      _ = self.outstanding.wait_idle() => {
        if self.stop_token.is_cancelled() {
          WaitOutcome::Stopped
        } else {
          WaitOutcome::Completed
        }
      }
    };
    debug!(pool_name = %*self.pool_name, ?outcome, "Wait finished.");
    outcome
  }

  /// Blocks the current thread on [`wait`](Self::wait).
  ///
  /// Must not be called from inside an async context; use `wait().await` there.
  pub fn wait_blocking(&self) -> WaitOutcome {
    futures::executor::block_on(self.wait())
  }

  /// Stops every worker. Idle workers exit at once; running handlers finish
  /// their current item first. Items still queued are never run. Calling this
  /// more than once has no further effect.
  pub fn stop(&self) {
    if !self.stop_token.is_cancelled() {
      info!(pool_name = %*self.pool_name, "Stopping pool.");
    } else {
      trace!(pool_name = %*self.pool_name, "Stop: pool already stopped.");
    }
    self.stop_token.cancel();
    let _ = self.queue_tx.close();
  }

  /// Stops the pool and waits for every worker task to exit.
  pub async fn shutdown(&self) {
    self.stop();

    let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.worker_join_handles.lock());
    if handles.is_empty() {
      trace!(pool_name = %*self.pool_name, "Shutdown: worker handles already joined.");
      return;
    }

    info!(pool_name = %*self.pool_name, "Waiting for {} workers to exit.", handles.len());
    for handle in handles {
      if let Err(join_error) = handle.await {
        error!(pool_name = %*self.pool_name, "Error joining worker: {:?}", join_error);
      }
    }
    info!(pool_name = %*self.pool_name, "All workers exited.");
  }
}

impl<T: Send + 'static> fmt::Debug for WorkerPool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("name", &self.pool_name)
      .field("worker_count", &self.worker_count)
      .field("outstanding", &self.outstanding.get())
      .field("queued", &self.queue_tx.len())
      .field("stopped", &self.stop_token.is_cancelled())
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
  fn drop(&mut self) {
    if !self.stop_token.is_cancelled() {
      info!(pool_name = %*self.pool_name, "WorkerPool dropped. Signalling workers to stop.");
      self.stop_token.cancel();
      let _ = self.queue_tx.close();
    }
  }
}

fn next_default_name() -> String {
  let id = NEXT_POOL_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
  format!("worker_pool_{}", id)
}
