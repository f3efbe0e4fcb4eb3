use crate::task::{HandlerFuture, QueueMessage, SharedHandler, WorkItem};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

/// Lifecycle of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Waiting for an item or for the stop signal.
  Idle,
  /// Executing a handler.
  Running,
  /// Terminal. The loop has exited.
  Stopped,
}

pub(crate) type WorkerStates = Arc<DashMap<usize, WorkerState>>;

/// One execution slot pulling items from the shared queue.
pub(crate) struct Worker<T: Send + 'static> {
  pub(crate) id: usize,
  pub(crate) pool_name: Arc<String>,
  pub(crate) queue_rx: kanal::AsyncReceiver<QueueMessage<T>>,
  pub(crate) default_handler: Option<SharedHandler<T>>,
  pub(crate) stop_token: CancellationToken,
  pub(crate) states: WorkerStates,
}

impl<T: Send + 'static> Worker<T> {
  pub(crate) fn spawn(self, tokio_handle: &TokioHandle) -> JoinHandle<()> {
    let span = info_span!("pool_worker", pool_name = %*self.pool_name, worker_id = self.id);
    tokio_handle.spawn(self.run().instrument(span))
  }

  async fn run(self) {
    self.set_state(WorkerState::Idle);
    trace!("Worker started.");

    loop {
      let message = tokio::select! {
        biased;

        _ = self.stop_token.cancelled() => {
          debug!("Stop signal received while idle. Worker exiting.");
          break;
        }

        recv_result = self.queue_rx.recv() => match recv_result {
          Ok(message) => message,
          Err(_) => {
            debug!("Work queue closed. Worker exiting.");
            break;
          }
        },
      };

      if self.stop_token.is_cancelled() {
        debug!("Dequeued item after stop signal. Discarding it without running.");
        drop(message);
        break;
      }

      let QueueMessage { item, ticket } = message;
      self.set_state(WorkerState::Running);
      let keep_going = self.execute(item).await;
      if !keep_going {
        info!("Handler requested pool stop.");
        self.stop_token.cancel();
      }
      let remaining = ticket.complete();
      trace!(remaining, "Item finished.");

      if !keep_going {
        break;
      }
      self.set_state(WorkerState::Idle);
    }

    self.set_state(WorkerState::Stopped);
  }

  /// Runs the item's handler to completion. A panicking handler counts as
  /// finished and lets the pool continue.
  async fn execute(&self, item: WorkItem<T>) -> bool {
    let default_handler = self.default_handler.as_ref();
    let bound: Option<HandlerFuture> = match std::panic::catch_unwind(AssertUnwindSafe(|| item.into_future(default_handler))) {
      Ok(bound) => bound,
      Err(_panic_payload) => {
        error!("Handler panicked before producing its future.");
        return true;
      }
    };

    let Some(handler_future) = bound else {
      // `submit` rejects these; reaching here means the item slipped past validation.
      error!("Dequeued item has no handler and the pool has no default handler. Skipping.");
      return true;
    };

    match AssertUnwindSafe(handler_future).catch_unwind().await {
      Ok(keep_going) => keep_going,
      Err(_panic_payload) => {
        error!("Handler panicked during execution.");
        true
      }
    }
  }

  fn set_state(&self, state: WorkerState) {
    self.states.insert(self.id, state);
  }
}
