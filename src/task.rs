use crate::counter::Ticket;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

/// The future a handler produces. Resolves to `true` to keep the pool
/// running, or `false` to stop the whole pool.
pub type HandlerFuture = BoxFuture<'static, bool>;

/// A pool-wide handler, shared by every worker.
pub(crate) type SharedHandler<T> = Arc<dyn Fn(T) -> HandlerFuture + Send + Sync + 'static>;

type ItemHandler<T> = Box<dyn FnOnce(T) -> HandlerFuture + Send + 'static>;

/// One unit of work: a payload and, optionally, the logic that processes it.
///
/// An item without its own handler is processed by the pool-wide handler the
/// `WorkerPool` was created with.
pub struct WorkItem<T> {
  payload: T,
  handler: Option<ItemHandler<T>>,
}

impl<T: Send + 'static> WorkItem<T> {
  /// An item processed by the pool-wide handler.
  pub fn new(payload: T) -> Self {
    Self { payload, handler: None }
  }

  /// An item carrying its own handler.
  pub fn with_handler<F, Fut>(payload: T, handler: F) -> Self
  where
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
  {
    Self {
      payload,
      handler: Some(Box::new(move |payload| handler(payload).boxed())),
    }
  }

  pub fn payload(&self) -> &T {
    &self.payload
  }

  pub fn has_handler(&self) -> bool {
    self.handler.is_some()
  }

  /// Binds the payload to its handler, falling back to `default_handler`.
  /// Returns `None` when neither is available.
  pub(crate) fn into_future(self, default_handler: Option<&SharedHandler<T>>) -> Option<HandlerFuture> {
    match (self.handler, default_handler) {
      (Some(handler), _) => Some(handler(self.payload)),
      (None, Some(default_handler)) => Some(default_handler(self.payload)),
      (None, None) => None,
    }
  }
}

impl WorkItem<()> {
  /// A closure-only item with no payload.
  pub fn from_fn<F, Fut>(work: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
  {
    Self::with_handler((), move |()| work())
  }
}

impl<T: fmt::Debug> fmt::Debug for WorkItem<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkItem")
      .field("payload", &self.payload)
      .field("has_handler", &self.handler.is_some())
      .finish()
  }
}

/// What travels through the shared queue: an item paired with the ticket that
/// accounts for it. Dropping the message anywhere gives the count back.
pub(crate) struct QueueMessage<T> {
  pub(crate) item: WorkItem<T>,
  pub(crate) ticket: Ticket,
}

impl<T: fmt::Debug> fmt::Debug for QueueMessage<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueMessage")
      .field("item", &self.item)
      .finish_non_exhaustive()
  }
}

/// Wraps an async closure into the pool-wide handler representation.
pub(crate) fn share_handler<T, F, Fut>(handler: F) -> SharedHandler<T>
where
  T: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = bool> + Send + 'static,
{
  Arc::new(move |payload| handler(payload).boxed())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn test_own_handler_takes_precedence() {
    let default_calls = Arc::new(AtomicUsize::new(0));
    let default_handler = {
      let default_calls = default_calls.clone();
      share_handler(move |_: u32| {
        let default_calls = default_calls.clone();
        async move {
          default_calls.fetch_add(1, Ordering::SeqCst);
          true
        }
      })
    };

    let item = WorkItem::with_handler(7u32, |n| async move { n != 7 });
    assert!(item.has_handler());
    let keep_going = item.into_future(Some(&default_handler)).unwrap().await;

    assert!(!keep_going);
    assert_eq!(default_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_falls_back_to_default_handler() {
    let default_handler = share_handler(|n: u32| async move { n % 2 == 0 });
    let item = WorkItem::new(4u32);
    assert_eq!(*item.payload(), 4);
    assert!(item.into_future(Some(&default_handler)).unwrap().await);
  }

  #[test]
  fn test_no_handler_available() {
    let item = WorkItem::new("orphan");
    assert!(!item.has_handler());
    assert!(item.into_future(None).is_none());
  }

  #[tokio::test]
  async fn test_from_fn_runs_closure() {
    let hits = Arc::new(AtomicUsize::new(0));
    let item = {
      let hits = hits.clone();
      WorkItem::from_fn(move || async move {
        hits.fetch_add(1, Ordering::SeqCst);
        true
      })
    };
    assert!(item.into_future(None).unwrap().await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }
}
