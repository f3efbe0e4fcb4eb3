use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Count of submitted items that have not finished yet.
///
/// Submitters take a [`Ticket`] before an item is handed to the queue and the
/// ticket gives the count back when it is completed or dropped. Every
/// transition to zero wakes all tasks parked in [`Outstanding::wait_idle`].
#[derive(Debug, Default)]
pub(crate) struct Outstanding {
  count: AtomicUsize,
  idle: Notify,
}

impl Outstanding {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn get(&self) -> usize {
    self.count.load(AtomicOrdering::Acquire)
  }

  pub(crate) fn increment(&self) {
    self.count.fetch_add(1, AtomicOrdering::AcqRel);
  }

  /// Returns the count left after this completion.
  pub(crate) fn decrement(&self) -> usize {
    let previous = self
      .count
      .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |current| current.checked_sub(1))
      .unwrap_or_else(|_| {
        debug_assert!(false, "completion counter decremented below zero");
        0
      });
    let remaining = previous.saturating_sub(1);
    if previous > 0 && remaining == 0 {
      self.idle.notify_waiters();
    }
    remaining
  }

  /// Counts one more item and returns the ticket that will give it back.
  pub(crate) fn issue(self: &Arc<Self>) -> Ticket {
    self.increment();
    Ticket {
      outstanding: Some(self.clone()),
    }
  }

  /// Resolves once the count is observed at zero.
  ///
  /// The `Notified` future is armed before the count is read so a decrement
  /// landing between the read and the await is never missed.
  pub(crate) async fn wait_idle(&self) {
    loop {
      let notified = self.idle.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      if self.get() == 0 {
        return;
      }
      notified.await;
    }
  }
}

/// One unit of the outstanding count, travelling with its item.
///
/// The count is given back exactly once: by [`Ticket::complete`] after the
/// handler ran, or by `Drop` wherever the item is discarded instead (a failed
/// delivery, the queue being cleared on close, a worker discarding it after
/// stop).
#[derive(Debug)]
pub(crate) struct Ticket {
  outstanding: Option<Arc<Outstanding>>,
}

impl Ticket {
  /// Returns the count left after this completion.
  pub(crate) fn complete(mut self) -> usize {
    match self.outstanding.take() {
      Some(outstanding) => outstanding.decrement(),
      None => 0,
    }
  }
}

impl Drop for Ticket {
  fn drop(&mut self) {
    if let Some(outstanding) = self.outstanding.take() {
      outstanding.decrement();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_wait_idle_returns_immediately_at_zero() {
    let outstanding = Outstanding::new();
    tokio::time::timeout(Duration::from_millis(50), outstanding.wait_idle())
      .await
      .expect("wait_idle should not block when nothing is outstanding");
  }

  #[tokio::test]
  async fn test_wait_idle_wakes_on_last_decrement() {
    let outstanding = Arc::new(Outstanding::new());
    outstanding.increment();
    outstanding.increment();

    let waiter = {
      let outstanding = outstanding.clone();
      tokio::spawn(async move { outstanding.wait_idle().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(outstanding.decrement(), 1);
    assert!(!waiter.is_finished());
    assert_eq!(outstanding.decrement(), 0);

    tokio::time::timeout(Duration::from_millis(200), waiter)
      .await
      .expect("waiter should wake once the count reaches zero")
      .unwrap();
  }

  #[test]
  fn test_increment_and_decrement_track_count() {
    let outstanding = Outstanding::new();
    outstanding.increment();
    outstanding.increment();
    outstanding.increment();
    assert_eq!(outstanding.get(), 3);
    outstanding.decrement();
    assert_eq!(outstanding.get(), 2);
  }

  #[test]
  fn test_ticket_gives_back_count_exactly_once() {
    let outstanding = Arc::new(Outstanding::new());
    let completed = outstanding.issue();
    let dropped = outstanding.issue();
    let kept = outstanding.issue();
    assert_eq!(outstanding.get(), 3);

    assert_eq!(completed.complete(), 2);
    drop(dropped);
    assert_eq!(outstanding.get(), 1);

    let queue = vec![kept];
    drop(queue);
    assert_eq!(outstanding.get(), 0);
  }
}
