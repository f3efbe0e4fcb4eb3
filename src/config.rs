/// Upper bound on preallocated queue slots. The channel reserves every slot up
/// front, so larger requests are clamped to this value.
pub const MAX_QUEUE_SLOTS: usize = 1 << 16;

/// Capacity of the shared queue that sits between submitters and workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
  /// One slot per worker.
  MatchWorkers,
  /// A fixed number of slots, clamped to [`MAX_QUEUE_SLOTS`]. Zero gives a
  /// rendezvous queue where every delivery waits for an idle worker.
  Bounded(usize),
  /// No capacity limit; deliveries never wait.
  Unbounded,
}

/// A configuration fragment for a `WorkerPool`.
///
/// Every field is optional. Fragments are merged with [`PoolConfig::resolve`],
/// where later fragments override earlier ones field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolConfig {
  /// Number of workers to spawn. `None` or `Some(0)` falls back to the
  /// number of logical CPUs.
  pub worker_count: Option<usize>,
  pub queue_capacity: Option<QueueCapacity>,
  pub name: Option<String>,
}

impl PoolConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_worker_count(mut self, worker_count: usize) -> Self {
    self.worker_count = Some(worker_count);
    self
  }

  pub fn with_queue_capacity(mut self, capacity: QueueCapacity) -> Self {
    self.queue_capacity = Some(capacity);
    self
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Merges configuration fragments into a fully resolved configuration.
  ///
  /// Absent fragments are skipped. For each field the last fragment that sets
  /// it wins; a worker count of zero counts as unset.
  pub fn resolve<I>(fragments: I) -> ResolvedConfig
  where
    I: IntoIterator,
    I::Item: Into<Option<PoolConfig>>,
  {
    let mut worker_count = None;
    let mut queue_capacity = None;
    let mut name = None;

    for fragment in fragments {
      let Some(fragment): Option<PoolConfig> = fragment.into() else {
        continue;
      };
      if let Some(count) = fragment.worker_count.filter(|count| *count > 0) {
        worker_count = Some(count);
      }
      if fragment.queue_capacity.is_some() {
        queue_capacity = fragment.queue_capacity;
      }
      if fragment.name.is_some() {
        name = fragment.name;
      }
    }

    ResolvedConfig {
      worker_count: worker_count.unwrap_or_else(default_worker_count),
      queue_capacity: queue_capacity.unwrap_or(QueueCapacity::MatchWorkers),
      name,
    }
  }
}

/// The outcome of merging `PoolConfig` fragments. `worker_count` is always at
/// least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
  pub worker_count: usize,
  pub queue_capacity: QueueCapacity,
  pub name: Option<String>,
}

impl ResolvedConfig {
  /// Slot count for the shared queue, `None` when unbounded. Never more than
  /// [`MAX_QUEUE_SLOTS`].
  pub fn queue_slots(&self) -> Option<usize> {
    let slots = match self.queue_capacity {
      QueueCapacity::MatchWorkers => self.worker_count,
      QueueCapacity::Bounded(slots) => slots,
      QueueCapacity::Unbounded => return None,
    };
    Some(slots.min(MAX_QUEUE_SLOTS))
  }
}

/// Host parallelism, never less than one.
pub fn default_worker_count() -> usize {
  num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_without_fragments_uses_host_parallelism() {
    let resolved = PoolConfig::resolve(Vec::<PoolConfig>::new());
    assert_eq!(resolved.worker_count, num_cpus::get().max(1));
    assert_eq!(resolved.queue_capacity, QueueCapacity::MatchWorkers);
    assert_eq!(resolved.name, None);
  }

  #[test]
  fn test_resolve_last_positive_worker_count_wins() {
    let resolved = PoolConfig::resolve([
      Some(PoolConfig::new().with_worker_count(3)),
      None,
      Some(PoolConfig::new().with_worker_count(7)),
      Some(PoolConfig::new().with_name("later")),
    ]);
    assert_eq!(resolved.worker_count, 7);
    assert_eq!(resolved.name.as_deref(), Some("later"));
  }

  #[test]
  fn test_resolve_skips_zero_worker_count() {
    let resolved = PoolConfig::resolve([
      PoolConfig::new().with_worker_count(2),
      PoolConfig::new().with_worker_count(0),
    ]);
    assert_eq!(resolved.worker_count, 2);

    let only_zero = PoolConfig::resolve([PoolConfig::new().with_worker_count(0)]);
    assert_eq!(only_zero.worker_count, default_worker_count());
  }

  #[test]
  fn test_resolve_is_deterministic_for_named_fragments() {
    let fragments = vec![
      Some(PoolConfig::new().with_worker_count(4).with_name("batch")),
      Some(PoolConfig::new().with_queue_capacity(QueueCapacity::Unbounded)),
    ];
    let first = PoolConfig::resolve(fragments.clone());
    let second = PoolConfig::resolve(fragments);
    assert_eq!(first, second);
    assert_eq!(first.queue_slots(), None);
  }

  #[test]
  fn test_queue_slots_follow_capacity_mode() {
    let matched = PoolConfig::resolve([PoolConfig::new().with_worker_count(5)]);
    assert_eq!(matched.queue_slots(), Some(5));

    let fixed = PoolConfig::resolve([PoolConfig::new()
      .with_worker_count(5)
      .with_queue_capacity(QueueCapacity::Bounded(0))]);
    assert_eq!(fixed.queue_slots(), Some(0));
  }

  #[test]
  fn test_queue_slots_are_clamped() {
    let huge = PoolConfig::resolve([PoolConfig::new()
      .with_worker_count(2)
      .with_queue_capacity(QueueCapacity::Bounded(usize::MAX / 64))]);
    assert_eq!(huge.queue_slots(), Some(MAX_QUEUE_SLOTS));

    let at_limit = PoolConfig::resolve([PoolConfig::new().with_queue_capacity(QueueCapacity::Bounded(MAX_QUEUE_SLOTS))]);
    assert_eq!(at_limit.queue_slots(), Some(MAX_QUEUE_SLOTS));
  }
}
