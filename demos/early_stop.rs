use fanout_pool::{PoolConfig, QueueCapacity, WaitOutcome, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

// Searches a range for the first multiple of 97 and stops the pool as soon
// as one worker finds it.
#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::new("info,fanout_pool=debug"))
    .with_target(false)
    .init();

  info!("--- Early Stop Example ---");

  let examined = Arc::new(AtomicUsize::new(0));
  let pool = {
    let examined = examined.clone();
    WorkerPool::with_handler(
      Handle::current(),
      move |candidate: u32| {
        let examined = examined.clone();
        async move {
          tokio::time::sleep(Duration::from_millis(10)).await;
          examined.fetch_add(1, Ordering::SeqCst);
          if candidate > 0 && candidate % 97 == 0 {
            info!("Found {}. Stopping the pool.", candidate);
            return false;
          }
          true
        }
      },
      [
        Some(PoolConfig::new().with_name("search_pool")),
        None,
        Some(
          PoolConfig::new()
            .with_worker_count(4)
            .with_queue_capacity(QueueCapacity::Unbounded),
        ),
      ],
    )
  };

  for candidate in 1..=1000 {
    pool.submit(candidate).expect("pool is running");
  }

  let outcome = pool.wait().await;
  info!(
    "Wait returned {:?} after examining {} of 1000 candidates ({} still outstanding).",
    outcome,
    examined.load(Ordering::SeqCst),
    pool.outstanding()
  );
  assert_eq!(outcome, WaitOutcome::Stopped);

  pool.shutdown().await;
  info!("--- Early Stop Example End ---");
}
