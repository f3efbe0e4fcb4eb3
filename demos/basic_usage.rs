use fanout_pool::{PoolConfig, WaitOutcome, WorkItem, WorkerPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn checksum(id: u64, delay_ms: u64) -> u64 {
  info!("Item {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  id * id
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let total = Arc::new(AtomicU64::new(0));
  let pool = {
    let total = total.clone();
    WorkerPool::with_handler(
      Handle::current(),
      move |id: u64| {
        let total = total.clone();
        async move {
          let sum = checksum(id, 100 + (id % 3) * 100).await;
          total.fetch_add(sum, Ordering::SeqCst);
          true
        }
      },
      [PoolConfig::new().with_worker_count(2).with_name("basic_pool")],
    )
  };

  for id in 0..5 {
    if let Err(e) = pool.submit(id) {
      tracing::error!("Failed to submit item {}: {}", id, e);
    }
  }

  // An item can also bring its own handler.
  let special_total = total.clone();
  pool
    .submit_item(WorkItem::with_handler(1000, move |id| async move {
      info!("Item {} handled by its own handler", id);
      special_total.fetch_add(1, Ordering::SeqCst);
      true
    }))
    .expect("pool is running");

  info!("All items submitted. Waiting...");
  match pool.wait().await {
    WaitOutcome::Completed => info!("All items finished. Total: {}", total.load(Ordering::SeqCst)),
    WaitOutcome::Stopped => info!("Pool stopped before all items finished."),
  }

  pool.shutdown().await;
  info!("--- Basic Usage Example End ---");
}
