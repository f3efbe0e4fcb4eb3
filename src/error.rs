use thiserror::Error;

/// Errors that can occur when handing work to a `WorkerPool`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool '{0}' has been stopped and no longer accepts work")]
  PoolStopped(String),

  #[error("Work item has no handler and pool '{0}' was created without a default handler")]
  MissingHandler(String),
}
