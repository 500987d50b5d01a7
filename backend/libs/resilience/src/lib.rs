/// Resilience helpers shared by the batch jobs
///
/// - **Retry**: flat policy, fixed attempt budget and fixed delay between attempts
/// - **Timeout**: enforces a time limit on a single external call
///
/// # Example: retrying an outbound call
///
/// ```rust,no_run
/// use resilience::{with_retry, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::new(10, Duration::from_secs(6));
///
///     let result = with_retry(&config, |attempt| async move {
///         // Your HTTP call here
///         Ok::<_, String>(attempt)
///     })
///     .await;
/// }
/// ```

pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, TimeoutError};
