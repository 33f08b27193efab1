/// Resilience helpers shared by backend services
///
/// - **Backoff**: exponential delay schedule (`initial * multiplier^attempt`),
///   optionally capped and jittered
/// - **Timeout**: bounded execution of outbound calls, keeping the inner error
///
/// # Example: redelivery delay for a retry topic
///
/// ```rust
/// use resilience::BackoffConfig;
/// use std::time::Duration;
///
/// let backoff = BackoffConfig {
///     initial_delay: Duration::from_millis(1000),
///     multiplier: 2.0,
///     ..Default::default()
/// };
///
/// assert_eq!(backoff.delay_for(0), Duration::from_millis(1000));
/// assert_eq!(backoff.delay_for(2), Duration::from_millis(4000));
/// ```
///
/// # Example: HTTP call with a deadline
///
/// ```rust,no_run
/// use resilience::timeout::with_deadline;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_deadline(Duration::from_secs(2), async {
///         // Your outbound request
///         Ok::<_, String>(())
///     })
///     .await;
///
///     if let Err(e) = result {
///         eprintln!("call failed: {}", e);
///     }
/// }
/// ```

pub mod backoff;
pub mod timeout;

pub use backoff::{Backoff, BackoffConfig, BackoffError};
pub use timeout::{with_deadline, with_timeout, Elapsed, TimeoutError};
