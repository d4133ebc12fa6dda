use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Run `op` until it succeeds or `attempts` tries are spent, sleeping
/// `delay` between failures. The final error comes back unchanged. Wrap
/// idempotent stages only; nothing inside the pipeline retries itself.
pub async fn with_retries<T, E, F, Fut>(
    label: &str,
    attempts: usize,
    delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(label, attempt, error = %err, "attempt failed, retrying");
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
