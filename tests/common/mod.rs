#![allow(dead_code)] // Each test binary uses a different subset of the helpers

pub mod builders;
pub mod handlers;
pub mod strategies;

pub use builders::*;
pub use handlers::*;

use std::time::Duration;

/// Poll `condition` until it holds or `timeout` elapsed
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
