use std::time::Duration;

use tokio::time;

pub use tokio::time::Instant;

/// Await `fut`, returning `None` if `dur` elapses first.
pub async fn timeout<F: std::future::Future>(dur: Duration, fut: F) -> Option<F::Output> {
    time::timeout(dur, fut).await.ok()
}

pub fn now() -> Instant {
    Instant::now()
}

pub async fn sleep(dur: Duration) {
    time::sleep(dur).await
}
