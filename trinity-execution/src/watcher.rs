use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, warn};
use trinity_instrument::ExchangeId;

use crate::error::AdapterError;

const POLL_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Drives a funding-rate poll loop with exponential backoff on failure.
///
/// `poll` performs one polling cycle (batch or per-symbol, caller's choice) and reports
/// success/failure. On success the loop sleeps [`POLL_INTERVAL`] and the failure counter resets.
/// On failure the loop backs off, doubling from [`INITIAL_BACKOFF`] up to [`MAX_BACKOFF`]; the
/// first three failures log at WARNING, then every tenth failure escalates to ERROR so a stuck
/// venue doesn't silently scroll off the log. The loop never terminates on its own — only a
/// `shutdown` signal ends it, since a lapsed funding cache must never be treated as "the watcher
/// gave up permanently".
pub async fn run_with_backoff<F, Fut>(
    exchange: ExchangeId,
    mut shutdown: watch::Receiver<bool>,
    mut poll: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AdapterError>>,
{
    let mut consecutive_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match poll().await {
            Ok(()) => {
                consecutive_failures = 0;
                if wait_or_shutdown(POLL_INTERVAL, &mut shutdown).await {
                    return;
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                let backoff = next_backoff(consecutive_failures);

                if consecutive_failures <= 3 || consecutive_failures % 10 == 0 {
                    if consecutive_failures <= 3 {
                        warn!(%exchange, %err, consecutive_failures, backoff_secs = backoff.as_secs(), "funding watcher poll failed");
                    } else {
                        error!(%exchange, %err, consecutive_failures, backoff_secs = backoff.as_secs(), "funding watcher still failing");
                    }
                }

                if wait_or_shutdown(backoff, &mut shutdown).await {
                    return;
                }
            }
        }
    }
}

/// Backoff for the Nth consecutive failure (1-indexed): `5 * 2^min(n-1, 5)`, capped at 60s.
fn next_backoff(consecutive_failures: u32) -> Duration {
    let exponent = (consecutive_failures.saturating_sub(1)).min(5);
    let scaled = INITIAL_BACKOFF * 2u32.pow(exponent);
    scaled.min(MAX_BACKOFF)
}

/// Sleep for `duration`, waking early if shutdown fires. Returns `true` if shutdown fired.
async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps_at_60s() {
        assert_eq!(next_backoff(1), Duration::from_secs(5));
        assert_eq!(next_backoff(2), Duration::from_secs(10));
        assert_eq!(next_backoff(3), Duration::from_secs(20));
        assert_eq!(next_backoff(4), Duration::from_secs(40));
        assert_eq!(next_backoff(5), Duration::from_secs(60));
        assert_eq!(next_backoff(6), Duration::from_secs(60));
        assert_eq!(next_backoff(100), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_shutdown_signal() {
        let (tx, rx) = watch::channel(false);
        let mut calls = 0u32;

        let handle = tokio::spawn(run_with_backoff(ExchangeId::Binance, rx, move || {
            calls += 1;
            async move { Ok(()) }
        }));

        tokio::time::advance(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher task should exit promptly after shutdown")
            .unwrap();
    }
}
