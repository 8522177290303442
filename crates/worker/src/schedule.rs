use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run `job` every `period` until `cancel` fires.
///
/// The first run happens immediately. A run that overruns its period delays
/// the next tick instead of bursting to catch up. Cancellation is observed
/// between runs, so an in-flight run always completes.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(job = name, period_secs = period.as_secs(), "Periodic job started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => job().await,
        }
    }

    tracing::info!(job = name, "Periodic job stopped");
}
