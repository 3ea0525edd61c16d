use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::sleep;

use crate::engine;
use crate::state::AppState;

/// Spawns the periodic drivers: a minute-granularity tick for session
/// status and attendance reconciliation, and a daily tick for billing.
/// The daily tick also fires once at startup so a restarted process
/// catches up on anything that came due while it was down.
pub async fn start_background_workers(state: AppState) {
    tokio::spawn(async move {
        let minute = Duration::from_secs(60);
        let day = Duration::from_secs(86_400);

        let mut last_minute: Option<std::time::Instant> = None;
        let mut last_daily: Option<std::time::Instant> = None;

        loop {
            let now = OffsetDateTime::now_utc();

            let minute_due = match last_minute {
                None => true,
                Some(at) => at.elapsed() >= minute,
            };
            if minute_due {
                engine::tick_minute(&state, now).await;
                last_minute = Some(std::time::Instant::now());
            }

            let daily_due = match last_daily {
                None => true,
                Some(at) => at.elapsed() >= day,
            };
            if daily_due {
                engine::tick_daily(&state, now).await;
                last_daily = Some(std::time::Instant::now());
            }

            sleep(Duration::from_secs(5)).await;
        }
    });
}
