pub mod attendance;
pub mod error;
pub mod lifecycle;
pub mod quota;
pub mod renewal;

#[cfg(test)]
mod tests;

pub use error::EngineError;

use time::OffsetDateTime;

use crate::state::AppState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MinuteTickReport {
    pub activated: usize,
    pub auto_completed: usize,
    pub reconciled: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DailyTickReport {
    pub renewal: renewal::RenewalReport,
    pub suspended: usize,
    pub expired: u64,
}

/// Minute-granularity entry point: activate due sessions, auto-complete
/// overruns, reconcile attendance. Each sweep is isolated so one failing
/// step never starves the others.
pub async fn tick_minute(state: &AppState, now: OffsetDateTime) -> MinuteTickReport {
    let mut report = MinuteTickReport::default();

    match lifecycle::activate_due(state, now).await {
        Ok(n) => report.activated = n,
        Err(err) => tracing::error!(error = %err, "activation sweep failed"),
    }
    match lifecycle::auto_complete_overrun(state, now).await {
        Ok(n) => report.auto_completed = n,
        Err(err) => tracing::error!(error = %err, "auto-completion sweep failed"),
    }
    match attendance::reconcile(state, now).await {
        Ok(n) => report.reconciled = n,
        Err(err) => tracing::error!(error = %err, "attendance reconciliation failed"),
    }

    if report != MinuteTickReport::default() {
        tracing::info!(
            activated = report.activated,
            auto_completed = report.auto_completed,
            reconciled = report.reconciled,
            "minute tick"
        );
    }
    report
}

/// Daily entry point: process due renewals, expire grace periods, expire
/// lapsed subscriptions.
pub async fn tick_daily(state: &AppState, now: OffsetDateTime) -> DailyTickReport {
    let mut report = DailyTickReport::default();

    match renewal::process_due(state, now).await {
        Ok(r) => report.renewal = r,
        Err(err) => tracing::error!(error = %err, "renewal pass failed"),
    }
    match renewal::expire_grace(state, now).await {
        Ok(n) => report.suspended = n,
        Err(err) => tracing::error!(error = %err, "grace expiry pass failed"),
    }
    match renewal::expire_lapsed(state, now).await {
        Ok(n) => report.expired = n,
        Err(err) => tracing::error!(error = %err, "lapse expiry pass failed"),
    }

    tracing::info!(
        attempted = report.renewal.attempted,
        renewed = report.renewal.renewed,
        graced = report.renewal.graced,
        suspended = report.suspended,
        expired = report.expired,
        "daily tick"
    );
    report
}
