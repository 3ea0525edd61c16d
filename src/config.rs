use std::env;

/// Attendance and lifecycle policy knobs. All durations are minutes unless
/// noted. Defaults mirror the academy settings these used to live in.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Joins later than this after the scheduled start classify as late.
    pub late_grace_minutes: i64,
    /// Total tracked time below this classifies as absent.
    pub min_present_minutes: i64,
    /// Leaving earlier than this before session end classifies as left-early.
    pub leave_early_minutes: i64,
    /// Overrun buffer before the sweep auto-completes a live session.
    pub overrun_buffer_minutes: i64,
    /// How long after completion unfinalized attendance waits before the
    /// reconciliation job synthesizes a closing leave event.
    pub reconcile_after_minutes: i64,
    /// First retry delay after a failed renewal charge; doubles per attempt.
    pub retry_backoff_hours: i64,
    /// Consecutive charge failures tolerated before entering grace.
    pub max_renewal_attempts: i32,
    pub grace_period_days: i64,
}

impl Policy {
    pub fn late_grace(&self) -> time::Duration {
        time::Duration::minutes(self.late_grace_minutes)
    }

    pub fn min_present(&self) -> time::Duration {
        time::Duration::minutes(self.min_present_minutes)
    }

    pub fn leave_early(&self) -> time::Duration {
        time::Duration::minutes(self.leave_early_minutes)
    }

    pub fn overrun_buffer(&self) -> time::Duration {
        time::Duration::minutes(self.overrun_buffer_minutes)
    }

    pub fn reconcile_after(&self) -> time::Duration {
        time::Duration::minutes(self.reconcile_after_minutes)
    }

    pub fn grace_period(&self) -> time::Duration {
        time::Duration::days(self.grace_period_days)
    }

    /// Backoff before retry N (1-based): base, then doubled each attempt.
    pub fn retry_backoff(&self, attempt: i32) -> time::Duration {
        let doublings = attempt.saturating_sub(1).clamp(0, 16) as u32;
        time::Duration::hours(self.retry_backoff_hours << doublings)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            late_grace_minutes: 15,
            min_present_minutes: 5,
            leave_early_minutes: 10,
            overrun_buffer_minutes: 10,
            reconcile_after_minutes: 30,
            retry_backoff_hours: 24,
            max_renewal_attempts: 3,
            grace_period_days: 3,
        }
    }
}

pub struct Config {
    pub database_url: String,
    /// Shared secret for inbound webhook signatures.
    pub webhook_secret: String,
    pub allowed_origin: String,
    pub payment_gateway_url: String,
    pub payment_gateway_key: String,
    pub meeting_provider_url: String,
    pub meeting_provider_key: String,
    pub notifier_url: String,
    pub notifier_key: String,
    pub policy: Policy,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let webhook_secret = env::var("WEBHOOK_SECRET").expect("WEBHOOK_SECRET must be set");
        let allowed_origin =
            env::var("ALLOWED_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let payment_gateway_url =
            env::var("PAYMENT_GATEWAY_URL").expect("PAYMENT_GATEWAY_URL must be set");
        let payment_gateway_key =
            env::var("PAYMENT_GATEWAY_KEY").expect("PAYMENT_GATEWAY_KEY must be set");
        let meeting_provider_url =
            env::var("MEETING_PROVIDER_URL").expect("MEETING_PROVIDER_URL must be set");
        let meeting_provider_key =
            env::var("MEETING_PROVIDER_KEY").expect("MEETING_PROVIDER_KEY must be set");
        let notifier_url = env::var("NOTIFIER_URL").expect("NOTIFIER_URL must be set");
        let notifier_key = env::var("NOTIFIER_KEY").unwrap_or_default();

        let defaults = Policy::default();
        let policy = Policy {
            late_grace_minutes: env_i64("LATE_GRACE_MINUTES", defaults.late_grace_minutes),
            min_present_minutes: env_i64("MIN_PRESENT_MINUTES", defaults.min_present_minutes),
            leave_early_minutes: env_i64("LEAVE_EARLY_MINUTES", defaults.leave_early_minutes),
            overrun_buffer_minutes: env_i64(
                "OVERRUN_BUFFER_MINUTES",
                defaults.overrun_buffer_minutes,
            ),
            reconcile_after_minutes: env_i64(
                "RECONCILE_AFTER_MINUTES",
                defaults.reconcile_after_minutes,
            ),
            retry_backoff_hours: env_i64("RENEWAL_BACKOFF_HOURS", defaults.retry_backoff_hours),
            max_renewal_attempts: env_i64(
                "MAX_RENEWAL_ATTEMPTS",
                defaults.max_renewal_attempts as i64,
            ) as i32,
            grace_period_days: env_i64("GRACE_PERIOD_DAYS", defaults.grace_period_days),
        };

        Config {
            database_url,
            webhook_secret,
            allowed_origin,
            payment_gateway_url,
            payment_gateway_key,
            meeting_provider_url,
            meeting_provider_key,
            notifier_url,
            notifier_key,
            policy,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}
