use crate::config::Config;
use crate::db::{
    attendance_repository::AttendanceRepository, session_repository::SessionRepository,
    subscription_repository::SubscriptionRepository,
};
use crate::services::meetings::MeetingProvider;
use crate::services::notifier::Notifier;
use crate::services::payment::PaymentGateway;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub attendance: Arc<dyn AttendanceRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub meetings: Arc<dyn MeetingProvider>,
    pub config: Arc<Config>,
}
