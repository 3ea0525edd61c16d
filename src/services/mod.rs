pub mod meetings;
pub mod notifier;
pub mod payment;
