use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use super::{NotificationKind, Notifier, NotifyError};

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub recipient: Uuid,
    pub context: serde_json::Value,
}

#[derive(Default)]
pub struct MockNotifier {
    pub sent: Mutex<Vec<SentNotification>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_of_kind(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: Uuid,
        context: serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(SentNotification {
            kind,
            recipient,
            context,
        });
        Ok(())
    }
}
