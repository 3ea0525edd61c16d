use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use super::{MeetingError, MeetingProvider};

#[derive(Default)]
pub struct MockMeetingProvider {
    pub created: Mutex<Vec<Uuid>>,
    pub closed: Mutex<Vec<Uuid>>,
    pub fail_create: bool,
}

impl MockMeetingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MeetingProvider for MockMeetingProvider {
    async fn create_room(&self, session_id: Uuid) -> Result<String, MeetingError> {
        if self.fail_create {
            return Err(MeetingError::Rejected("room quota exceeded".into()));
        }
        self.created.lock().unwrap().push(session_id);
        Ok(format!("room-{session_id}"))
    }

    async fn close_room(&self, session_id: Uuid) -> Result<(), MeetingError> {
        self.closed.lock().unwrap().push(session_id);
        Ok(())
    }
}
