use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockStripeEventLogRepository {
    events: Arc<Mutex<HashMap<String, String>>>,
    pub checks: Arc<Mutex<usize>>,
    pub inserts: Arc<Mutex<usize>>,
    pub fail_checks: bool,
}

impl MockStripeEventLogRepository {
    pub fn outcome_for(&self, event_id: &str) -> Option<String> {
        self.events.lock().unwrap().get(event_id).cloned()
    }
}

#[async_trait]
impl StripeEventLogRepository for MockStripeEventLogRepository {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        *self.checks.lock().unwrap() += 1;
        if self.fail_checks {
            return Err(sqlx::Error::Protocol("Mock event log failure".into()));
        }
        Ok(self.events.lock().unwrap().contains_key(event_id))
    }

    async fn record_event(
        &self,
        event_id: &str,
        _event_type: &str,
        outcome: &str,
    ) -> Result<(), sqlx::Error> {
        *self.inserts.lock().unwrap() += 1;
        self.events
            .lock()
            .unwrap()
            .entry(event_id.to_string())
            .or_insert_with(|| outcome.to_string());
        Ok(())
    }
}
