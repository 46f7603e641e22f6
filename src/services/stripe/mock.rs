use super::{
    CheckoutSession, CreateCheckoutSessionRequest, CreateCustomerRequest, StripeEvent,
    StripeService, StripeServiceError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Default)]
pub struct MockStripeService {
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub customer_requests: Arc<Mutex<Vec<CreateCustomerRequest>>>,
    pub fail_customers: bool,
    pub fail_checkout: bool,
    pub omit_checkout_url: bool,
    pub reject_signatures: bool,
    pub delay: Option<Duration>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the processor being unreachable for every API call.
    pub fn unreachable() -> Self {
        Self {
            fail_customers: true,
            fail_checkout: true,
            ..Default::default()
        }
    }

    pub fn customer_calls(&self) -> usize {
        self.customer_requests.lock().unwrap().len()
    }

    pub fn checkout_calls(&self) -> usize {
        self.last_create_requests.lock().unwrap().len()
    }
}

fn make_id(prefix: &str) -> String {
    format!("{}_{}", prefix, NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.last_create_requests.lock().unwrap().push(req);
        if self.fail_checkout {
            return Err(StripeServiceError::Api("connection refused".into()));
        }

        let session = CheckoutSession {
            id: make_id("cs_test"),
            url: (!self.omit_checkout_url).then(|| "https://example.test/checkout".to_string()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn create_customer(
        &self,
        req: CreateCustomerRequest,
    ) -> Result<String, StripeServiceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.customer_requests.lock().unwrap().push(req);
        if self.fail_customers {
            return Err(StripeServiceError::Api("connection refused".into()));
        }
        Ok(make_id("cus_test"))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if self.reject_signatures {
            return Err(StripeServiceError::Webhook("signature mismatch".into()));
        }
        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let id = match val.get("id").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => make_id("evt"),
        };
        let ty = val
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let created = val.get("created").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(StripeEvent {
            id,
            r#type: ty,
            created,
            payload: val,
        })
    }
}
