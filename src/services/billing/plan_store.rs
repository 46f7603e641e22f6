use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::{BillingError, PlanReader};
use crate::db::user_repository::UserRepository;
use crate::models::{
    plan::{BillingInterval, PlanTier},
    user::PlanAssignment,
};

#[derive(Clone)]
pub struct PlanStore {
    users: Arc<dyn UserRepository>,
    reader: PlanReader,
}

impl PlanStore {
    pub fn new(users: Arc<dyn UserRepository>, reader: PlanReader) -> Self {
        Self { users, reader }
    }

    /// Uncached read. Users without a row or without a plan are on `free`.
    pub async fn get_plan(&self, user_id: Uuid) -> Result<PlanAssignment, BillingError> {
        match self.users.find_user_by_id(user_id).await? {
            Some(user) => Ok(user.plan_assignment()?),
            None => Ok(PlanAssignment::default()),
        }
    }

    pub async fn set_plan(
        &self,
        user_id: Uuid,
        plan: &str,
        billing_interval: Option<&str>,
    ) -> Result<PlanAssignment, BillingError> {
        let tier: PlanTier = plan
            .parse()
            .map_err(|_| BillingError::InvalidPlan(plan.to_string()))?;

        let interval = match billing_interval {
            None => None,
            Some(raw) => Some(
                raw.parse::<BillingInterval>()
                    .map_err(|e| BillingError::InvalidRequest(e.to_string()))?,
            ),
        };
        let interval = match (tier.is_paid(), interval) {
            (false, _) => None,
            (true, Some(BillingInterval::None)) => {
                return Err(BillingError::InvalidRequest(
                    "paid plans need a monthly or yearly interval".into(),
                ))
            }
            (true, interval) => interval,
        };

        self.users
            .update_user_plan(user_id, tier, interval)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => BillingError::Unauthorized,
                other => BillingError::Database(other),
            })?;
        self.reader.invalidate(user_id);

        info!(%user_id, plan = %tier, "plan set directly");
        self.get_plan(user_id).await
    }
}
