use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::user_repository::{CustomerIdWrite, NewUser, SubscriptionStateUpdate, UserRepository};
use crate::models::{
    plan::{BillingInterval, PlanTier},
    user::User,
};

const USER_COLUMNS: &str = r#"
    id, email, name, password_hash, plan, billing_interval, stripe_customer_id,
    subscription_id, subscription_status, subscription_state_at, past_due_since, created_at
"#;

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn is_email_taken(&self, email: &str) -> Result<bool, sqlx::Error> {
        let res = sqlx::query_scalar::<_, i32>("SELECT 1 FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(res.is_some())
    }

    async fn create_user(&self, new_user: NewUser<'_>) -> Result<User, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO users (id, email, name, password_hash, plan, subscription_status)
            VALUES ($1, $2, $3, $4, 'free', 'none')
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&query)
            .bind(Uuid::new_v4())
            .bind(new_user.email)
            .bind(new_user.name)
            .bind(new_user.password_hash)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_user_id_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_stripe_customer_id_if_absent(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<CustomerIdWrite, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET stripe_customer_id = $2, updated_at = now()
            WHERE id = $1 AND stripe_customer_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(CustomerIdWrite::Stored);
        }

        let existing = sqlx::query_scalar::<_, Option<String>>(
            "SELECT stripe_customer_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing.flatten() {
            Some(id) => Ok(CustomerIdWrite::Existing(id)),
            None => Err(sqlx::Error::RowNotFound),
        }
    }

    async fn update_user_plan(
        &self,
        user_id: Uuid,
        plan: PlanTier,
        billing_interval: Option<BillingInterval>,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET plan = $2, billing_interval = $3, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .bind(plan.as_str())
        .bind(billing_interval.map(|i| i.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        Ok(())
    }

    async fn apply_subscription_state(
        &self,
        user_id: Uuid,
        update: &SubscriptionStateUpdate,
    ) -> Result<bool, sqlx::Error> {
        // The state_at guard is the ordering fence between concurrent deliveries.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET plan = $2,
                billing_interval = $3,
                subscription_id = $4,
                subscription_status = $5,
                past_due_since = $6,
                subscription_state_at = $7,
                updated_at = now()
            WHERE id = $1
              AND (subscription_state_at IS NULL OR subscription_state_at <= $7)
            "#,
        )
        .bind(user_id)
        .bind(update.plan.as_str())
        .bind(update.billing_interval.map(|i| i.as_str()))
        .bind(update.subscription_id.as_deref())
        .bind(update.status.as_str())
        .bind(update.past_due_since)
        .bind(update.state_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
