use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::models::plan::{BillingInterval, CatalogError, PlanCatalog, PlanPrice, PlanTier};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("stripe is partially configured; missing {0:?}")]
    IncompleteStripe(Vec<&'static str>),
    #[error("price catalog is invalid: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub publishable_key: String,
    pub pro_monthly_price: String,
    pub pro_yearly_price: String,
}

const STRIPE_KEYS: [&str; 5] = [
    "STRIPE_SECRET_KEY",
    "STRIPE_WEBHOOK_SECRET",
    "STRIPE_PUBLISHABLE_KEY",
    "STRIPE_PRICE_PRO_MONTHLY",
    "STRIPE_PRICE_PRO_YEARLY",
];

impl StripeSettings {
    /// `Ok(None)` when no Stripe variable is present at all: billing is simply off.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let values: Vec<Option<String>> = STRIPE_KEYS
            .iter()
            .map(|key| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
            .collect();

        if values.iter().all(Option::is_none) {
            return Ok(None);
        }

        let missing: Vec<&'static str> = STRIPE_KEYS
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::IncompleteStripe(missing));
        }

        let mut values = values.into_iter().flatten();
        let mut next = || values.next().unwrap_or_default();
        Ok(Some(StripeSettings {
            secret_key: next(),
            webhook_secret: next(),
            publishable_key: next(),
            pro_monthly_price: next(),
            pro_yearly_price: next(),
        }))
    }

    pub fn catalog(&self) -> Result<PlanCatalog, ConfigError> {
        let catalog = PlanCatalog::new(vec![
            PlanPrice {
                plan: PlanTier::Pro,
                interval: BillingInterval::Monthly,
                price_id: self.pro_monthly_price.clone(),
            },
            PlanPrice {
                plan: PlanTier::Pro,
                interval: BillingInterval::Yearly,
                price_id: self.pro_yearly_price.clone(),
            },
        ])?;
        Ok(catalog)
    }
}

#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub stripe: StripeSettings,
    pub catalog: PlanCatalog,
}

impl BillingSettings {
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(stripe) = StripeSettings::from_lookup(lookup)? else {
            return Ok(None);
        };
        let catalog = stripe.catalog()?;
        Ok(Some(BillingSettings { stripe, catalog }))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub bind_addr: SocketAddr,
    pub app_env: AppEnv,
    pub auth_cookie_secure: bool,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub plan_cache_ttl: Duration,
    pub stripe_timeout: Duration,
    pub past_due_grace: Duration,
    pub rate_limit_ms: u64,
    pub rate_limit_burst: u32,
    /// `Ok(None)`: billing not configured. `Err`: misconfigured, billing stays off.
    pub billing: Result<Option<BillingSettings>, String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let database_url = required("DATABASE_URL")?;
        let frontend_origin = required("FRONTEND_ORIGIN")?
            .trim_end_matches('/')
            .to_string();

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let app_env = match lookup("APP_ENV").as_deref().map(str::trim) {
            None | Some("") | Some("production") => AppEnv::Production,
            Some("development") => AppEnv::Development,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "APP_ENV",
                    reason: format!("expected development or production, got {other}"),
                })
            }
        };

        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                }),
            }
        };

        let auth_cookie_secure = lookup("AUTH_COOKIE_SECURE")
            .map(|v| !matches!(v.trim(), "false" | "0"))
            .unwrap_or(true);

        let past_due_grace_days = number("PAST_DUE_GRACE_DAYS", 7)?;
        let past_due_grace = past_due_grace_days
            .checked_mul(SECONDS_PER_DAY)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid {
                name: "PAST_DUE_GRACE_DAYS",
                reason: format!("{past_due_grace_days} days is out of range"),
            })?;
        let rate_limit_burst = u32::try_from(number("RATE_LIMITER_BURST", 20)?).map_err(|e| {
            ConfigError::Invalid {
                name: "RATE_LIMITER_BURST",
                reason: e.to_string(),
            }
        })?;

        let billing = BillingSettings::from_lookup(&lookup).map_err(|e| e.to_string());

        Ok(Config {
            database_url,
            frontend_origin,
            bind_addr,
            app_env,
            auth_cookie_secure,
            jwt_issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "plansync".to_string()),
            jwt_audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "plansync-web".to_string()),
            plan_cache_ttl: Duration::from_secs(number("PLAN_CACHE_TTL_SECONDS", 5)?),
            stripe_timeout: Duration::from_secs(number("STRIPE_TIMEOUT_SECONDS", 10)?),
            past_due_grace,
            rate_limit_ms: number("RATE_LIMITER_MILLISECONDS", 200)?,
            rate_limit_burst,
            billing,
        })
    }

    pub fn is_development(&self) -> bool {
        self.app_env == AppEnv::Development
    }
}
