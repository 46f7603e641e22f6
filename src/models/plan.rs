use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown billing interval: {0}")]
pub struct UnknownInterval(pub String);

impl PlanTier {
    pub const ALL: [PlanTier; 2] = [PlanTier::Free, PlanTier::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                max_projects: Some(1),
                storage_bytes_per_project: GIB,
            },
            PlanTier::Pro => PlanLimits {
                max_projects: None,
                storage_bytes_per_project: 10 * GIB,
            },
        }
    }

    /// Display prices in cents, `(monthly, yearly)`.
    pub fn list_prices(&self) -> Option<(u64, u64)> {
        match self {
            PlanTier::Free => None,
            PlanTier::Pro => Some((1_200, 12_000)),
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = UnknownPlan;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            _ => Err(UnknownPlan(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
    None,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
            BillingInterval::None => "none",
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = UnknownInterval;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(BillingInterval::Monthly),
            "yearly" | "year" | "annual" => Ok(BillingInterval::Yearly),
            "none" => Ok(BillingInterval::None),
            _ => Err(UnknownInterval(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    /// `None` means unlimited.
    pub max_projects: Option<u32>,
    pub storage_bytes_per_project: u64,
}

impl PlanLimits {
    pub fn allows_project_count(&self, count: u32) -> bool {
        self.max_projects.map(|max| count <= max).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPrice {
    pub plan: PlanTier,
    pub interval: BillingInterval,
    pub price_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("plan {0} is free and cannot carry a price")]
    FreePlanPriced(PlanTier),
    #[error("price {0} must be monthly or yearly")]
    IntervalRequired(String),
    #[error("price id {0} is mapped to more than one plan")]
    DuplicatePrice(String),
    #[error("plan {plan} has more than one {interval} price")]
    DuplicateInterval {
        plan: PlanTier,
        interval: BillingInterval,
    },
    #[error("price id for {plan} ({interval}) is empty")]
    EmptyPrice {
        plan: PlanTier,
        interval: BillingInterval,
    },
}

/// Forward (plan, interval) -> price id mapping and its reverse, built from the same
/// list so checkout and webhook reconciliation can never disagree.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    forward: HashMap<(PlanTier, BillingInterval), String>,
    reverse: HashMap<String, (PlanTier, BillingInterval)>,
}

impl PlanCatalog {
    pub fn new(prices: Vec<PlanPrice>) -> Result<Self, CatalogError> {
        let mut catalog = PlanCatalog::default();
        for price in prices {
            let price_id = price.price_id.trim().to_string();
            if price_id.is_empty() {
                return Err(CatalogError::EmptyPrice {
                    plan: price.plan,
                    interval: price.interval,
                });
            }
            if !price.plan.is_paid() {
                return Err(CatalogError::FreePlanPriced(price.plan));
            }
            if price.interval == BillingInterval::None {
                return Err(CatalogError::IntervalRequired(price_id));
            }
            if catalog.reverse.contains_key(&price_id) {
                return Err(CatalogError::DuplicatePrice(price_id));
            }
            if catalog
                .forward
                .insert((price.plan, price.interval), price_id.clone())
                .is_some()
            {
                return Err(CatalogError::DuplicateInterval {
                    plan: price.plan,
                    interval: price.interval,
                });
            }
            catalog
                .reverse
                .insert(price_id, (price.plan, price.interval));
        }
        Ok(catalog)
    }

    pub fn price_for(&self, plan: PlanTier, interval: BillingInterval) -> Option<&str> {
        self.forward.get(&(plan, interval)).map(String::as_str)
    }

    pub fn plan_for_price(&self, price_id: &str) -> Option<(PlanTier, BillingInterval)> {
        self.reverse.get(price_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pro_prices() -> Vec<PlanPrice> {
        vec![
            PlanPrice {
                plan: PlanTier::Pro,
                interval: BillingInterval::Monthly,
                price_id: "price_pro_monthly".into(),
            },
            PlanPrice {
                plan: PlanTier::Pro,
                interval: BillingInterval::Yearly,
                price_id: "price_pro_yearly".into(),
            },
        ]
    }

    #[test]
    fn parses_known_plans_case_insensitively() {
        assert_eq!("PRO".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert_eq!(" free ".parse::<PlanTier>().unwrap(), PlanTier::Free);
        assert_eq!(
            "enterprise".parse::<PlanTier>(),
            Err(UnknownPlan("enterprise".into()))
        );
    }

    #[test]
    fn catalog_maps_both_directions() {
        let catalog = PlanCatalog::new(pro_prices()).unwrap();
        assert_eq!(
            catalog.price_for(PlanTier::Pro, BillingInterval::Yearly),
            Some("price_pro_yearly")
        );
        assert_eq!(
            catalog.plan_for_price("price_pro_monthly"),
            Some((PlanTier::Pro, BillingInterval::Monthly))
        );
        assert_eq!(catalog.price_for(PlanTier::Free, BillingInterval::None), None);
        assert_eq!(catalog.plan_for_price("price_unknown"), None);
    }

    #[test]
    fn catalog_rejects_ambiguous_price_ids() {
        let mut prices = pro_prices();
        prices[1].price_id = "price_pro_monthly".into();
        assert_eq!(
            PlanCatalog::new(prices).unwrap_err(),
            CatalogError::DuplicatePrice("price_pro_monthly".into())
        );
    }

    #[test]
    fn catalog_rejects_priced_free_plan() {
        let err = PlanCatalog::new(vec![PlanPrice {
            plan: PlanTier::Free,
            interval: BillingInterval::Monthly,
            price_id: "price_free".into(),
        }])
        .unwrap_err();
        assert_eq!(err, CatalogError::FreePlanPriced(PlanTier::Free));
    }

    #[test]
    fn free_limits_cap_projects_and_pro_is_unlimited() {
        assert!(PlanTier::Free.limits().allows_project_count(1));
        assert!(!PlanTier::Free.limits().allows_project_count(2));
        assert!(PlanTier::Pro.limits().allows_project_count(500));
        assert_eq!(
            PlanTier::Pro.limits().storage_bytes_per_project,
            10 * PlanTier::Free.limits().storage_bytes_per_project
        );
    }
}
