use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::BillingError;
use crate::db::user_repository::UserRepository;
use crate::models::user::PlanAssignment;

/// Cache size at which expired entries are swept on the next fill.
const SWEEP_THRESHOLD: usize = 1_024;

#[derive(Clone)]
struct CachedPlan {
    assignment: PlanAssignment,
    fetched_at: Instant,
}

/// Read path for UI and authorization checks. Entries live for at most `ttl` and are
/// dropped eagerly whenever a plan write lands for the user.
#[derive(Clone)]
pub struct PlanReader {
    users: Arc<dyn UserRepository>,
    cache: Arc<DashMap<Uuid, CachedPlan>>,
    /// Bumped by every invalidation. A fill that overlaps one is discarded.
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl PlanReader {
    pub fn new(users: Arc<dyn UserRepository>, ttl: Duration) -> Self {
        Self {
            users,
            cache: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    pub async fn current_plan(&self, user_id: Uuid) -> Result<PlanAssignment, BillingError> {
        if self.ttl.is_zero() {
            return self.load(user_id).await;
        }

        if let Some(assignment) = self.cached(user_id) {
            return Ok(assignment);
        }

        let started = self.generation.load(Ordering::SeqCst);
        let assignment = self.load(user_id).await?;

        if self.generation.load(Ordering::SeqCst) == started {
            if self.cache.len() >= SWEEP_THRESHOLD {
                let ttl = self.ttl;
                self.cache.retain(|_, entry| entry.fetched_at.elapsed() < ttl);
            }
            self.cache.insert(
                user_id,
                CachedPlan {
                    assignment: assignment.clone(),
                    fetched_at: Instant::now(),
                },
            );
            // An invalidation may have landed between the check and the insert.
            if self.generation.load(Ordering::SeqCst) != started {
                self.cache.remove(&user_id);
            }
        }
        Ok(assignment)
    }

    pub fn invalidate(&self, user_id: Uuid) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.cache.remove(&user_id).is_some() {
            debug!(%user_id, "plan cache entry invalidated");
        }
    }

    fn cached(&self, user_id: Uuid) -> Option<PlanAssignment> {
        if let Some(entry) = self.cache.get(&user_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Some(entry.assignment.clone());
            }
        }
        let ttl = self.ttl;
        self.cache
            .remove_if(&user_id, |_, entry| entry.fetched_at.elapsed() >= ttl);
        None
    }

    async fn load(&self, user_id: Uuid) -> Result<PlanAssignment, BillingError> {
        Ok(match self.users.find_user_by_id(user_id).await? {
            Some(user) => user.plan_assignment()?,
            None => PlanAssignment::default(),
        })
    }
}
