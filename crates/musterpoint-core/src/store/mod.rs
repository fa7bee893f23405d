//! Plan persistence behind a transactional interface.
//!
//! A [`PlanStore`] hands out [`PlanTransaction`]s. Everything done through a
//! transaction becomes visible atomically on [`PlanTransaction::commit`];
//! dropping a transaction without committing discards it.

pub mod memory;
pub mod postgres;
pub mod retry;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::identity::MemberId;
use crate::plan::Plan;

pub use memory::MemoryPlanStore;
pub use postgres::PgPlanStore;
pub use retry::{RetryPolicy, run_in_transaction};

/// Source of plan transactions.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Open a transaction isolated from all concurrent ones.
    async fn begin(&self) -> Result<Box<dyn PlanTransaction>, StoreError>;

    /// Number of plans currently stored.
    async fn plan_count(&self) -> Result<u64, StoreError>;
}

/// An open transaction against a [`PlanStore`].
#[async_trait]
pub trait PlanTransaction: Send {
    /// The plan that lists `member`, if any.
    async fn find_by_member(&mut self, member: &MemberId) -> Result<Option<Plan>, StoreError>;

    /// A plan other than `exclude` that lists `member`, if any.
    async fn find_other_plan_containing(
        &mut self,
        member: &MemberId,
        exclude: Uuid,
    ) -> Result<Option<Plan>, StoreError>;

    /// Create a plan whose sole member is `initial_member`.
    async fn create(&mut self, initial_member: &MemberId) -> Result<Plan, StoreError>;

    /// Persist the fields, member list and `last_updated` of an existing plan.
    async fn save(&mut self, plan: &Plan) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore, _: &dyn PlanTransaction) {}
};
