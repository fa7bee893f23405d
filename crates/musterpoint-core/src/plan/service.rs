//! Plan service layer.
//!
//! Every public operation runs as one store transaction wrapped in
//! [`run_in_transaction`], so a transaction that loses a race is re-run
//! from scratch against the winner's committed state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{ServiceError, StoreError};
use crate::identity::MemberId;
use crate::store::{PlanStore, PlanTransaction, RetryPolicy, run_in_transaction};

use super::{ConflictList, Plan, PlanFields, PlanView, dedup_members};

/// Reads and writes family plans on behalf of a member.
#[derive(Clone)]
pub struct PlanService {
    store: Arc<dyn PlanStore>,
    retry: RetryPolicy,
}

impl PlanService {
    pub fn new(store: Arc<dyn PlanStore>) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: Arc<dyn PlanStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Return the plan `identity` belongs to, creating a single-member plan
    /// if there is none.
    ///
    /// Idempotent: repeated calls for a member return the same plan.
    pub async fn fetch_or_create_plan_for(&self, identity: &MemberId) -> Result<Plan, ServiceError> {
        let store = &self.store;
        run_in_transaction(&self.retry, "fetch_or_create_plan", move || async move {
            let mut tx = store.begin().await?;
            let plan = fetch_or_create_in(tx.as_mut(), identity).await?;
            tx.commit().await?;
            Ok(plan)
        })
        .await
    }

    /// Replace the fields and member list of `identity`'s plan.
    ///
    /// Every proposed member that already belongs to a different plan is
    /// reported in the returned [`ConflictList`]; in that case the plan is
    /// left exactly as it was. An empty list means the save happened.
    pub async fn save_plan(
        &self,
        identity: &MemberId,
        fields: &PlanFields,
        proposed_members: &[MemberId],
    ) -> Result<ConflictList, ServiceError> {
        let store = &self.store;
        let members = dedup_members(proposed_members.iter().cloned());
        let members = members.as_slice();

        let conflicts = run_in_transaction(&self.retry, "save_plan", move || async move {
            let mut tx = store.begin().await?;
            let conflicts = save_in(tx.as_mut(), identity, fields, members).await?;
            // A plan created for a first-time member is kept even when the
            // save itself is refused.
            tx.commit().await?;
            Ok(conflicts)
        })
        .await?;

        if conflicts.is_empty() {
            info!(member = %identity, members = members.len(), "plan saved");
        } else {
            info!(
                member = %identity,
                conflicts = conflicts.len(),
                "plan save refused: members already have a plan"
            );
        }
        Ok(conflicts)
    }

    /// Fetch-or-create `identity`'s plan and shape it for display.
    pub async fn load_plan_view(&self, identity: &MemberId) -> Result<PlanView, ServiceError> {
        let plan = self.fetch_or_create_plan_for(identity).await?;
        Ok(PlanView::new(&plan, identity))
    }
}

async fn fetch_or_create_in(
    tx: &mut dyn PlanTransaction,
    identity: &MemberId,
) -> Result<Plan, StoreError> {
    if let Some(plan) = tx.find_by_member(identity).await? {
        debug!(plan_id = %plan.id, member = %identity, "found plan");
        return Ok(plan);
    }
    let plan = tx.create(identity).await?;
    info!(plan_id = %plan.id, member = %identity, "created plan");
    Ok(plan)
}

async fn save_in(
    tx: &mut dyn PlanTransaction,
    identity: &MemberId,
    fields: &PlanFields,
    members: &[MemberId],
) -> Result<ConflictList, StoreError> {
    let mut plan = fetch_or_create_in(tx, identity).await?;

    let mut conflicts = Vec::new();
    for member in members {
        if let Some(other) = tx.find_other_plan_containing(member, plan.id).await? {
            debug!(member = %member, other_plan = %other.id, "member already has a plan");
            conflicts.push(member.clone());
        }
    }
    if !conflicts.is_empty() {
        return Ok(ConflictList::from(conflicts));
    }

    plan.fields = fields.clone();
    plan.family_members = members.to_vec();
    plan.last_updated = Some(Utc::now());
    tx.save(&plan).await?;
    Ok(ConflictList::default())
}
