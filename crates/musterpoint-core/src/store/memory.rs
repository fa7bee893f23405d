//! In-process [`PlanStore`].
//!
//! Transactions are fully serialized: `begin` takes an owned lock on the
//! shared state and writes go straight through it. Each write records what
//! it replaced, and a transaction dropped without `commit` replays that log
//! backwards. Membership lookups go through a member -> plan id index.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::identity::MemberId;
use crate::plan::Plan;

use super::{PlanStore, PlanTransaction};

#[derive(Debug, Default)]
struct MemoryState {
    plans: HashMap<Uuid, Plan>,
    by_member: HashMap<MemberId, Uuid>,
}

impl MemoryState {
    fn plan_of(&self, member: &MemberId) -> Option<&Plan> {
        self.by_member.get(member).and_then(|id| self.plans.get(id))
    }
}

/// A [`PlanStore`] kept in memory. Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlanStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored plan, in no particular order.
    pub async fn snapshot(&self) -> Vec<Plan> {
        self.state.lock().await.plans.values().cloned().collect()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn begin(&self) -> Result<Box<dyn PlanTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            undo: Vec::new(),
        }))
    }

    async fn plan_count(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.plans.len() as u64)
    }
}

/// The value an entry held before a write; `None` means it was absent.
enum Undo {
    Plan(Uuid, Option<Plan>),
    Member(MemberId, Option<Uuid>),
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
}

impl MemoryTransaction {
    fn put_plan(&mut self, plan: Plan) {
        let id = plan.id;
        let previous = self.guard.plans.insert(id, plan);
        self.undo.push(Undo::Plan(id, previous));
    }

    fn set_owner(&mut self, member: MemberId, owner: Option<Uuid>) {
        let previous = match owner {
            Some(id) => self.guard.by_member.insert(member.clone(), id),
            None => self.guard.by_member.remove(&member),
        };
        self.undo.push(Undo::Member(member, previous));
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Plan(id, Some(plan)) => {
                    self.guard.plans.insert(id, plan);
                }
                Undo::Plan(id, None) => {
                    self.guard.plans.remove(&id);
                }
                Undo::Member(member, Some(id)) => {
                    self.guard.by_member.insert(member, id);
                }
                Undo::Member(member, None) => {
                    self.guard.by_member.remove(&member);
                }
            }
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.rollback();
    }
}

#[async_trait]
impl PlanTransaction for MemoryTransaction {
    async fn find_by_member(&mut self, member: &MemberId) -> Result<Option<Plan>, StoreError> {
        Ok(self.guard.plan_of(member).cloned())
    }

    async fn find_other_plan_containing(
        &mut self,
        member: &MemberId,
        exclude: Uuid,
    ) -> Result<Option<Plan>, StoreError> {
        Ok(self
            .guard
            .plan_of(member)
            .filter(|plan| plan.id != exclude)
            .cloned())
    }

    async fn create(&mut self, initial_member: &MemberId) -> Result<Plan, StoreError> {
        if let Some(existing) = self.guard.by_member.get(initial_member) {
            return Err(StoreError::fatal(format!(
                "{initial_member} already belongs to plan {existing}"
            )));
        }
        let plan = Plan::new(Uuid::new_v4(), initial_member.clone(), Utc::now());
        self.set_owner(initial_member.clone(), Some(plan.id));
        self.put_plan(plan.clone());
        Ok(plan)
    }

    async fn save(&mut self, plan: &Plan) -> Result<(), StoreError> {
        let Some(stored) = self.guard.plans.get(&plan.id) else {
            return Err(StoreError::fatal(format!("plan {} not found", plan.id)));
        };
        let previous_members = stored.family_members.clone();

        for member in &plan.family_members {
            match self.guard.by_member.get(member) {
                Some(owner) if *owner != plan.id => {
                    return Err(StoreError::fatal(format!(
                        "{member} already belongs to plan {owner}"
                    )));
                }
                _ => {}
            }
        }

        for member in previous_members {
            self.set_owner(member, None);
        }
        for member in &plan.family_members {
            self.set_owner(member.clone(), Some(plan.id));
        }
        self.put_plan(plan.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.undo.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MemberId {
        MemberId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn uncommitted_transaction_is_discarded() {
        let store = MemoryPlanStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.create(&id("a@x.org")).await.unwrap();
        drop(tx);

        assert_eq!(store.plan_count().await.unwrap(), 0);
        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_by_member(&id("a@x.org")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_save_restores_previous_plan() {
        let store = MemoryPlanStore::new();

        let mut tx = store.begin().await.unwrap();
        let plan = tx.create(&id("a@x.org")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut changed = plan.clone();
        changed.family_members = vec![id("b@x.org")];
        changed.fields.regional_meeting_place = "Library".into();
        tx.save(&changed).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.find_by_member(&id("a@x.org")).await.unwrap(), Some(plan));
        assert!(tx.find_by_member(&id("b@x.org")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_plan_is_indexed_by_member() {
        let store = MemoryPlanStore::new();

        let mut tx = store.begin().await.unwrap();
        let plan = tx.create(&id("a@x.org")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let found = tx.find_by_member(&id("a@x.org")).await.unwrap().unwrap();
        assert_eq!(found.id, plan.id);
        assert!(
            tx.find_other_plan_containing(&id("a@x.org"), plan.id)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            tx.find_other_plan_containing(&id("a@x.org"), Uuid::new_v4())
                .await
                .unwrap()
                .map(|p| p.id),
            Some(plan.id)
        );
    }

    #[tokio::test]
    async fn save_reindexes_members() {
        let store = MemoryPlanStore::new();

        let mut tx = store.begin().await.unwrap();
        let mut plan = tx.create(&id("a@x.org")).await.unwrap();
        plan.family_members = vec![id("b@x.org"), id("c@x.org")];
        tx.save(&plan).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_by_member(&id("a@x.org")).await.unwrap().is_none());
        assert_eq!(
            tx.find_by_member(&id("c@x.org")).await.unwrap().map(|p| p.id),
            Some(plan.id)
        );
    }

    #[tokio::test]
    async fn save_refuses_member_of_other_plan() {
        let store = MemoryPlanStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.create(&id("a@x.org")).await.unwrap();
        let mut other = tx.create(&id("b@x.org")).await.unwrap();
        other.family_members.push(id("a@x.org"));

        let err = tx.save(&other).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn create_refuses_existing_member() {
        let store = MemoryPlanStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.create(&id("a@x.org")).await.unwrap();
        assert!(tx.create(&id("a@x.org")).await.is_err());
    }
}
