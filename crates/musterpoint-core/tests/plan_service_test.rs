//! Plan service behavior against the in-memory store.
//!
//! These run without a database; `pg_plan_service_test.rs` repeats the
//! important cases against PostgreSQL.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use musterpoint_core::store::{MemoryPlanStore, PlanStore, PlanTransaction, RetryPolicy};
use musterpoint_core::{
    MAX_FAMILY_MEMBERS, MemberId, Plan, PlanFields, PlanService, ServiceError, StoreError,
};

fn id(s: &str) -> MemberId {
    MemberId::parse(s).unwrap()
}

fn ids(list: &[&str]) -> Vec<MemberId> {
    list.iter().map(|s| id(s)).collect()
}

fn fields(tag: &str) -> PlanFields {
    PlanFields {
        out_of_town_contact: format!("{tag} contact"),
        neighborhood_meeting_place: format!("{tag} corner"),
        regional_meeting_place: format!("{tag} library"),
        evacuation_location: format!("{tag} fairgrounds"),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

fn service() -> (PlanService, MemoryPlanStore) {
    let store = MemoryPlanStore::new();
    let service = PlanService::with_retry(Arc::new(store.clone()), fast_retry());
    (service, store)
}

async fn plan_of(store: &MemoryPlanStore, member: &MemberId) -> Option<Plan> {
    let mut tx = store.begin().await.unwrap();
    tx.find_by_member(member).await.unwrap()
}

// -----------------------------------------------------------------------
// fetch_or_create_plan_for
// -----------------------------------------------------------------------

#[tokio::test]
async fn fetch_or_create_is_idempotent() {
    let (service, store) = service();
    let ann = id("ann@x.org");

    let first = service.fetch_or_create_plan_for(&ann).await.unwrap();
    let second = service.fetch_or_create_plan_for(&ann).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first, second);
    assert_eq!(first.family_members, vec![ann]);
    assert!(first.last_updated.is_none());
    assert_eq!(store.plan_count().await.unwrap(), 1);
}

#[tokio::test]
async fn distinct_members_get_distinct_plans() {
    let (service, store) = service();

    let a = service.fetch_or_create_plan_for(&id("a@x.org")).await.unwrap();
    let b = service.fetch_or_create_plan_for(&id("b@x.org")).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(store.plan_count().await.unwrap(), 2);
}

#[tokio::test]
async fn fetch_finds_plan_for_added_member() {
    let (service, store) = service();
    let ann = id("ann@x.org");
    let bob = id("bob@x.org");

    let conflicts = service
        .save_plan(&ann, &fields("home"), &[ann.clone(), bob.clone()])
        .await
        .unwrap();
    assert!(conflicts.is_empty());

    let ann_plan = service.fetch_or_create_plan_for(&ann).await.unwrap();
    let bob_plan = service.fetch_or_create_plan_for(&bob).await.unwrap();
    assert_eq!(ann_plan.id, bob_plan.id);
    assert_eq!(store.plan_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fetch_or_create_creates_one_plan() {
    let (service, store) = service();
    let ann = id("ann@x.org");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let ann = ann.clone();
            tokio::spawn(async move { service.fetch_or_create_plan_for(&ann).await })
        })
        .collect();

    let plans: Vec<Plan> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(plans.iter().all(|p| p.id == plans[0].id));
    assert_eq!(store.plan_count().await.unwrap(), 1);
}

// -----------------------------------------------------------------------
// save_plan
// -----------------------------------------------------------------------

#[tokio::test]
async fn successful_save_replaces_fields_and_members() {
    let (service, store) = service();
    let x = id("x@x.org");
    let y = id("y@x.org");

    let before = Utc::now();
    let conflicts = service
        .save_plan(&x, &fields("new"), &[y.clone(), x.clone()])
        .await
        .unwrap();
    assert!(conflicts.is_empty());

    let plan = plan_of(&store, &x).await.expect("x should have a plan");
    assert_eq!(plan.fields, fields("new"));
    let mut members = plan.family_members.clone();
    members.sort();
    assert_eq!(members, vec![x.clone(), y.clone()]);
    assert_eq!(plan.family_members, vec![y, x], "insertion order is kept");
    assert!(plan.last_updated.expect("last_updated should be set") >= before);
}

#[tokio::test]
async fn repeated_saves_keep_one_plan_and_advance_timestamp() {
    let (service, store) = service();
    let ann = id("ann@x.org");

    let _ = service.save_plan(&ann, &fields("one"), &[ann.clone()]).await.unwrap();
    let first = plan_of(&store, &ann).await.unwrap();

    let _ = service.save_plan(&ann, &fields("two"), &[ann.clone()]).await.unwrap();
    let second = plan_of(&store, &ann).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.fields, fields("two"));
    assert!(second.last_updated >= first.last_updated);
    assert_eq!(store.plan_count().await.unwrap(), 1);
}

#[tokio::test]
async fn conflicting_member_blocks_save_and_mutates_nothing() {
    let (service, store) = service();
    let (a, b, c) = (id("a@x.org"), id("b@x.org"), id("c@x.org"));

    let _ = service.save_plan(&a, &fields("p1"), &[a.clone(), b.clone()]).await.unwrap();
    let _ = service.save_plan(&c, &fields("p2"), &[c.clone()]).await.unwrap();
    let p1_before = plan_of(&store, &a).await.unwrap();
    let p2_before = plan_of(&store, &c).await.unwrap();

    let conflicts = service
        .save_plan(&c, &fields("p2-changed"), &[c.clone(), a.clone()])
        .await
        .unwrap();

    assert_eq!(conflicts.members(), &[a.clone()]);
    assert_eq!(plan_of(&store, &a).await.unwrap(), p1_before);
    assert_eq!(plan_of(&store, &c).await.unwrap(), p2_before);
    assert_eq!(store.plan_count().await.unwrap(), 2);
}

#[tokio::test]
async fn every_conflicting_member_is_reported() {
    let (service, _store) = service();
    let (a, b, c, d) = (id("a@x.org"), id("b@x.org"), id("c@x.org"), id("d@x.org"));

    let _ = service.save_plan(&a, &fields("p1"), &[a.clone(), b.clone()]).await.unwrap();
    let _ = service.save_plan(&c, &fields("p2"), &[c.clone()]).await.unwrap();

    let conflicts = service
        .save_plan(&d, &fields("p3"), &[d.clone(), b.clone(), c.clone()])
        .await
        .unwrap();
    assert_eq!(conflicts.members(), &[b, c]);
}

#[tokio::test]
async fn conflict_for_first_time_member_keeps_the_new_plan_untouched() {
    let (service, store) = service();
    let (a, newcomer) = (id("a@x.org"), id("new@x.org"));
    let _ = service.save_plan(&a, &fields("p1"), &[a.clone()]).await.unwrap();

    let conflicts = service
        .save_plan(&newcomer, &fields("mine"), &[newcomer.clone(), a.clone()])
        .await
        .unwrap();
    assert_eq!(conflicts.len(), 1);

    let created = plan_of(&store, &newcomer).await.expect("plan is created lazily");
    assert_eq!(created.family_members, vec![newcomer]);
    assert_eq!(created.fields, PlanFields::default());
    assert!(created.last_updated.is_none());
}

#[tokio::test]
async fn acting_member_may_leave_their_plan() {
    let (service, store) = service();
    let (ann, bob) = (id("ann@x.org"), id("bob@x.org"));

    let _ = service.save_plan(&ann, &fields("home"), &[bob.clone()]).await.unwrap();

    assert!(plan_of(&store, &ann).await.is_none());
    let bob_plan = plan_of(&store, &bob).await.unwrap();
    assert_eq!(bob_plan.fields, fields("home"));

    // Ann's next visit starts a fresh plan.
    let fresh = service.fetch_or_create_plan_for(&ann).await.unwrap();
    assert_ne!(fresh.id, bob_plan.id);
    assert_eq!(store.plan_count().await.unwrap(), 2);
}

#[tokio::test]
async fn duplicate_proposed_members_are_collapsed() {
    let (service, store) = service();
    let ann = id("ann@x.org");

    let conflicts = service
        .save_plan(&ann, &fields("home"), &ids(&["ann@x.org", "bob@x.org", "ANN@x.org"]))
        .await
        .unwrap();
    assert!(conflicts.is_empty());

    let plan = plan_of(&store, &ann).await.unwrap();
    assert_eq!(plan.family_members, ids(&["ann@x.org", "bob@x.org"]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_claiming_same_member_cannot_both_win() {
    let (service, store) = service();
    let shared = id("kid@x.org");

    let handles: Vec<_> = ["mom@x.org", "dad@x.org"]
        .into_iter()
        .map(|parent| {
            let service = service.clone();
            let parent = id(parent);
            let shared = shared.clone();
            tokio::spawn(async move {
                service
                    .save_plan(&parent, &fields("x"), &[parent.clone(), shared])
                    .await
            })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let winners = outcomes.iter().filter(|c| c.is_empty()).count();
    assert_eq!(winners, 1, "exactly one save may claim the shared member");
    let loser = outcomes.iter().find(|c| !c.is_empty()).unwrap();
    assert_eq!(loser.members(), &[shared.clone()]);

    let owner = plan_of(&store, &shared).await.unwrap();
    assert_eq!(owner.family_members.len(), 2);

    let plans = store.snapshot().await;
    let holding_kid = plans.iter().filter(|p| p.has_member(&shared)).count();
    assert_eq!(holding_kid, 1);
}

// -----------------------------------------------------------------------
// load_plan_view
// -----------------------------------------------------------------------

#[tokio::test]
async fn view_pads_member_emails() {
    let (service, _store) = service();
    let ann = id("ann@x.org");
    let _ = service
        .save_plan(&ann, &fields("home"), &ids(&["ann@x.org", "bob@x.org", "cy@x.org"]))
        .await
        .unwrap();

    let view = service.load_plan_view(&ann).await.unwrap();

    assert_eq!(view.member_emails.len(), MAX_FAMILY_MEMBERS);
    assert_eq!(&view.member_emails[..3], &["ann@x.org", "bob@x.org", "cy@x.org"]);
    assert!(view.member_emails[3..].iter().all(String::is_empty));
    assert_eq!(view.fields, fields("home"));
    assert_eq!(view.user_email, "ann@x.org");
}

// -----------------------------------------------------------------------
// Retry behavior
// -----------------------------------------------------------------------

/// Wraps a [`MemoryPlanStore`] and fails the next `failures` commits with a
/// transient error, as a contended database would.
struct FlakyStore {
    inner: MemoryPlanStore,
    failures: Arc<AtomicU32>,
    begins: AtomicU32,
}

impl FlakyStore {
    fn new(inner: MemoryPlanStore, failures: u32) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicU32::new(failures)),
            begins: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PlanStore for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn PlanTransaction>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.begin().await?;
        Ok(Box::new(FlakyTransaction {
            inner,
            failures: Arc::clone(&self.failures),
        }))
    }

    async fn plan_count(&self) -> Result<u64, StoreError> {
        self.inner.plan_count().await
    }
}

struct FlakyTransaction {
    inner: Box<dyn PlanTransaction>,
    failures: Arc<AtomicU32>,
}

#[async_trait]
impl PlanTransaction for FlakyTransaction {
    async fn find_by_member(&mut self, member: &MemberId) -> Result<Option<Plan>, StoreError> {
        self.inner.find_by_member(member).await
    }

    async fn find_other_plan_containing(
        &mut self,
        member: &MemberId,
        exclude: Uuid,
    ) -> Result<Option<Plan>, StoreError> {
        self.inner.find_other_plan_containing(member, exclude).await
    }

    async fn create(&mut self, initial_member: &MemberId) -> Result<Plan, StoreError> {
        self.inner.create(initial_member).await
    }

    async fn save(&mut self, plan: &Plan) -> Result<(), StoreError> {
        self.inner.save(plan).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::transient("could not serialize access"));
        }
        self.inner.commit().await
    }
}

#[tokio::test]
async fn transient_commit_failures_are_retried() {
    let memory = MemoryPlanStore::new();
    let flaky = Arc::new(FlakyStore::new(memory.clone(), 2));
    let service = PlanService::with_retry(flaky.clone(), fast_retry());
    let ann = id("ann@x.org");

    let conflicts = service
        .save_plan(&ann, &fields("home"), &[ann.clone()])
        .await
        .unwrap();

    assert!(conflicts.is_empty());
    assert_eq!(flaky.begins.load(Ordering::SeqCst), 3);
    assert_eq!(memory.plan_count().await.unwrap(), 1);
    assert_eq!(plan_of(&memory, &ann).await.unwrap().fields, fields("home"));
}

#[tokio::test]
async fn exhausted_retries_surface_transient_error_and_persist_nothing() {
    let memory = MemoryPlanStore::new();
    let flaky = Arc::new(FlakyStore::new(memory.clone(), 100));
    let service = PlanService::with_retry(flaky.clone(), fast_retry());

    let err = service
        .fetch_or_create_plan_for(&id("ann@x.org"))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(err, ServiceError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(memory.plan_count().await.unwrap(), 0);
}
