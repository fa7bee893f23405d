//! PostgreSQL-backed [`PlanStore`].
//!
//! Transactions run at `SERIALIZABLE` isolation. Membership is looked up
//! through the `plan_members` table, whose primary key is the member, so
//! two transactions racing to put the same member in different plans can
//! never both commit: the loser fails with a serialization failure or a
//! unique violation, both reported as [`StoreError::Transient`].

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use musterpoint_db::queries::plans as db;

use crate::error::StoreError;
use crate::identity::MemberId;
use crate::plan::Plan;

use super::{PlanStore, PlanTransaction};

/// SQLSTATE codes worth re-running a transaction for.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

const UNIQUE_VIOLATION: &str = "23505";
const MEMBERSHIP_KEY: &str = "plan_members_pkey";

/// A [`PlanStore`] over a PostgreSQL pool migrated with
/// [`musterpoint_db::pool::run_migrations`].
#[derive(Debug, Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn begin(&self) -> Result<Box<dyn PlanTransaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx)?;
        Ok(Box::new(PgPlanTransaction { tx }))
    }

    async fn plan_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(classify_sqlx)?;
        let count = db::count_plans(&mut conn).await.map_err(classify)?;
        Ok(count.max(0) as u64)
    }
}

struct PgPlanTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PlanTransaction for PgPlanTransaction {
    async fn find_by_member(&mut self, member: &MemberId) -> Result<Option<Plan>, StoreError> {
        let plan_id = db::find_plan_id_by_member(&mut self.tx, member.as_str())
            .await
            .map_err(classify)?;
        match plan_id {
            Some(id) => load_plan(&mut self.tx, id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_other_plan_containing(
        &mut self,
        member: &MemberId,
        exclude: Uuid,
    ) -> Result<Option<Plan>, StoreError> {
        let plan_id = db::find_other_plan_id_containing(&mut self.tx, member.as_str(), exclude)
            .await
            .map_err(classify)?;
        match plan_id {
            Some(id) => load_plan(&mut self.tx, id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn create(&mut self, initial_member: &MemberId) -> Result<Plan, StoreError> {
        let row = db::insert_plan(&mut self.tx).await.map_err(classify)?;
        db::replace_members(&mut self.tx, row.id, &[initial_member.as_str().to_owned()])
            .await
            .map_err(classify)?;
        debug!(plan_id = %row.id, member = %initial_member, "inserted plan");

        Ok(Plan {
            id: row.id,
            fields: row.fields(),
            family_members: vec![initial_member.clone()],
            created_at: row.created_at,
            last_updated: row.last_updated,
        })
    }

    async fn save(&mut self, plan: &Plan) -> Result<(), StoreError> {
        db::update_plan_fields(&mut self.tx, plan.id, &plan.fields, plan.last_updated)
            .await
            .map_err(classify)?;
        let members: Vec<String> = plan
            .family_members
            .iter()
            .map(|m| m.as_str().to_owned())
            .collect();
        db::replace_members(&mut self.tx, plan.id, &members)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(classify_sqlx)
    }
}

async fn load_plan(conn: &mut PgConnection, id: Uuid) -> Result<Plan, StoreError> {
    let row = db::get_plan(conn, id)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::fatal(format!("plan {id} is indexed but missing")))?;
    let family_members = db::list_members(conn, id)
        .await
        .map_err(classify)?
        .iter()
        .map(|m| MemberId::parse(m))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::fatal(format!("plan {id} holds an invalid member: {e}")))?;

    Ok(Plan {
        id: row.id,
        fields: row.fields(),
        family_members,
        created_at: row.created_at,
        last_updated: row.last_updated,
    })
}

/// Whether a database error means "run the transaction again".
fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            let code = code.as_deref().unwrap_or_default();
            TRANSIENT_SQLSTATES.contains(&code)
                || (code == UNIQUE_VIOLATION && db_err.constraint() == Some(MEMBERSHIP_KEY))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

fn classify_sqlx(err: sqlx::Error) -> StoreError {
    if is_transient_sqlx(&err) {
        StoreError::Transient(err.into())
    } else {
        StoreError::Fatal(err.into())
    }
}

/// Classify an error from the query layer by the `sqlx::Error` underneath
/// its context chain.
fn classify(err: anyhow::Error) -> StoreError {
    let transient = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .any(is_transient_sqlx);
    if transient {
        StoreError::Transient(err)
    } else {
        StoreError::Fatal(err)
    }
}
