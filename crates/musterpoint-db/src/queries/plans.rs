//! Database query functions for the `plans` and `plan_members` tables.
//!
//! Every function takes a `&mut PgConnection` so callers can run several of
//! them inside one transaction (`&mut *tx`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::{PlanFields, PlanRow};

/// Insert an empty plan row. Returns the row with server-generated defaults
/// (id, created_at, empty fields).
pub async fn insert_plan(conn: &mut PgConnection) -> Result<PlanRow> {
    let plan = sqlx::query_as::<_, PlanRow>("INSERT INTO plans DEFAULT VALUES RETURNING *")
        .fetch_one(&mut *conn)
        .await
        .context("failed to insert plan")?;

    Ok(plan)
}

/// Fetch a plan row by its ID.
pub async fn get_plan(conn: &mut PgConnection, id: Uuid) -> Result<Option<PlanRow>> {
    let plan = sqlx::query_as::<_, PlanRow>("SELECT * FROM plans WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("failed to fetch plan")?;

    Ok(plan)
}

/// Count all plans.
pub async fn count_plans(conn: &mut PgConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plans")
        .fetch_one(&mut *conn)
        .await
        .context("failed to count plans")?;

    Ok(count)
}

/// Overwrite the text fields and `last_updated` of a plan.
pub async fn update_plan_fields(
    conn: &mut PgConnection,
    id: Uuid,
    fields: &PlanFields,
    last_updated: Option<DateTime<Utc>>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE plans \
         SET out_of_town_contact = $1, \
             neighborhood_meeting_place = $2, \
             regional_meeting_place = $3, \
             evacuation_location = $4, \
             last_updated = $5 \
         WHERE id = $6",
    )
    .bind(&fields.out_of_town_contact)
    .bind(&fields.neighborhood_meeting_place)
    .bind(&fields.regional_meeting_place)
    .bind(&fields.evacuation_location)
    .bind(last_updated)
    .bind(id)
    .execute(&mut *conn)
    .await
    .context("failed to update plan fields")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("plan {id} not found");
    }

    Ok(())
}

/// Return the ID of the plan `member` belongs to, if any.
pub async fn find_plan_id_by_member(conn: &mut PgConnection, member: &str) -> Result<Option<Uuid>> {
    let id: Option<Uuid> = sqlx::query_scalar("SELECT plan_id FROM plan_members WHERE member = $1")
        .bind(member)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("failed to look up plan for member {member:?}"))?;

    Ok(id)
}

/// Return the ID of a plan other than `exclude` that contains `member`.
pub async fn find_other_plan_id_containing(
    conn: &mut PgConnection,
    member: &str,
    exclude: Uuid,
) -> Result<Option<Uuid>> {
    let id: Option<Uuid> = sqlx::query_scalar(
        "SELECT plan_id FROM plan_members WHERE member = $1 AND plan_id <> $2",
    )
    .bind(member)
    .bind(exclude)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("failed to check other plans for member {member:?}"))?;

    Ok(id)
}

/// List a plan's members in insertion order.
pub async fn list_members(conn: &mut PgConnection, plan_id: Uuid) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT member FROM plan_members WHERE plan_id = $1 ORDER BY position",
    )
    .bind(plan_id)
    .fetch_all(&mut *conn)
    .await
    .context("failed to list plan members")?;

    Ok(rows.into_iter().map(|(member,)| member).collect())
}

/// Replace the member list of a plan.
///
/// Fails with a unique violation on `plan_members_pkey` if any member is
/// already indexed under another plan.
pub async fn replace_members(
    conn: &mut PgConnection,
    plan_id: Uuid,
    members: &[String],
) -> Result<()> {
    sqlx::query("DELETE FROM plan_members WHERE plan_id = $1")
        .bind(plan_id)
        .execute(&mut *conn)
        .await
        .context("failed to clear plan members")?;

    for (position, member) in members.iter().enumerate() {
        sqlx::query("INSERT INTO plan_members (member, plan_id, position) VALUES ($1, $2, $3)")
            .bind(member)
            .bind(plan_id)
            .bind(position as i32)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to add member {member:?} to plan {plan_id}"))?;
    }

    Ok(())
}
