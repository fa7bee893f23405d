use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A row of the `plans` table. Members live in `plan_members`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub out_of_town_contact: String,
    pub neighborhood_meeting_place: String,
    pub regional_meeting_place: String,
    pub evacuation_location: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl PlanRow {
    /// The free-text fields of this row.
    pub fn fields(&self) -> PlanFields {
        PlanFields {
            out_of_town_contact: self.out_of_town_contact.clone(),
            neighborhood_meeting_place: self.neighborhood_meeting_place.clone(),
            regional_meeting_place: self.regional_meeting_place.clone(),
            evacuation_location: self.evacuation_location.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// The user-editable text of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFields {
    pub out_of_town_contact: String,
    pub neighborhood_meeting_place: String,
    pub regional_meeting_place: String,
    pub evacuation_location: String,
}
