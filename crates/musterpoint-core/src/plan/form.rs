//! Turning submitted form fields into a plan update.

use std::collections::HashMap;

use thiserror::Error;

use crate::identity::{MemberId, MemberIdError};

use super::{MAX_FAMILY_MEMBERS, PlanFields, dedup_members};

/// Prefix of the member inputs: `family_member0` .. `family_member19`.
pub const FAMILY_MEMBER_FIELD: &str = "family_member";

pub const OUT_OF_TOWN_CONTACT_FIELD: &str = "out_of_town_contact";
pub const NEIGHBORHOOD_MEETING_PLACE_FIELD: &str = "neighborhood_meeting_place";
pub const REGIONAL_MEETING_PLACE_FIELD: &str = "regional_meeting_place";
pub const EVACUATION_LOCATION_FIELD: &str = "evacuation_location";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("invalid family member in field {field}: {source}")]
    InvalidMember {
        field: String,
        #[source]
        source: MemberIdError,
    },
}

/// A validated plan form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSubmission {
    pub fields: PlanFields,
    /// At most [`MAX_FAMILY_MEMBERS`], no duplicates, in field order.
    pub members: Vec<MemberId>,
}

impl PlanSubmission {
    /// Read a submission from urlencoded form fields.
    ///
    /// Blank member inputs are skipped and inputs past
    /// `family_member{MAX_FAMILY_MEMBERS - 1}` are ignored. Missing text
    /// fields read as empty.
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, SubmissionError> {
        let text = |name: &str| form.get(name).cloned().unwrap_or_default();

        let mut members = Vec::new();
        for index in 0..MAX_FAMILY_MEMBERS {
            let field = format!("{FAMILY_MEMBER_FIELD}{index}");
            let Some(raw) = form.get(&field) else {
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }
            let member = MemberId::parse(raw)
                .map_err(|source| SubmissionError::InvalidMember { field, source })?;
            members.push(member);
        }

        Ok(Self {
            fields: PlanFields {
                out_of_town_contact: text(OUT_OF_TOWN_CONTACT_FIELD),
                neighborhood_meeting_place: text(NEIGHBORHOOD_MEETING_PLACE_FIELD),
                regional_meeting_place: text(REGIONAL_MEETING_PLACE_FIELD),
                evacuation_location: text(EVACUATION_LOCATION_FIELD),
            },
            members: dedup_members(members),
        })
    }
}
