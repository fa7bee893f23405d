//! What the plan pages show, independent of how they are rendered.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::identity::MemberId;

use super::{MAX_FAMILY_MEMBERS, Plan, PlanFields};

/// Member emails followed by empty strings, `slots` entries in total.
///
/// Members beyond `slots` are cut off.
pub fn padded_member_emails(members: &[MemberId], slots: usize) -> Vec<String> {
    let mut emails: Vec<String> = members
        .iter()
        .take(slots)
        .map(|m| m.email().to_owned())
        .collect();
    emails.resize(slots, String::new());
    emails
}

/// A plan as seen by one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanView {
    pub plan_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub fields: PlanFields,
    /// Exactly [`MAX_FAMILY_MEMBERS`] entries, blank-padded.
    pub member_emails: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl PlanView {
    pub fn new(plan: &Plan, user: &MemberId) -> Self {
        Self {
            plan_id: plan.id,
            user_name: user.nickname().to_owned(),
            user_email: user.email().to_owned(),
            fields: plan.fields.clone(),
            member_emails: padded_member_emails(&plan.family_members, MAX_FAMILY_MEMBERS),
            last_updated: plan.last_updated,
        }
    }

    /// Member emails without the padding.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.member_emails
            .iter()
            .map(String::as_str)
            .filter(|e| !e.is_empty())
    }

    /// The `<plan>` document served by `/fetchplan`.
    pub fn to_xml(&self) -> Result<String> {
        let doc = PlanXml {
            user_name: &self.user_name,
            user_email: &self.user_email,
            out_of_town_contact: &self.fields.out_of_town_contact,
            neighborhood_meeting_place: &self.fields.neighborhood_meeting_place,
            regional_meeting_place: &self.fields.regional_meeting_place,
            evacuation_location: &self.fields.evacuation_location,
            family_member: self.members().collect(),
        };
        let body = quick_xml::se::to_string(&doc).context("failed to serialize plan as XML")?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}"))
    }
}

#[derive(Serialize)]
#[serde(rename = "plan")]
struct PlanXml<'a> {
    user_name: &'a str,
    user_email: &'a str,
    out_of_town_contact: &'a str,
    neighborhood_meeting_place: &'a str,
    regional_meeting_place: &'a str,
    evacuation_location: &'a str,
    family_member: Vec<&'a str>,
}
