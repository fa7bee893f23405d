//! Family plans: the domain record, the service that reads and writes it,
//! form parsing and page views.

pub mod form;
pub mod service;
pub mod view;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use musterpoint_db::models::PlanFields;

use crate::identity::MemberId;

pub use form::{PlanSubmission, SubmissionError};
pub use service::PlanService;
pub use view::{PlanView, padded_member_emails};

/// Most family members a single submission may carry.
pub const MAX_FAMILY_MEMBERS: usize = 20;

/// A family group's emergency meeting plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub fields: PlanFields,
    /// Members in insertion order. No member appears in two plans.
    pub family_members: Vec<MemberId>,
    pub created_at: DateTime<Utc>,
    /// `None` until the first successful save.
    pub last_updated: Option<DateTime<Utc>>,
}

impl Plan {
    /// A fresh plan whose only member is `member`.
    pub fn new(id: Uuid, member: MemberId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            fields: PlanFields::default(),
            family_members: vec![member],
            created_at,
            last_updated: None,
        }
    }

    pub fn has_member(&self, member: &MemberId) -> bool {
        self.family_members.contains(member)
    }
}

/// Proposed members that already belong to a different plan.
///
/// Empty means the save went through.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictList(Vec<MemberId>);

impl ConflictList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn members(&self) -> &[MemberId] {
        &self.0
    }
}

impl From<Vec<MemberId>> for ConflictList {
    fn from(members: Vec<MemberId>) -> Self {
        Self(members)
    }
}

impl<'a> IntoIterator for &'a ConflictList {
    type Item = &'a MemberId;
    type IntoIter = std::slice::Iter<'a, MemberId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Drop repeated members, keeping the first occurrence of each.
pub fn dedup_members(members: impl IntoIterator<Item = MemberId>) -> Vec<MemberId> {
    let mut out: Vec<MemberId> = Vec::new();
    for member in members {
        if !out.contains(&member) {
            out.push(member);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MemberId {
        MemberId::parse(s).unwrap()
    }

    #[test]
    fn new_plan_has_single_member_and_no_update() {
        let plan = Plan::new(Uuid::new_v4(), id("a@x.org"), Utc::now());
        assert_eq!(plan.family_members, vec![id("a@x.org")]);
        assert!(plan.has_member(&id("A@x.org")));
        assert!(plan.last_updated.is_none());
        assert_eq!(plan.fields, PlanFields::default());
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let out = dedup_members(vec![id("b@x.org"), id("a@x.org"), id("B@x.org"), id("c@x.org")]);
        assert_eq!(out, vec![id("b@x.org"), id("a@x.org"), id("c@x.org")]);
    }

    #[test]
    fn conflict_list_emptiness() {
        assert!(ConflictList::default().is_empty());
        let list = ConflictList::from(vec![id("a@x.org")]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.members(), &[id("a@x.org")]);
    }
}
