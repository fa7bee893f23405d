//! Family emergency plans: member identities, the plan store abstraction
//! with its PostgreSQL and in-memory implementations, and the plan service
//! that enforces one-plan-per-member.

pub mod error;
pub mod identity;
pub mod plan;
pub mod store;

pub use error::{ServiceError, StoreError};
pub use identity::{MemberId, MemberIdError};
pub use plan::{ConflictList, MAX_FAMILY_MEMBERS, Plan, PlanFields, PlanService, PlanView};
