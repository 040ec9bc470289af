//! Authorization and membership
//!
//! - [`resolver`]: effective role and permission set for a (user, workspace,
//!   channel) triple
//! - [`guard`]: yes/no decisions with a typed [`Denial`]
//! - [`membership`]: the invite/join/leave/remove state machine

pub mod error;
pub mod guard;
pub mod membership;
pub mod resolver;

pub use error::{AccessError, AccessResult, Denial};
pub use guard::{AccessGuard, Grant};
pub use membership::MembershipService;
pub use resolver::{AccessSnapshot, PermissionResolver, ResolvedAccess, RoleSource};
