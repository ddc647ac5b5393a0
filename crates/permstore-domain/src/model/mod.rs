//! Permission data model.
//!
//! This module contains:
//! - Resource types (Role, Account, Application, ...) and their tagged union
//! - `UserPermission`, a user's resources grouped by type plus global flags

mod permission;
mod types;
#[cfg(test)]
mod types_proptest;

pub use permission::{ResourceMap, UserPermission, UNRESTRICTED_USERNAME};
pub use types::*;
