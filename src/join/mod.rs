//! Spatial and relational joins.
//!
//! The spatial joins are pure functions over [`Layer`](crate::geometry::Layer)s
//! and require both inputs in the same reference frame. The relational
//! merges in [`merge`] spell out their keys and which side wins on a
//! column collision.

pub mod merge;
pub mod nearest;
pub mod tract;

pub use merge::{merge_joined, merge_stop_income};
pub use nearest::{AssignmentPolicy, RouteJoinConfig, RouteScan, assign_routes};
pub use tract::assign_tracts;

use thiserror::Error;

use crate::geometry::Crs;

#[derive(Debug, Error, PartialEq)]
pub enum JoinError {
    #[error("reference frame mismatch: {left} vs {right}; reproject before joining")]
    CrsMismatch { left: Crs, right: Crs },
}
