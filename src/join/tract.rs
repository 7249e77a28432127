//! Point-in-polygon assignment of stops to census tracts.
//!
//! Containment is strict: a stop lying exactly on a tract boundary is not
//! inside that tract. Tract partitions should not overlap; if they do, the
//! first containing tract in input order is used.

use geo::{BoundingRect, Contains, Intersects, Rect};
use tracing::{info, warn};

use super::JoinError;
use crate::geometry::Layer;
use crate::model::{Stop, StopTractAssignment, Tract};

/// Assigns each stop to the tract whose interior contains it. Returns one
/// row per stop, in stop order.
#[tracing::instrument(skip_all, fields(stops = stops.len(), tracts = tracts.len()))]
pub fn assign_tracts(
    stops: &Layer<Stop>,
    tracts: &Layer<Tract>,
) -> Result<Vec<StopTractAssignment>, JoinError> {
    if stops.crs != tracts.crs {
        return Err(JoinError::CrsMismatch {
            left: stops.crs,
            right: tracts.crs,
        });
    }

    let bounds: Vec<Option<Rect<f64>>> = tracts
        .features
        .iter()
        .map(|t| t.boundary.bounding_rect())
        .collect();

    let mut overlapping = 0usize;
    let assignments: Vec<StopTractAssignment> = stops
        .features
        .iter()
        .map(|stop| {
            let mut containing = tracts
                .features
                .iter()
                .zip(&bounds)
                .filter(|(_, rect)| rect.is_some_and(|r| r.intersects(&stop.location)))
                .filter(|(tract, _)| tract.boundary.0.iter().any(|p| p.contains(&stop.location)))
                .map(|(tract, _)| tract);

            let first = containing.next();
            if first.is_some() && containing.next().is_some() {
                overlapping += 1;
            }

            StopTractAssignment {
                stop_id: stop.stop_id.clone(),
                census_tract: first.map(|t| t.census_tract.clone()),
            }
        })
        .collect();

    if overlapping > 0 {
        warn!(overlapping, "Stops contained by more than one tract; first match kept");
    }
    let assigned = assignments.iter().filter(|a| a.census_tract.is_some()).count();
    info!(
        assigned,
        unassigned = assignments.len() - assigned,
        "Stops matched to tracts"
    );
    Ok(assignments)
}
