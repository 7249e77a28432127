//! Relational merges behind the `StopIncome` and `JoinedResult` stages.
//!
//! All merges are inner joins with explicit keys. Lookup tables keep the
//! first row seen for a key, and outputs keep the first row seen for a
//! `stop_id`, so the result is unique on `stop_id` and stable for a fixed
//! input order.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::model::{
    IncomeRecord, JoinedRecord, RouteName, Stop, StopIncome, StopRouteAssignment,
    StopTractAssignment, TractPopulation,
};

/// Builds a first-occurrence lookup keyed by `key`.
fn first_by_key<'a, T>(rows: &'a [T], key: impl Fn(&'a T) -> &'a str) -> HashMap<&'a str, &'a T> {
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        map.entry(key(row)).or_insert(row);
    }
    map
}

/// Joins stops to tract income and population.
///
/// `assignments` is the tract join output for `stops`: one row per stop,
/// in stop order, so each assignment is paired with the stop at the same
/// position. Tract attributes are keyed on `census_tract` (⋈ income,
/// ⋈ population). Rows without a tract, without income or
/// population for their tract, or with a non-positive income are dropped.
/// Stop attributes come from the stop; tract attributes come from the
/// income and population tables. `ridership_agency` is resolved from the
/// stop's agency through `aliases`.
///
/// # Panics
///
/// Panics if `assignments` and `stops` differ in length.
pub fn merge_stop_income(
    stops: &[Stop],
    assignments: &[StopTractAssignment],
    income: &[IncomeRecord],
    population: &[TractPopulation],
    aliases: &HashMap<String, String>,
) -> Vec<StopIncome> {
    assert_eq!(
        stops.len(),
        assignments.len(),
        "tract assignments must pair one-to-one with stops"
    );
    let income_by_tract = first_by_key(income, |r| r.census_tract.as_str());
    let population_by_tract = first_by_key(population, |r| r.census_tract.as_str());

    let mut seen = HashSet::new();
    let mut suppressed = 0usize;
    let mut rows = Vec::new();

    for (stop, assignment) in stops.iter().zip(assignments) {
        debug_assert_eq!(stop.stop_id, assignment.stop_id);
        let Some(tract) = assignment.census_tract.as_deref() else {
            continue;
        };
        let (Some(income), Some(population)) = (
            income_by_tract.get(tract),
            population_by_tract.get(tract),
        ) else {
            continue;
        };
        // Census encodes suppressed estimates as large negative numbers.
        let value = income.median_household_income;
        if value.is_nan() || value <= 0.0 {
            suppressed += 1;
            continue;
        }
        if !seen.insert(stop.stop_id.as_str()) {
            continue;
        }

        rows.push(StopIncome {
            stop_id: stop.stop_id.clone(),
            stop_name: stop.name.clone(),
            agency: stop.agency.clone(),
            ridership_agency: stop
                .agency
                .as_ref()
                .and_then(|a| aliases.get(a))
                .cloned(),
            longitude: stop.location.x(),
            latitude: stop.location.y(),
            census_tract: tract.to_string(),
            median_household_income: income.median_household_income,
            population: population.population,
        });
    }

    info!(
        stops = stops.len(),
        rows = rows.len(),
        suppressed_income = suppressed,
        "Stop income merged"
    );
    rows
}

/// Joins stop income to route assignments and route names.
///
/// Keys: `stop_id` (stop income ⋈ route assignment), then `route_id`
/// (⋈ route names). Unassigned stops and assignments to unknown routes are
/// dropped. On overlapping columns the stop income row wins; only the
/// route columns and the assignment distance are taken from the right side.
pub fn merge_joined(
    stop_income: &[StopIncome],
    stop_routes: &[StopRouteAssignment],
    routes: &[RouteName],
) -> Vec<JoinedRecord> {
    let assignment_by_stop = first_by_key(stop_routes, |a| a.stop_id.as_str());
    let route_by_id = first_by_key(routes, |r| r.route_id.as_str());

    let mut seen = HashSet::new();
    let rows: Vec<JoinedRecord> = stop_income
        .iter()
        .filter_map(|income| {
            let assignment = assignment_by_stop.get(income.stop_id.as_str())?;
            let route = route_by_id.get(assignment.route_id.as_deref()?)?;
            seen.insert(income.stop_id.as_str()).then(|| JoinedRecord {
                stop_id: income.stop_id.clone(),
                stop_name: income.stop_name.clone(),
                agency: income.agency.clone(),
                ridership_agency: income.ridership_agency.clone(),
                longitude: income.longitude,
                latitude: income.latitude,
                census_tract: income.census_tract.clone(),
                median_household_income: income.median_household_income,
                population: income.population,
                route_id: route.route_id.clone(),
                route_short_name: route.route_short_name.clone(),
                route_long_name: route.route_long_name.clone(),
                route_distance: assignment.distance,
            })
        })
        .collect();

    info!(
        stop_income = stop_income.len(),
        rows = rows.len(),
        "Joined result merged"
    );
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use pretty_assertions::assert_eq;

    fn stop(id: &str, agency: Option<&str>) -> Stop {
        Stop {
            stop_id: id.to_string(),
            name: Some(format!("Stop {id}")),
            agency: agency.map(str::to_string),
            location: Point::new(-71.0, 42.0),
        }
    }

    fn tract_of(stop_id: &str, tract: Option<&str>) -> StopTractAssignment {
        StopTractAssignment {
            stop_id: stop_id.to_string(),
            census_tract: tract.map(str::to_string),
        }
    }

    fn income(tract: &str, value: f64) -> IncomeRecord {
        IncomeRecord {
            census_tract: tract.to_string(),
            median_household_income: value,
        }
    }

    fn population(tract: &str, value: i64) -> TractPopulation {
        TractPopulation {
            census_tract: tract.to_string(),
            population: value,
        }
    }

    fn stop_income_row(id: &str, tract: &str, income: f64) -> StopIncome {
        StopIncome {
            stop_id: id.to_string(),
            stop_name: Some(format!("Stop {id}")),
            agency: None,
            ridership_agency: None,
            longitude: -71.0,
            latitude: 42.0,
            census_tract: tract.to_string(),
            median_household_income: income,
            population: 1000,
        }
    }

    fn route_of(stop_id: &str, route: Option<&str>) -> StopRouteAssignment {
        StopRouteAssignment {
            stop_id: stop_id.to_string(),
            route_id: route.map(str::to_string),
            distance: route.map(|_| 12.5),
        }
    }

    fn route_name(id: &str) -> RouteName {
        RouteName {
            route_id: id.to_string(),
            route_short_name: Some(id.to_uppercase()),
            route_long_name: Some(format!("Route {id}")),
        }
    }

    #[test]
    fn test_stop_income_drops_unmatched_and_suppressed() {
        let stops = vec![
            stop("1", None),
            stop("2", None),
            stop("3", None),
            stop("4", None),
        ];
        let assignments = vec![
            tract_of("1", Some("25001")),
            tract_of("2", None),
            tract_of("3", Some("25002")),
            tract_of("4", Some("25999")),
        ];
        let incomes = vec![income("25001", 52_000.0), income("25002", -666_666_666.0)];
        let populations = vec![population("25001", 4000), population("25002", 3000)];

        let rows = merge_stop_income(&stops, &assignments, &incomes, &populations, &HashMap::new());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stop_id, "1");
        assert_eq!(rows[0].census_tract, "25001");
        assert_eq!(rows[0].population, 4000);
        assert!(rows.iter().all(|r| r.median_household_income > 0.0));
    }

    #[test]
    fn test_stop_income_zero_and_nan_income_are_filtered() {
        let stops = vec![stop("1", None), stop("2", None)];
        let assignments = vec![tract_of("1", Some("a")), tract_of("2", Some("b"))];
        let incomes = vec![income("a", 0.0), income("b", f64::NAN)];
        let populations = vec![population("a", 1), population("b", 1)];

        let rows = merge_stop_income(&stops, &assignments, &incomes, &populations, &HashMap::new());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_stop_income_keeps_first_occurrence_of_stop() {
        let stops = vec![stop("1", None), stop("1", None)];
        let assignments = vec![tract_of("1", Some("a")), tract_of("1", Some("b"))];
        let incomes = vec![income("a", 10.0), income("b", 20.0), income("a", 99.0)];
        let populations = vec![population("a", 1), population("b", 2)];

        let rows = merge_stop_income(&stops, &assignments, &incomes, &populations, &HashMap::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].census_tract, "a");
        assert_eq!(rows[0].median_household_income, 10.0);
    }

    #[test]
    fn test_duplicate_stop_id_row_comes_from_a_single_stop() {
        let first = Stop {
            location: Point::new(1.0, 1.0),
            name: Some("first".into()),
            ..stop("1", None)
        };
        let second = Stop {
            location: Point::new(15.0, 5.0),
            name: Some("second".into()),
            ..stop("1", None)
        };
        let assignments = vec![tract_of("1", Some("A")), tract_of("1", Some("B"))];
        let incomes = vec![income("A", -666_666_666.0), income("B", 20.0)];
        let populations = vec![population("A", 1), population("B", 2)];

        let rows = merge_stop_income(
            &[first, second],
            &assignments,
            &incomes,
            &populations,
            &HashMap::new(),
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].census_tract, "B");
        assert_eq!(rows[0].stop_name.as_deref(), Some("second"));
        assert_eq!((rows[0].longitude, rows[0].latitude), (15.0, 5.0));
        assert_eq!(rows[0].population, 2);
    }

    #[test]
    #[should_panic(expected = "pair one-to-one")]
    fn test_misaligned_assignments_panic() {
        merge_stop_income(
            &[stop("1", None)],
            &[],
            &[income("a", 1.0)],
            &[population("a", 1)],
            &HashMap::new(),
        );
    }

    #[test]
    fn test_stop_income_resolves_ridership_agency() {
        let aliases = HashMap::from([(
            "CapeCodRTA".to_string(),
            "Cape Cod Regional Transit Authority".to_string(),
        )]);
        let stops = vec![stop("1", Some("CapeCodRTA")), stop("2", Some("Unknown"))];
        let assignments = vec![tract_of("1", Some("a")), tract_of("2", Some("a"))];
        let rows = merge_stop_income(
            &stops,
            &assignments,
            &[income("a", 1.0)],
            &[population("a", 1)],
            &aliases,
        );
        assert_eq!(
            rows[0].ridership_agency.as_deref(),
            Some("Cape Cod Regional Transit Authority")
        );
        assert_eq!(rows[1].ridership_agency, None);
    }

    #[test]
    fn test_joined_inner_joins_on_stop_then_route() {
        let income_rows = vec![
            stop_income_row("1", "a", 10.0),
            stop_income_row("2", "a", 10.0),
            stop_income_row("3", "b", 20.0),
            stop_income_row("4", "b", 20.0),
        ];
        let assignments = vec![
            route_of("1", Some("r1")),
            route_of("2", None),
            route_of("3", Some("missing")),
        ];
        let rows = merge_joined(&income_rows, &assignments, &[route_name("r1")]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stop_id, "1");
        assert_eq!(rows[0].route_id, "r1");
        assert_eq!(rows[0].route_short_name.as_deref(), Some("R1"));
        assert_eq!(rows[0].route_distance, Some(12.5));
    }

    #[test]
    fn test_joined_prefers_stop_income_columns_and_dedups() {
        let income_rows = vec![
            stop_income_row("1", "a", 10.0),
            stop_income_row("1", "b", 99.0),
        ];
        let assignments = vec![route_of("1", Some("r1")), route_of("1", Some("r2"))];
        let rows = merge_joined(
            &income_rows,
            &assignments,
            &[route_name("r1"), route_name("r2"), route_name("r1")],
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].census_tract, "a");
        assert_eq!(rows[0].median_household_income, 10.0);
        assert_eq!(rows[0].route_id, "r1");
        assert_eq!(rows[0].stop_name.as_deref(), Some("Stop 1"));
    }
}
