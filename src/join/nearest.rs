//! Nearest-route assignment.
//!
//! Every stop is matched against every route and assigned to the route with
//! the smallest point-to-line distance. The first route in input order wins
//! ties. Two scan strategies produce identical output:
//!
//! - [`RouteScan::Naive`] computes the full pairwise distance matrix.
//! - [`RouteScan::Indexed`] loads every route segment into an R-tree and only
//!   computes exact distances for routes whose segments fall inside the
//!   nearest-segment radius. The winner is still the full argmin.
//!
//! The stop scan can run on a rayon pool of `workers` threads. Results are
//! collected in stop order, so they do not depend on the worker count.

use std::collections::BTreeSet;

use geo::{EuclideanDistance, Point};
use rstar::primitives::{GeomWithData, Line};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use rstar::{PointDistance, RTree};
use tracing::{debug, info, warn};

use super::JoinError;
use crate::geometry::Layer;
use crate::model::{Route, Stop, StopRouteAssignment};

/// Relative slack applied to the R-tree radius so that rounding differences
/// between the index distance and the exact distance never drop a candidate.
const INDEX_RADIUS_SLACK: f64 = 1e-9;

type IndexedSegment = GeomWithData<Line<[f64; 2]>, usize>;

/// Which stops receive a route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssignmentPolicy {
    /// Unconditional argmin over all routes.
    GlobalNearest,
    /// Argmin, kept only when the distance is at most `threshold` (in the
    /// units of the layers' reference frame).
    Threshold { threshold: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScan {
    Naive,
    Indexed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteJoinConfig {
    pub policy: AssignmentPolicy,
    pub scan: RouteScan,
    pub workers: usize,
}

impl Default for RouteJoinConfig {
    fn default() -> Self {
        Self {
            policy: AssignmentPolicy::GlobalNearest,
            scan: RouteScan::Indexed,
            workers: 1,
        }
    }
}

/// Assigns each stop to its nearest route. Returns exactly one row per
/// stop, in stop order.
#[tracing::instrument(skip_all, fields(stops = stops.len(), routes = routes.len(), policy = ?config.policy, scan = ?config.scan))]
pub fn assign_routes(
    stops: &Layer<Stop>,
    routes: &Layer<Route>,
    config: &RouteJoinConfig,
) -> Result<Vec<StopRouteAssignment>, JoinError> {
    if stops.crs != routes.crs {
        return Err(JoinError::CrsMismatch {
            left: stops.crs,
            right: routes.crs,
        });
    }

    let index = match config.scan {
        RouteScan::Indexed => Some(build_index(&routes.features)),
        RouteScan::Naive => None,
    };
    let scanner = Scanner {
        routes: &routes.features,
        index: index.as_ref(),
        policy: config.policy,
    };

    let workers = config.workers.max(1);
    let assignments = if workers == 1 || stops.len() < 2 {
        scanner.assign_all(&stops.features)
    } else {
        debug!(workers, "Scanning stops on a worker pool");
        match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| scanner.assign_par(&stops.features)),
            Err(e) => {
                warn!(error = %e, "Worker pool unavailable, using the global pool");
                scanner.assign_par(&stops.features)
            }
        }
    };

    let assigned = assignments.iter().filter(|a| a.route_id.is_some()).count();
    info!(
        assigned,
        unassigned = assignments.len() - assigned,
        "Stops matched to routes"
    );
    Ok(assignments)
}

struct Scanner<'a> {
    routes: &'a [Route],
    index: Option<&'a RTree<IndexedSegment>>,
    policy: AssignmentPolicy,
}

impl Scanner<'_> {
    fn assign_all(&self, stops: &[Stop]) -> Vec<StopRouteAssignment> {
        stops.iter().map(|stop| self.assign(stop)).collect()
    }

    /// Indexed collect keeps stop order.
    fn assign_par(&self, stops: &[Stop]) -> Vec<StopRouteAssignment> {
        stops.par_iter().map(|stop| self.assign(stop)).collect()
    }

    fn assign(&self, stop: &Stop) -> StopRouteAssignment {
        let nearest = match self.index {
            Some(tree) => self.nearest_indexed(tree, stop.location),
            None => nearest_among(stop.location, self.routes.iter().enumerate()),
        };

        let nearest = nearest.filter(|&(_, distance)| match self.policy {
            AssignmentPolicy::GlobalNearest => true,
            AssignmentPolicy::Threshold { threshold } => distance <= threshold,
        });

        match nearest {
            Some((idx, distance)) => StopRouteAssignment {
                stop_id: stop.stop_id.clone(),
                route_id: Some(self.routes[idx].route_id.clone()),
                distance: Some(distance),
            },
            None => StopRouteAssignment {
                stop_id: stop.stop_id.clone(),
                route_id: None,
                distance: None,
            },
        }
    }

    fn nearest_indexed(&self, tree: &RTree<IndexedSegment>, point: Point<f64>) -> Option<(usize, f64)> {
        let query = [point.x(), point.y()];
        let closest = tree.nearest_neighbor(&query)?;
        let radius = closest.distance_2(&query).sqrt() * (1.0 + INDEX_RADIUS_SLACK) + INDEX_RADIUS_SLACK;

        // BTreeSet keeps candidates in route order, which preserves the
        // first-seen tie-break of the naive scan.
        let candidates: BTreeSet<usize> = tree
            .locate_within_distance(query, radius * radius)
            .map(|segment| segment.data)
            .collect();

        nearest_among(point, candidates.into_iter().map(|i| (i, &self.routes[i])))
    }
}

/// Strict argmin over `(index, route)` pairs in iteration order. Routes with
/// no segments never match.
fn nearest_among<'r>(
    point: Point<f64>,
    routes: impl Iterator<Item = (usize, &'r Route)>,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, route) in routes {
        let Some(distance) = route_distance(point, route) else {
            continue;
        };
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((idx, distance));
        }
    }
    best
}

/// Minimum distance from `point` to any line string of `route`.
pub fn route_distance(point: Point<f64>, route: &Route) -> Option<f64> {
    route
        .geometry
        .0
        .iter()
        .filter(|line| line.0.len() >= 2)
        .map(|line| point.euclidean_distance(line))
        .min_by(|a, b| a.total_cmp(b))
}

fn build_index(routes: &[Route]) -> RTree<IndexedSegment> {
    let segments: Vec<IndexedSegment> = routes
        .iter()
        .enumerate()
        .flat_map(|(idx, route)| {
            route.geometry.0.iter().flat_map(move |line| {
                line.lines().map(move |segment| {
                    GeomWithData::new(
                        Line::new(
                            [segment.start.x, segment.start.y],
                            [segment.end.x, segment.end.y],
                        ),
                        idx,
                    )
                })
            })
        })
        .collect();
    debug!(segments = segments.len(), "Built route segment index");
    RTree::bulk_load(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Crs;
    use geo::{LineString, MultiLineString};

    fn stop(id: &str, x: f64, y: f64) -> Stop {
        Stop {
            stop_id: id.to_string(),
            name: None,
            agency: None,
            location: Point::new(x, y),
        }
    }

    fn route(id: &str, coords: &[(f64, f64)]) -> Route {
        Route {
            route_id: id.to_string(),
            short_name: None,
            long_name: None,
            geometry: MultiLineString::new(vec![LineString::from(coords.to_vec())]),
        }
    }

    fn layers(stops: Vec<Stop>, routes: Vec<Route>) -> (Layer<Stop>, Layer<Route>) {
        (
            Layer::new(Crs::WebMercator, stops),
            Layer::new(Crs::WebMercator, routes),
        )
    }

    fn config(policy: AssignmentPolicy, scan: RouteScan) -> RouteJoinConfig {
        RouteJoinConfig {
            policy,
            scan,
            workers: 1,
        }
    }

    fn route_ids(rows: &[StopRouteAssignment]) -> Vec<Option<&str>> {
        rows.iter().map(|r| r.route_id.as_deref()).collect()
    }

    #[test]
    fn test_straight_line_scenario() {
        let (stops, routes) = layers(
            vec![stop("near", 5.0, 1.0), stop("far", 5.0, 5.0)],
            vec![route("r1", &[(0.0, 0.0), (10.0, 0.0)])],
        );

        for scan in [RouteScan::Naive, RouteScan::Indexed] {
            let gated = assign_routes(
                &stops,
                &routes,
                &config(AssignmentPolicy::Threshold { threshold: 2.0 }, scan),
            )
            .unwrap();
            assert_eq!(route_ids(&gated), vec![Some("r1"), None]);
            assert!((gated[0].distance.unwrap() - 1.0).abs() < 1e-12);
            assert_eq!(gated[1].distance, None);

            let global =
                assign_routes(&stops, &routes, &config(AssignmentPolicy::GlobalNearest, scan))
                    .unwrap();
            assert_eq!(route_ids(&global), vec![Some("r1"), Some("r1")]);
            assert!((global[1].distance.unwrap() - 5.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (stops, routes) = layers(
            vec![stop("edge", 5.0, 2.0)],
            vec![route("r1", &[(0.0, 0.0), (10.0, 0.0)])],
        );
        let rows = assign_routes(
            &stops,
            &routes,
            &config(AssignmentPolicy::Threshold { threshold: 2.0 }, RouteScan::Naive),
        )
        .unwrap();
        assert_eq!(route_ids(&rows), vec![Some("r1")]);
    }

    #[test]
    fn test_equidistant_stop_picks_first_route() {
        let (stops, routes) = layers(
            vec![stop("middle", 5.0, 0.0)],
            vec![
                route("north", &[(0.0, 1.0), (10.0, 1.0)]),
                route("south", &[(0.0, -1.0), (10.0, -1.0)]),
            ],
        );
        for scan in [RouteScan::Naive, RouteScan::Indexed] {
            let rows =
                assign_routes(&stops, &routes, &config(AssignmentPolicy::GlobalNearest, scan))
                    .unwrap();
            assert_eq!(route_ids(&rows), vec![Some("north")]);
        }

        // Reversing input order flips the winner: the tie-break is positional.
        let (stops, routes) = layers(
            vec![stop("middle", 5.0, 0.0)],
            vec![
                route("south", &[(0.0, -1.0), (10.0, -1.0)]),
                route("north", &[(0.0, 1.0), (10.0, 1.0)]),
            ],
        );
        for scan in [RouteScan::Naive, RouteScan::Indexed] {
            let rows =
                assign_routes(&stops, &routes, &config(AssignmentPolicy::GlobalNearest, scan))
                    .unwrap();
            assert_eq!(route_ids(&rows), vec![Some("south")]);
        }
    }

    #[test]
    fn test_no_routes_leaves_every_stop_unassigned() {
        let (stops, routes) = layers(vec![stop("a", 0.0, 0.0), stop("b", 1.0, 1.0)], vec![]);
        for scan in [RouteScan::Naive, RouteScan::Indexed] {
            let rows =
                assign_routes(&stops, &routes, &config(AssignmentPolicy::GlobalNearest, scan))
                    .unwrap();
            assert_eq!(rows.len(), 2);
            assert!(rows.iter().all(|r| r.route_id.is_none()));
        }
    }

    #[test]
    fn test_one_row_per_stop_including_duplicate_ids() {
        let (stops, routes) = layers(
            vec![stop("a", 0.0, 0.0), stop("a", 3.0, 3.0), stop("b", 9.0, 9.0)],
            vec![route("r1", &[(0.0, 0.0), (10.0, 0.0)])],
        );
        let rows = assign_routes(&stops, &routes, &RouteJoinConfig::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.stop_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "a", "b"]
        );
    }

    #[test]
    fn test_crs_mismatch_fails_fast() {
        let stops = Layer::new(Crs::Wgs84, vec![stop("a", -71.0, 42.0)]);
        let routes = Layer::new(
            Crs::WebMercator,
            vec![route("r1", &[(0.0, 0.0), (10.0, 0.0)])],
        );
        let err = assign_routes(&stops, &routes, &RouteJoinConfig::default()).unwrap_err();
        assert_eq!(
            err,
            JoinError::CrsMismatch {
                left: Crs::Wgs84,
                right: Crs::WebMercator
            }
        );
    }

    /// A grid of horizontal and vertical routes with stops scattered between
    /// them, including stops that sit exactly on crossings.
    fn grid() -> (Layer<Stop>, Layer<Route>) {
        let mut routes = Vec::new();
        for i in 0..6 {
            let c = i as f64 * 10.0;
            routes.push(route(&format!("h{i}"), &[(0.0, c), (50.0, c)]));
            routes.push(route(&format!("v{i}"), &[(c, 0.0), (c, 50.0)]));
        }
        routes.push(route("diag", &[(0.0, 0.0), (25.0, 25.0), (50.0, 0.0)]));

        let mut stops = Vec::new();
        for i in 0..40 {
            let x = (i * 7 % 53) as f64 + 0.5 * (i % 3) as f64;
            let y = (i * 11 % 47) as f64 + 0.25 * (i % 4) as f64;
            stops.push(stop(&format!("s{i}"), x, y));
        }
        stops.push(stop("crossing", 20.0, 20.0));
        stops.push(stop("outside", 80.0, -30.0));
        layers(stops, routes)
    }

    #[test]
    fn test_indexed_scan_matches_naive_scan() {
        let (stops, routes) = grid();
        for policy in [
            AssignmentPolicy::GlobalNearest,
            AssignmentPolicy::Threshold { threshold: 1.5 },
        ] {
            let naive = assign_routes(&stops, &routes, &config(policy, RouteScan::Naive)).unwrap();
            let indexed =
                assign_routes(&stops, &routes, &config(policy, RouteScan::Indexed)).unwrap();
            assert_eq!(route_ids(&naive), route_ids(&indexed));
        }
    }

    #[test]
    fn test_worker_count_does_not_change_result() {
        let (stops, routes) = grid();
        let single = assign_routes(&stops, &routes, &RouteJoinConfig::default()).unwrap();
        for workers in [2, 3, 8, 64] {
            let split = assign_routes(
                &stops,
                &routes,
                &RouteJoinConfig {
                    workers,
                    ..RouteJoinConfig::default()
                },
            )
            .unwrap();
            assert_eq!(single, split);
        }
    }

    #[test]
    fn test_worker_pool_keeps_stop_order_for_both_scans() {
        let (stops, routes) = grid();
        let expected: Vec<_> = stops.features.iter().map(|s| s.stop_id.as_str()).collect();
        for scan in [RouteScan::Naive, RouteScan::Indexed] {
            let cfg = RouteJoinConfig {
                policy: AssignmentPolicy::Threshold { threshold: 3.0 },
                scan,
                workers: 4,
            };
            let rows = assign_routes(&stops, &routes, &cfg).unwrap();
            let ids: Vec<_> = rows.iter().map(|r| r.stop_id.as_str()).collect();
            assert_eq!(ids, expected);

            let sequential = assign_routes(
                &stops,
                &routes,
                &RouteJoinConfig { workers: 1, ..cfg },
            )
            .unwrap();
            assert_eq!(rows, sequential);
        }
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let (stops, routes) = grid();
        let cfg = config(AssignmentPolicy::GlobalNearest, RouteScan::Naive);
        let first = assign_routes(&stops, &routes, &cfg).unwrap();
        let second = assign_routes(&stops, &routes, &cfg).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_raising_threshold_never_loses_assignments() {
        let (stops, routes) = grid();
        let mut previous = 0;
        for threshold in [0.0, 0.25, 0.5, 1.0, 2.0, 3.5, 5.0, 100.0] {
            let rows = assign_routes(
                &stops,
                &routes,
                &config(AssignmentPolicy::Threshold { threshold }, RouteScan::Indexed),
            )
            .unwrap();
            let assigned = rows.iter().filter(|r| r.route_id.is_some()).count();
            assert!(assigned >= previous, "threshold {threshold}: {assigned} < {previous}");
            previous = assigned;
        }
        assert_eq!(previous, stops.len());
    }

    #[test]
    fn test_multi_part_route_uses_closest_part() {
        let two_parts = Route {
            route_id: "split".into(),
            short_name: None,
            long_name: None,
            geometry: MultiLineString::new(vec![
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]),
                LineString::from(vec![(100.0, 0.0), (101.0, 0.0)]),
            ]),
        };
        let d = route_distance(Point::new(100.5, 3.0), &two_parts).unwrap();
        assert!((d - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_route_without_segments_never_matches() {
        let (stops, routes) = layers(
            vec![stop("a", 0.0, 0.0)],
            vec![route("empty", &[(0.0, 0.0)]), route("real", &[(5.0, 0.0), (5.0, 5.0)])],
        );
        for scan in [RouteScan::Naive, RouteScan::Indexed] {
            let rows =
                assign_routes(&stops, &routes, &config(AssignmentPolicy::GlobalNearest, scan))
                    .unwrap();
            assert_eq!(route_ids(&rows), vec![Some("real")]);
        }
    }
}
