//! Pipeline stages and their per-run state.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    RouteTable,
    TractPopulation,
    Ridership,
    CountyPopulation,
    StopIncome,
    StopRouteMap,
    JoinedResult,
}

impl Stage {
    /// All stages in execution order. Every stage appears after the stages
    /// it depends on.
    pub const ALL: [Stage; 7] = [
        Stage::RouteTable,
        Stage::TractPopulation,
        Stage::Ridership,
        Stage::CountyPopulation,
        Stage::StopIncome,
        Stage::StopRouteMap,
        Stage::JoinedResult,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Stage::RouteTable => "rta_bus_route_ma.csv",
            Stage::TractPopulation => "tract_population.csv",
            Stage::Ridership => "rta_bus_ridership_ma.csv",
            Stage::CountyPopulation => "county_population.csv",
            Stage::StopIncome => "rta_bus_stop_income_ma.csv",
            Stage::StopRouteMap => "bus_stop_route_mapping.csv",
            Stage::JoinedResult => "result.csv",
        }
    }

    /// Stages whose output feeds this one.
    pub fn dependencies(self) -> &'static [Stage] {
        match self {
            Stage::StopIncome => &[Stage::TractPopulation],
            Stage::JoinedResult => &[Stage::RouteTable, Stage::StopIncome, Stage::StopRouteMap],
            _ => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RouteTable => "route_table",
            Stage::TractPopulation => "tract_population",
            Stage::Ridership => "ridership",
            Stage::CountyPopulation => "county_population",
            Stage::StopIncome => "stop_income",
            Stage::StopRouteMap => "stop_route_map",
            Stage::JoinedResult => "joined_result",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageState {
    Pending,
    /// Loaded from an existing artifact.
    Cached,
    /// Fetched from sources or computed, and stored.
    Fetched,
    /// Handed to the run output.
    Merged,
}

/// Where a merged stage's rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    Cache,
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub state: StageState,
    pub origin: Option<Origin>,
    pub rows: usize,
    pub elapsed_ms: u128,
}

/// Tracks every stage through `Pending -> Cached|Fetched -> Merged`.
#[derive(Debug, Clone)]
pub struct StageTracker {
    records: [StageRecord; Stage::ALL.len()],
}

impl Default for StageTracker {
    fn default() -> Self {
        let pending = StageRecord {
            state: StageState::Pending,
            origin: None,
            rows: 0,
            elapsed_ms: 0,
        };
        Self {
            records: std::array::from_fn(|_| pending.clone()),
        }
    }
}

impl StageTracker {
    pub fn state(&self, stage: Stage) -> StageState {
        self.records[stage.index()].state
    }

    pub fn record(&self, stage: Stage) -> &StageRecord {
        &self.records[stage.index()]
    }

    /// Records in execution order.
    pub fn records(&self) -> impl Iterator<Item = (Stage, &StageRecord)> {
        Stage::ALL.iter().map(|&stage| (stage, self.record(stage)))
    }

    /// Marks `stage` as loaded from the cache or freshly produced.
    ///
    /// # Panics
    ///
    /// Panics if the stage is not pending or a dependency has not merged.
    /// Both are orchestration bugs, not data conditions.
    pub fn resolve(&mut self, stage: Stage, origin: Origin, rows: usize, elapsed: Duration) {
        for dep in stage.dependencies() {
            assert_eq!(
                self.state(*dep),
                StageState::Merged,
                "{stage} resolved before its dependency {dep}"
            );
        }
        let record = &mut self.records[stage.index()];
        assert_eq!(record.state, StageState::Pending, "{stage} resolved twice");

        record.state = match origin {
            Origin::Cache => StageState::Cached,
            Origin::Computed => StageState::Fetched,
        };
        record.origin = Some(origin);
        record.rows = rows;
        record.elapsed_ms = elapsed.as_millis();
        debug!(stage = %stage, state = ?record.state, rows, "Stage resolved");
    }

    /// Marks a resolved stage as merged into the run output.
    pub fn merge(&mut self, stage: Stage) {
        let record = &mut self.records[stage.index()];
        assert!(
            matches!(record.state, StageState::Cached | StageState::Fetched),
            "{stage} merged from state {:?}",
            record.state
        );
        record.state = StageState::Merged;
        info!(stage = %stage, origin = ?record.origin, rows = record.rows, "Stage complete");
    }

    pub fn all_merged(&self) -> bool {
        self.records.iter().all(|r| r.state == StageState::Merged)
    }
}
