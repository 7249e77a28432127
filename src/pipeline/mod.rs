//! Dataset pipeline orchestration.
//!
//! A run walks [`Stage::ALL`] in order. For each stage it either loads the
//! stage's artifact (cache hit, unless regenerating) or fetches its sources,
//! runs its joins and stores the result. The first failure aborts the run;
//! stages stored before the failure are reused by the next run.

mod error;
mod stage;

pub use error::PipelineError;
pub use stage::{Origin, Stage, StageRecord, StageState, StageTracker};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::cache::ArtifactCache;
use crate::config::PipelineConfig;
use crate::geometry::{Crs, Layer};
use crate::join::{assign_routes, assign_tracts, merge_joined, merge_stop_income};
use crate::model::{
    CountyPopulation, JoinedRecord, RidershipRecord, Route, RouteName, Stop, StopIncome,
    StopRouteAssignment, TractPopulation,
};
use crate::sources::{PipelineSources, TabularSource};

/// Every table a completed run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub routes: Vec<RouteName>,
    pub tract_population: Vec<TractPopulation>,
    pub ridership: Vec<RidershipRecord>,
    pub county_population: Vec<CountyPopulation>,
    pub stop_income: Vec<StopIncome>,
    pub stop_routes: Vec<StopRouteAssignment>,
    pub joined: Vec<JoinedRecord>,
    pub report: RunReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub file: &'static str,
    pub state: StageState,
    pub origin: Option<Origin>,
    pub rows: usize,
    pub elapsed_ms: u128,
}

/// Per-stage outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub regenerate: bool,
    pub data_dir: PathBuf,
    pub elapsed_ms: u128,
    pub stages: Vec<StageSummary>,
}

impl RunReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

pub struct DatasetPipeline {
    config: PipelineConfig,
    cache: ArtifactCache,
    sources: PipelineSources,
}

impl DatasetPipeline {
    pub fn new(config: PipelineConfig, cache: ArtifactCache, sources: PipelineSources) -> Self {
        Self {
            config,
            cache,
            sources,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Produces every stage artifact and the joined result.
    ///
    /// With `regenerate` unset, any stage whose artifact exists is loaded
    /// instead of recomputed. With it set, every stage is fetched or
    /// computed again and its artifact overwritten.
    #[tracing::instrument(skip(self), fields(data_dir = %self.cache.root().display()))]
    pub async fn generate(&self, regenerate: bool) -> Result<PipelineOutput, PipelineError> {
        let started = Instant::now();
        let mut run = Run::new(self, regenerate);

        let routes = run.route_table().await?;
        let tract_population = run.tract_population().await?;
        let ridership = run.ridership().await?;
        let county_population = run.county_population().await?;
        let stop_income = run.stop_income(&tract_population).await?;
        let stop_routes = run.stop_route_map().await?;
        let joined = run.joined_result(&stop_income, &stop_routes, &routes)?;

        debug_assert!(run.tracker.all_merged());
        let report = RunReport {
            generated_at: Utc::now(),
            regenerate,
            data_dir: self.cache.root().to_path_buf(),
            elapsed_ms: started.elapsed().as_millis(),
            stages: run
                .tracker
                .records()
                .map(|(stage, record)| StageSummary {
                    stage,
                    file: stage.file_name(),
                    state: record.state,
                    origin: record.origin,
                    rows: record.rows,
                    elapsed_ms: record.elapsed_ms,
                })
                .collect(),
        };
        info!(
            elapsed_ms = report.elapsed_ms,
            joined = joined.len(),
            "Finished all dataset gathering and preprocessing"
        );

        Ok(PipelineOutput {
            routes,
            tract_population,
            ridership,
            county_population,
            stop_income,
            stop_routes,
            joined,
            report,
        })
    }
}

/// State for a single `generate` call. Stop and route geometries are
/// fetched at most once and shared by the stages that need them.
struct Run<'a> {
    pipeline: &'a DatasetPipeline,
    regenerate: bool,
    tracker: StageTracker,
    stops: Option<Arc<Layer<Stop>>>,
    routes: Option<Arc<Layer<Route>>>,
}

async fn fetch_source<T>(stage: Stage, source: &dyn TabularSource<T>) -> Result<T, PipelineError> {
    info!(stage = %stage, dataset = source.name(), "Fetching source");
    source.fetch().await.map_err(|e| PipelineError::Fetch {
        stage,
        dataset: source.name().to_string(),
        source: e,
    })
}

impl<'a> Run<'a> {
    fn new(pipeline: &'a DatasetPipeline, regenerate: bool) -> Self {
        Self {
            pipeline,
            regenerate,
            tracker: StageTracker::default(),
            stops: None,
            routes: None,
        }
    }

    fn sources(&self) -> &'a PipelineSources {
        &self.pipeline.sources
    }

    fn config(&self) -> &'a PipelineConfig {
        &self.pipeline.config
    }

    /// Loads the stage artifact when it may be reused.
    fn cached<T: DeserializeOwned>(&self, stage: Stage) -> Result<Option<Vec<T>>, PipelineError> {
        let cache = &self.pipeline.cache;
        if self.regenerate || !cache.exists(stage) {
            return Ok(None);
        }
        cache
            .load(stage)
            .map(Some)
            .map_err(|source| PipelineError::Cache { stage, source })
    }

    /// Stores freshly produced rows and marks the stage done.
    fn persist<T: Serialize>(
        &mut self,
        stage: Stage,
        rows: Vec<T>,
        started: Instant,
    ) -> Result<Vec<T>, PipelineError> {
        self.check_not_empty(stage, rows.len())?;
        self.pipeline
            .cache
            .store(stage, &rows)
            .map_err(|source| PipelineError::Cache { stage, source })?;
        Ok(self.complete(stage, Origin::Computed, rows, started))
    }

    /// Marks a cache hit done.
    fn reuse<T>(&mut self, stage: Stage, rows: Vec<T>, started: Instant) -> Result<Vec<T>, PipelineError> {
        self.check_not_empty(stage, rows.len())?;
        Ok(self.complete(stage, Origin::Cache, rows, started))
    }

    fn check_not_empty(&self, stage: Stage, rows: usize) -> Result<(), PipelineError> {
        if rows > 0 {
            return Ok(());
        }
        if self.config().strict {
            return Err(PipelineError::Empty { stage });
        }
        warn!(stage = %stage, "Stage produced no rows");
        Ok(())
    }

    fn complete<T>(&mut self, stage: Stage, origin: Origin, rows: Vec<T>, started: Instant) -> Vec<T> {
        self.tracker.resolve(stage, origin, rows.len(), started.elapsed());
        self.tracker.merge(stage);
        rows
    }

    async fn stops_layer(&mut self, stage: Stage) -> Result<Arc<Layer<Stop>>, PipelineError> {
        if let Some(stops) = &self.stops {
            return Ok(stops.clone());
        }
        let stops = Arc::new(fetch_source(stage, self.sources().stops.as_ref()).await?);
        self.stops = Some(stops.clone());
        Ok(stops)
    }

    async fn routes_layer(&mut self, stage: Stage) -> Result<Arc<Layer<Route>>, PipelineError> {
        if let Some(routes) = &self.routes {
            return Ok(routes.clone());
        }
        let routes = Arc::new(fetch_source(stage, self.sources().routes.as_ref()).await?);
        self.routes = Some(routes.clone());
        Ok(routes)
    }

    #[tracing::instrument(skip_all)]
    async fn route_table(&mut self) -> Result<Vec<RouteName>, PipelineError> {
        let stage = Stage::RouteTable;
        let started = Instant::now();
        if let Some(rows) = self.cached(stage)? {
            return self.reuse(stage, rows, started);
        }

        let routes = self.routes_layer(stage).await?;
        let rows: Vec<RouteName> = routes.features.iter().map(Route::name_row).collect();
        self.persist(stage, rows, started)
    }

    #[tracing::instrument(skip_all)]
    async fn tract_population(&mut self) -> Result<Vec<TractPopulation>, PipelineError> {
        let stage = Stage::TractPopulation;
        let started = Instant::now();
        if let Some(rows) = self.cached(stage)? {
            return self.reuse(stage, rows, started);
        }

        let rows = fetch_source(stage, self.sources().tract_population.as_ref()).await?;
        self.persist(stage, rows, started)
    }

    #[tracing::instrument(skip_all)]
    async fn ridership(&mut self) -> Result<Vec<RidershipRecord>, PipelineError> {
        let stage = Stage::Ridership;
        let started = Instant::now();
        if let Some(rows) = self.cached(stage)? {
            return self.reuse(stage, rows, started);
        }

        let rows = fetch_source(stage, self.sources().ridership.as_ref()).await?;
        self.persist(stage, rows, started)
    }

    #[tracing::instrument(skip_all)]
    async fn county_population(&mut self) -> Result<Vec<CountyPopulation>, PipelineError> {
        let stage = Stage::CountyPopulation;
        let started = Instant::now();
        if let Some(rows) = self.cached(stage)? {
            return self.reuse(stage, rows, started);
        }

        let rows = fetch_source(stage, self.sources().county_population.as_ref()).await?;
        self.persist(stage, rows, started)
    }

    /// Stops ⋈ tract (point in polygon) ⋈ income ⋈ tract population.
    #[tracing::instrument(skip_all)]
    async fn stop_income(
        &mut self,
        tract_population: &[TractPopulation],
    ) -> Result<Vec<StopIncome>, PipelineError> {
        let stage = Stage::StopIncome;
        let started = Instant::now();
        if let Some(rows) = self.cached(stage)? {
            return self.reuse(stage, rows, started);
        }

        let stops = self.stops_layer(stage).await?;
        let tracts = fetch_source(stage, self.sources().tracts.as_ref()).await?;
        let income = fetch_source(stage, self.sources().income.as_ref()).await?;

        let tract_crs = self.config().tract_crs;
        let assignments = assign_tracts(&stops.reproject(tract_crs), &tracts.reproject(tract_crs))
            .map_err(|source| PipelineError::Join { stage, source })?;

        // Output coordinates are always longitude/latitude.
        let stops = stops.reproject(Crs::Wgs84);
        let rows = merge_stop_income(
            &stops.features,
            &assignments,
            &income,
            tract_population,
            &self.config().agency_aliases,
        );
        self.persist(stage, rows, started)
    }

    /// Nearest route for every stop, in the configured projected frame.
    #[tracing::instrument(skip_all)]
    async fn stop_route_map(&mut self) -> Result<Vec<StopRouteAssignment>, PipelineError> {
        let stage = Stage::StopRouteMap;
        let started = Instant::now();
        if let Some(rows) = self.cached(stage)? {
            return self.reuse(stage, rows, started);
        }

        let stops = self.stops_layer(stage).await?;
        let routes = self.routes_layer(stage).await?;

        let config = self.config();
        info!(
            stops = stops.len(),
            routes = routes.len(),
            crs = %config.route_crs,
            "Joining bus stops onto routes"
        );
        let (crs, route_join) = (config.route_crs, config.route_join);
        let rows = tokio::task::spawn_blocking(move || {
            assign_routes(&stops.reproject(crs), &routes.reproject(crs), &route_join)
        })
        .await
        .map_err(|source| PipelineError::Task { stage, source })?
        .map_err(|source| PipelineError::Join { stage, source })?;
        self.persist(stage, rows, started)
    }

    /// Stop income ⋈ stop route map ⋈ route names.
    #[tracing::instrument(skip_all)]
    fn joined_result(
        &mut self,
        stop_income: &[StopIncome],
        stop_routes: &[StopRouteAssignment],
        routes: &[RouteName],
    ) -> Result<Vec<JoinedRecord>, PipelineError> {
        let stage = Stage::JoinedResult;
        let started = Instant::now();
        if let Some(rows) = self.cached(stage)? {
            return self.reuse(stage, rows, started);
        }

        let rows = merge_joined(stop_income, stop_routes, routes);
        self.persist(stage, rows, started)
    }
}
