//! External tables consumed by the pipeline.
//!
//! Each source wraps one dataset behind [`TabularSource::fetch`]. Sources
//! are passive; the pipeline decides when (and whether) to call them.

pub mod census;
pub mod features;
pub mod ridership;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use census::CensusSource;
pub use features::FeatureFeed;
pub use ridership::{RidershipFilter, RidershipSource};

use crate::config::SourceConfig;
use crate::fetch::{BasicClient, HttpClient, auth::UrlParam};
use crate::geometry::Layer;
use crate::model::{
    CountyPopulation, IncomeRecord, RidershipRecord, Route, Stop, Tract, TractPopulation,
};

/// One external dataset.
#[async_trait]
pub trait TabularSource<T>: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<T>;
}

/// The seven datasets a pipeline run draws from.
pub struct PipelineSources {
    pub stops: Box<dyn TabularSource<Layer<Stop>>>,
    pub routes: Box<dyn TabularSource<Layer<Route>>>,
    pub tracts: Box<dyn TabularSource<Layer<Tract>>>,
    pub income: Box<dyn TabularSource<Vec<IncomeRecord>>>,
    pub tract_population: Box<dyn TabularSource<Vec<TractPopulation>>>,
    pub ridership: Box<dyn TabularSource<Vec<RidershipRecord>>>,
    pub county_population: Box<dyn TabularSource<Vec<CountyPopulation>>>,
}

impl PipelineSources {
    /// Builds HTTP/file-backed sources. Census requests carry the API key
    /// when one is configured.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(BasicClient::with_timeout(config.http_timeout)?);
        let census: Arc<dyn HttpClient> = match &config.census_api_key {
            Some(key) => Arc::new(UrlParam::census_key(
                BasicClient::with_timeout(config.http_timeout)?,
                key.clone(),
            )),
            None => http.clone(),
        };

        Ok(Self {
            stops: Box::new(FeatureFeed::stops(
                http.clone(),
                config.stops.clone(),
                config.page_size,
            )),
            routes: Box::new(FeatureFeed::routes(
                http.clone(),
                config.routes.clone(),
                config.page_size,
            )),
            tracts: Box::new(FeatureFeed::tracts(
                http.clone(),
                config.tracts.clone(),
                config.page_size,
            )),
            income: Box::new(CensusSource::income(census.clone(), config.income.clone())),
            tract_population: Box::new(CensusSource::tract_population(
                census.clone(),
                config.tract_population.clone(),
            )),
            county_population: Box::new(CensusSource::county_population(
                census,
                config.county_population.clone(),
                config.county_population_date.clone(),
            )),
            ridership: Box::new(RidershipSource::new(
                http,
                config.ridership.clone(),
                RidershipFilter {
                    mode: config.ridership_mode.clone(),
                    state: config.ridership_state.clone(),
                    excluded_agencies: config.excluded_agencies.clone(),
                },
            )),
        })
    }
}
