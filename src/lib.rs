//! Joins bus stops with census tract income, population, nearest routes
//! and agency ridership, caching each intermediate table as CSV.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod geometry;
pub mod join;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod sources;
