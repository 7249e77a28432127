//! Row types for every table the pipeline fetches or derives.
//!
//! Geometry-bearing rows (`Stop`, `Route`, `Tract`) live only in memory
//! inside a [`crate::geometry::Layer`]. Everything else is a flat record
//! that round-trips through the artifact CSVs.

use geo::{MultiLineString, MultiPolygon, Point};
use serde::{Deserialize, Serialize};

/// A bus stop as published by the stop feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub stop_id: String,
    pub name: Option<String>,
    pub agency: Option<String>,
    pub location: Point<f64>,
}

/// A bus route and its line geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub route_id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub geometry: MultiLineString<f64>,
}

impl Route {
    pub fn name_row(&self) -> RouteName {
        RouteName {
            route_id: self.route_id.clone(),
            route_short_name: self.short_name.clone(),
            route_long_name: self.long_name.clone(),
        }
    }
}

/// A census tract boundary. `census_tract` is the 11-digit GEOID.
#[derive(Debug, Clone, PartialEq)]
pub struct Tract {
    pub census_tract: String,
    pub boundary: MultiPolygon<f64>,
}

/// Route display names, the `RouteTable` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteName {
    pub route_id: String,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
}

/// ACS median household income for one tract. Negative values are Census
/// suppression sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeRecord {
    pub census_tract: String,
    pub median_household_income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TractPopulation {
    pub census_tract: String,
    pub population: i64,
}

/// One row of the Census population estimates for a county.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyPopulation {
    pub county: String,
    pub geoname: String,
    pub date_code: String,
    pub date_desc: String,
    pub density: Option<f64>,
    pub population: i64,
}

/// NTD agency ridership and finance figures for one transit agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidershipRecord {
    pub ntd_id: String,
    pub agency: String,
    pub service_area_population: Option<f64>,
    pub type_of_service: Option<String>,
    pub active: Option<String>,
    pub passenger_miles: Option<f64>,
    pub unlinked_passenger_trips: Option<f64>,
    pub fares: Option<f64>,
    pub operating_expenses: Option<f64>,
    pub avg_cost_per_trip: Option<f64>,
    pub avg_fares_per_trip: Option<f64>,
}

/// Output of the tract join. `census_tract` is `None` when no tract
/// polygon contains the stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTractAssignment {
    pub stop_id: String,
    pub census_tract: Option<String>,
}

/// Output of the nearest-route join, the `StopRouteMap` artifact.
/// `route_id` is `None` when no route qualified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRouteAssignment {
    pub stop_id: String,
    pub route_id: Option<String>,
    pub distance: Option<f64>,
}

/// A stop with its tract income and population, the `StopIncome` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopIncome {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub agency: Option<String>,
    pub ridership_agency: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub census_tract: String,
    pub median_household_income: f64,
    pub population: i64,
}

/// The final joined row, the `JoinedResult` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub agency: Option<String>,
    pub ridership_agency: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub census_tract: String,
    pub median_household_income: f64,
    pub population: i64,
    pub route_id: String,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_distance: Option<f64>,
}
