//! Pipeline and source configuration.
//!
//! Defaults target the Massachusetts regional transit authorities (RTAs)
//! with 2018 ACS and population-estimate tables. Every location may be a
//! local file path or an `http(s)` URL.

use std::collections::HashMap;
use std::time::Duration;

use crate::geometry::Crs;
use crate::join::RouteJoinConfig;

pub const DEFAULT_STOPS_URL: &str = "https://gis.massdot.state.ma.us/arcgis/rest/services/Multimodal/RTAs/FeatureServer/1/query?where=1%3D1&outFields=*&outSR=4326&f=geojson";
pub const DEFAULT_ROUTES_URL: &str = "https://gis.massdot.state.ma.us/arcgis/rest/services/Multimodal/RTAs/FeatureServer/0/query?where=1%3D1&outFields=*&outSR=4326&f=geojson";
pub const DEFAULT_TRACTS_URL: &str = "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb/Tracts_Blocks/MapServer/0/query?where=STATE%3D%2725%27&outFields=GEOID&outSR=4326&f=geojson";
pub const DEFAULT_INCOME_URL: &str =
    "https://api.census.gov/data/2018/acs/acs5?get=B19013_001E&for=tract:*&in=state:25";
pub const DEFAULT_TRACT_POPULATION_URL: &str =
    "https://api.census.gov/data/2018/acs/acs5?get=B01003_001E&for=tract:*&in=state:25";
pub const DEFAULT_COUNTY_POPULATION_URL: &str = "https://api.census.gov/data/2018/pep/population?get=COUNTY,DATE_CODE,DATE_DESC,DENSITY,POP,GEONAME,STATE&for=county:*&in=state:25";
/// FTA monthly adjusted database; agencies are read from its `MASTER` sheet.
pub const DEFAULT_RIDERSHIP_URL: &str = "https://www.transit.dot.gov/sites/fta.dot.gov/files/2020-10/August%202020%20Adjusted%20Database.xlsx";

/// Stop-feed agency names mapped to their NTD agency names.
pub static RIDERSHIP_AGENCY_ALIASES: &[(&str, &str)] = &[
    (
        "VineyardRTA",
        "Woods Hole, Martha's Vineyard and Nantucket Steamship Authority",
    ),
    ("CapeCodRTA", "Cape Cod Regional Transit Authority"),
    ("LowellRTA", "Lowell Regional Transit Authority"),
    ("CapeAnnRTA", "Cape Ann Transportation Authority"),
    ("BerkshireRTA", "Berkshire Regional Transit Authority"),
    ("MontachusettRTA", "Montachusett Regional Transit Authority"),
    ("MerrimackValleyRTA", "Merrimack Valley Regional Transit Authority"),
    ("PioneerValleyRTA", "Pioneer Valley Transit Authority"),
    ("MetroWestRTA", "MetroWest Regional Transit Authority"),
    ("WRTA", "Worcester Regional Transit Authority"),
    ("BrocktonAreaRTA", "Brockton Area Transit Authority"),
    ("SoutheasternRTA", "Southeastern Regional Transit Authority"),
];

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub stops: String,
    pub routes: String,
    pub tracts: String,
    pub income: String,
    pub tract_population: String,
    pub county_population: String,
    pub ridership: String,
    /// Appended as `key=` to Census API requests when set.
    pub census_api_key: Option<String>,
    /// Records per ArcGIS page.
    pub page_size: usize,
    pub http_timeout: Duration,
    /// `HQ State` kept from the NTD table.
    pub ridership_state: String,
    /// NTD `Mode` kept from the NTD table (`MB` is motor bus).
    pub ridership_mode: String,
    pub excluded_agencies: Vec<String>,
    /// `DATE_DESC` row kept from the county population estimates.
    pub county_population_date: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stops: DEFAULT_STOPS_URL.to_string(),
            routes: DEFAULT_ROUTES_URL.to_string(),
            tracts: DEFAULT_TRACTS_URL.to_string(),
            income: DEFAULT_INCOME_URL.to_string(),
            tract_population: DEFAULT_TRACT_POPULATION_URL.to_string(),
            county_population: DEFAULT_COUNTY_POPULATION_URL.to_string(),
            ridership: DEFAULT_RIDERSHIP_URL.to_string(),
            census_api_key: None,
            page_size: 2000,
            http_timeout: Duration::from_secs(300),
            ridership_state: "MA".to_string(),
            ridership_mode: "MB".to_string(),
            excluded_agencies: vec!["Massachusetts Bay Transportation Authority".to_string()],
            county_population_date: "7/1/2018 population estimate".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub route_join: RouteJoinConfig,
    /// Frame the nearest-route scan runs in; the threshold is in its units.
    pub route_crs: Crs,
    /// Frame the tract containment test runs in.
    pub tract_crs: Crs,
    pub agency_aliases: HashMap<String, String>,
    /// Fail the run when a stage ends up with no rows.
    pub strict: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            route_join: RouteJoinConfig::default(),
            route_crs: Crs::WebMercator,
            tract_crs: Crs::Wgs84,
            agency_aliases: RIDERSHIP_AGENCY_ALIASES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            strict: false,
        }
    }
}
