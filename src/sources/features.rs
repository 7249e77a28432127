//! GeoJSON feature feeds: stops, routes and tract boundaries.
//!
//! ArcGIS REST endpoints cap the number of features per response. When a
//! feed is remote it is requested page by page with `resultOffset` and
//! `resultRecordCount` until the server stops reporting
//! `exceededTransferLimit`.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use geo::{Coord, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::TabularSource;
use crate::fetch::{HttpClient, fetch_location, is_remote};
use crate::geometry::{Crs, Layer, check_finite};
use crate::model::{Route, Stop, Tract};

/// Safety valve against a server that never clears its transfer flag.
const MAX_PAGES: usize = 1000;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default, rename = "exceededTransferLimit")]
    exceeded_transfer_limit: bool,
    #[serde(default)]
    properties: Option<CollectionProperties>,
    #[serde(default)]
    error: Option<Value>,
}

impl FeatureCollection {
    fn has_more(&self) -> bool {
        self.exceeded_transfer_limit
            || self
                .properties
                .as_ref()
                .is_some_and(|p| p.exceeded_transfer_limit)
    }
}

#[derive(Debug, Deserialize)]
struct CollectionProperties {
    #[serde(default, rename = "exceededTransferLimit")]
    exceeded_transfer_limit: bool,
}

#[derive(Debug, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub geometry: Option<RawGeometry>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct RawGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

/// Parses one GeoJSON document into its features and whether the server
/// truncated it.
pub fn parse_feature_collection(bytes: &[u8]) -> Result<(Vec<Feature>, bool)> {
    let collection: FeatureCollection =
        serde_json::from_slice(bytes).context("invalid GeoJSON feature collection")?;
    if let Some(error) = collection.error {
        bail!("feature service returned an error: {error}");
    }
    let more = collection.has_more();
    Ok((collection.features, more))
}

fn page_url(base: &str, offset: usize, page_size: usize) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}resultOffset={offset}&resultRecordCount={page_size}")
}

/// Loads every feature behind `location`, following ArcGIS paging for
/// remote feeds.
#[tracing::instrument(skip(client))]
pub async fn fetch_features(
    client: &dyn HttpClient,
    location: &str,
    page_size: usize,
) -> Result<Vec<Feature>> {
    if !is_remote(location) {
        let bytes = fetch_location(client, location).await?;
        return Ok(parse_feature_collection(&bytes)?.0);
    }

    let mut features = Vec::new();
    for page in 0..MAX_PAGES {
        let url = page_url(location, features.len(), page_size);
        let bytes = fetch_location(client, &url).await?;
        let (batch, more) = parse_feature_collection(&bytes)
            .with_context(|| format!("page {page} of {location}"))?;
        debug!(page, batch = batch.len(), more, "Feature page received");

        let empty = batch.is_empty();
        features.extend(batch);
        if !more || empty {
            return Ok(features);
        }
    }
    bail!("{location} still truncated after {MAX_PAGES} pages")
}

fn coord(value: &[f64]) -> Result<Coord<f64>> {
    match value {
        [x, y, ..] => Ok(check_finite(Coord { x: *x, y: *y })?),
        _ => bail!("coordinate needs at least two components"),
    }
}

fn line_string(points: Vec<Vec<f64>>) -> Result<LineString<f64>> {
    points
        .iter()
        .map(|p| coord(p))
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn polygon(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon<f64>> {
    let mut rings = rings.into_iter().map(line_string);
    let exterior = rings.next().context("polygon without exterior ring")??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

impl RawGeometry {
    fn coordinates<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.coordinates.clone())
            .with_context(|| format!("malformed {} coordinates", self.kind))
    }

    pub fn to_point(&self) -> Result<Point<f64>> {
        match self.kind.as_str() {
            "Point" => Ok(Point::from(coord(&self.coordinates::<Vec<f64>>()?)?)),
            other => bail!("expected Point geometry, found {other}"),
        }
    }

    pub fn to_multi_line_string(&self) -> Result<MultiLineString<f64>> {
        let lines = match self.kind.as_str() {
            "LineString" => vec![line_string(self.coordinates()?)?],
            "MultiLineString" => self
                .coordinates::<Vec<Vec<Vec<f64>>>>()?
                .into_iter()
                .map(line_string)
                .collect::<Result<_>>()?,
            other => bail!("expected line geometry, found {other}"),
        };
        Ok(MultiLineString::new(lines))
    }

    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>> {
        let polygons = match self.kind.as_str() {
            "Polygon" => vec![polygon(self.coordinates()?)?],
            "MultiPolygon" => self
                .coordinates::<Vec<Vec<Vec<Vec<f64>>>>>()?
                .into_iter()
                .map(polygon)
                .collect::<Result<_>>()?,
            other => bail!("expected polygon geometry, found {other}"),
        };
        Ok(MultiPolygon::new(polygons))
    }
}

/// Reads the first present, non-empty property among `keys` as a string.
/// Numeric identifiers are rendered without a fractional part when whole.
pub fn prop_string(props: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match props.get(*key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        }),
        _ => None,
    })
}

/// Converts features to rows, skipping (and counting) the ones `convert`
/// rejects.
fn convert_features<T>(
    source: &str,
    features: Vec<Feature>,
    convert: impl Fn(&Map<String, Value>, &RawGeometry) -> Result<T>,
) -> Vec<T> {
    let total = features.len();
    let empty = Map::new();
    let mut skipped = 0usize;
    let rows: Vec<T> = features
        .into_iter()
        .filter_map(|feature| {
            let props = feature.properties.as_ref().unwrap_or(&empty);
            let result = match &feature.geometry {
                Some(geometry) => convert(props, geometry),
                None => Err(anyhow::anyhow!("feature without geometry")),
            };
            match result {
                Ok(row) => Some(row),
                Err(e) => {
                    skipped += 1;
                    debug!(source, error = %e, "Skipping feature");
                    None
                }
            }
        })
        .collect();

    if skipped > 0 {
        warn!(source, skipped, total, "Features skipped during conversion");
    }
    info!(source, rows = rows.len(), "Features converted");
    rows
}

pub fn stops_from_features(features: Vec<Feature>) -> Vec<Stop> {
    convert_features("stops", features, |props, geometry| {
        Ok(Stop {
            stop_id: prop_string(props, &["stop_id", "STOP_ID"]).context("missing stop_id")?,
            name: prop_string(props, &["stop_name", "STOP_NAME", "name"]),
            agency: prop_string(props, &["agency", "Agency", "AGENCY", "agency_id", "RTA"]),
            location: geometry.to_point()?,
        })
    })
}

pub fn routes_from_features(features: Vec<Feature>) -> Vec<Route> {
    convert_features("routes", features, |props, geometry| {
        let mut lines = geometry.to_multi_line_string()?;
        lines.0.retain(|line| line.0.len() >= 2);
        if lines.0.is_empty() {
            bail!("route without any segment");
        }
        Ok(Route {
            route_id: prop_string(props, &["route_id", "ROUTE_ID"]).context("missing route_id")?,
            short_name: prop_string(props, &["route_short_name", "route_shor", "ROUTE_SHOR"]),
            long_name: prop_string(props, &["route_long_name", "route_long", "ROUTE_LONG"]),
            geometry: lines,
        })
    })
}

pub fn tracts_from_features(features: Vec<Feature>) -> Vec<Tract> {
    convert_features("tracts", features, |props, geometry| {
        let census_tract = prop_string(props, &["GEOID", "geoid"])
            .or_else(|| {
                Some(format!(
                    "{}{}{}",
                    prop_string(props, &["STATE", "STATEFP"])?,
                    prop_string(props, &["COUNTY", "COUNTYFP"])?,
                    prop_string(props, &["TRACT", "TRACTCE"])?
                ))
            })
            .context("missing tract GEOID")?;
        Ok(Tract {
            census_tract,
            boundary: geometry.to_multi_polygon()?,
        })
    })
}

/// A GeoJSON feature feed in EPSG:4326 converted with `convert`.
pub struct FeatureFeed<T> {
    name: &'static str,
    client: Arc<dyn HttpClient>,
    location: String,
    page_size: usize,
    convert: fn(Vec<Feature>) -> Vec<T>,
}

impl<T> FeatureFeed<T> {
    fn new(
        name: &'static str,
        client: Arc<dyn HttpClient>,
        location: String,
        page_size: usize,
        convert: fn(Vec<Feature>) -> Vec<T>,
    ) -> Self {
        Self {
            name,
            client,
            location,
            page_size,
            convert,
        }
    }
}

impl FeatureFeed<Stop> {
    pub fn stops(client: Arc<dyn HttpClient>, location: String, page_size: usize) -> Self {
        Self::new("stops", client, location, page_size, stops_from_features)
    }
}

impl FeatureFeed<Route> {
    pub fn routes(client: Arc<dyn HttpClient>, location: String, page_size: usize) -> Self {
        Self::new("routes", client, location, page_size, routes_from_features)
    }
}

impl FeatureFeed<Tract> {
    pub fn tracts(client: Arc<dyn HttpClient>, location: String, page_size: usize) -> Self {
        Self::new("tracts", client, location, page_size, tracts_from_features)
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> TabularSource<Layer<T>> for FeatureFeed<T> {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self) -> Result<Layer<T>> {
        let features = fetch_features(self.client.as_ref(), &self.location, self.page_size).await?;
        Ok(Layer::new(Crs::Wgs84, (self.convert)(features)))
    }
}
