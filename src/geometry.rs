//! Coordinate reference frames and reprojection.
//!
//! Every geometry table travels as a [`Layer`] tagged with its [`Crs`]. The
//! joins refuse to compare layers in different frames, so callers reproject
//! explicitly before joining.

use geo::{Coord, MapCoords};
use std::fmt;
use thiserror::Error;

use crate::model::{Route, Stop, Tract};

/// WGS84 semi-major axis used by spherical Web Mercator.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Web Mercator is undefined at the poles; latitudes are clamped here.
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// EPSG:4326, longitude/latitude in degrees.
    Wgs84,
    /// EPSG:3857, spherical Web Mercator in metres.
    WebMercator,
}

impl Crs {
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("non-finite coordinate ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
}

/// A geometry table in a single reference frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer<T> {
    pub crs: Crs,
    pub features: Vec<T>,
}

impl<T> Layer<T> {
    pub fn new(crs: Crs, features: Vec<T>) -> Self {
        Self { crs, features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl<T: Reproject> Layer<T> {
    /// Returns a copy of this layer expressed in `to`.
    pub fn reproject(&self, to: Crs) -> Layer<T> {
        if self.crs == to {
            return self.clone();
        }
        let from = self.crs;
        Layer {
            crs: to,
            features: self
                .features
                .iter()
                .map(|f| f.map_coords_between(from, to))
                .collect(),
        }
    }
}

/// Geometry-bearing rows that can be moved between frames.
pub trait Reproject: Clone {
    fn map_coords_between(&self, from: Crs, to: Crs) -> Self;
}

impl Reproject for Stop {
    fn map_coords_between(&self, from: Crs, to: Crs) -> Self {
        Stop {
            location: self.location.map_coords(|c| transform(c, from, to)),
            ..self.clone()
        }
    }
}

impl Reproject for Route {
    fn map_coords_between(&self, from: Crs, to: Crs) -> Self {
        Route {
            geometry: self.geometry.map_coords(|c| transform(c, from, to)),
            ..self.clone()
        }
    }
}

impl Reproject for Tract {
    fn map_coords_between(&self, from: Crs, to: Crs) -> Self {
        Tract {
            boundary: self.boundary.map_coords(|c| transform(c, from, to)),
            ..self.clone()
        }
    }
}

/// Converts a single coordinate between frames.
pub fn transform(c: Coord<f64>, from: Crs, to: Crs) -> Coord<f64> {
    match (from, to) {
        (Crs::Wgs84, Crs::WebMercator) => to_web_mercator(c),
        (Crs::WebMercator, Crs::Wgs84) => to_wgs84(c),
        _ => c,
    }
}

fn to_web_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    Coord {
        x: EARTH_RADIUS_M * c.x.to_radians(),
        y: EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
    }
}

fn to_wgs84(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS_M).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
    }
}

/// Rejects NaN and infinite coordinates before they reach a distance scan.
pub fn check_finite(c: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
    if c.x.is_finite() && c.y.is_finite() {
        Ok(c)
    } else {
        Err(GeometryError::NonFinite { x: c.x, y: c.y })
    }
}
