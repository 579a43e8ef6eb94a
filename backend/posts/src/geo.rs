//! # Radius Query
//!
//! Filters a flat list of price posts down to those near a point, optionally
//! narrowed to a product, then orders them by price or rating.
//!
//! Distances are great-circle distances (haversine) on a sphere of radius
//! [`EARTH_RADIUS_KM`]. The haversine term is clamped to `[0, 1]` so that
//! coincident points come out at exactly zero and antipodal points at `π·R`
//! even when rounding pushes the term slightly outside its domain.
use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{PricePost, valid_latitude, valid_longitude};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    #[serde(rename = "Price_LTH")]
    PriceLowToHigh,
    #[serde(rename = "Price_HTL")]
    PriceHighToLow,
    #[serde(rename = "Rating_LTH")]
    RatingLowToHigh,
    #[serde(rename = "Rating_HTL")]
    RatingHighToLow,
}

impl SortKey {
    fn compare(self, a: &PricePost, b: &PricePost) -> Ordering {
        match self {
            SortKey::PriceLowToHigh => a.price.total_cmp(&b.price),
            SortKey::PriceHighToLow => b.price.total_cmp(&a.price),
            SortKey::RatingLowToHigh => a.rating().cmp(&b.rating()),
            SortKey::RatingHighToLow => b.rating().cmp(&a.rating()),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SortKey::PriceLowToHigh => "Price_LTH",
            SortKey::PriceHighToLow => "Price_HTL",
            SortKey::RatingLowToHigh => "Rating_LTH",
            SortKey::RatingHighToLow => "Rating_HTL",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Price_LTH" => Ok(SortKey::PriceLowToHigh),
            "Price_HTL" => Ok(SortKey::PriceHighToLow),
            "Rating_LTH" => Ok(SortKey::RatingLowToHigh),
            "Rating_HTL" => Ok(SortKey::RatingHighToLow),
            other => Err(QueryError::MalformedQuery(format!(
                "unknown sort key {other}"
            ))),
        }
    }
}

/// Raw query parameters, as they arrive from a caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub product: Option<String>,
    pub sort: SortKey,
}

impl PriceQuery {
    /// The search center, if both coordinates were given.
    ///
    /// Exactly one coordinate is rejected instead of being defaulted.
    pub fn center(&self) -> Result<Option<Coordinates>, QueryError> {
        match (self.lat, self.lng) {
            (None, None) => Ok(None),
            (Some(lat), Some(lng)) => {
                if !valid_latitude(lat) || !valid_longitude(lng) {
                    return Err(QueryError::MalformedQuery(format!(
                        "center ({lat}, {lng}) is out of range"
                    )));
                }

                Ok(Some(Coordinates::new(lat, lng)))
            }
            _ => Err(QueryError::MalformedQuery(
                "lat and lng must be given together".to_string(),
            )),
        }
    }

    pub fn radius(&self) -> Result<f64, QueryError> {
        let radius = self.radius_km.unwrap_or(DEFAULT_RADIUS_KM);

        if !radius.is_finite() || radius < 0.0 {
            return Err(QueryError::MalformedQuery(format!(
                "radius must be a non-negative number of kilometres, got {radius}"
            )));
        }

        Ok(radius)
    }

    fn product_needle(&self) -> Option<String> {
        self.product
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
    }
}

pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let phi_1 = from.lat.to_radians();
    let phi_2 = to.lat.to_radians();
    let d_phi = (to.lat - from.lat).to_radians();
    let d_lambda = (to.lng - from.lng).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi_1.cos() * phi_2.cos() * (d_lambda / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Filters and orders `records` according to `params`.
///
/// The sort is stable, so ties keep the order the records were given in.
pub fn query<I>(records: I, params: &PriceQuery) -> Result<Vec<PricePost>, QueryError>
where
    I: IntoIterator<Item = PricePost>,
{
    let center = params.center()?;
    let radius = params.radius()?;
    let needle = params.product_needle();

    let mut matches: Vec<PricePost> = records
        .into_iter()
        .filter(|post| match center {
            Some(center) => haversine_km(center, Coordinates::new(post.lat, post.lng)) <= radius,
            None => true,
        })
        .filter(|post| match &needle {
            Some(needle) => post.product.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .collect();

    matches.sort_by(|a, b| params.sort.compare(a, b));

    Ok(matches)
}
