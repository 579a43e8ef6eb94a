//! # Search
//!
//! Turns `/prices` query strings into a [`PriceQuery`], runs it over the
//! store, and shapes the results for the client.
//!
//! ## Parameters
//! - `lat`, `lng`: center, both or neither
//! - `radius`: kilometres, server default when absent
//! - `product`: case-insensitive substring
//! - `sortType`: `Price_LTH` | `Price_HTL` | `Rating_LTH` | `Rating_HTL`
//! - `email`: when present, each result carries `isLiked` / `isDisliked` for that user
//!
//! Empty values count as absent, so `?lat=&lng=` is the same as no center.
use std::str::FromStr;

use posts::{
    Coordinates, PricePost, PriceQuery, QueryError, SortKey, UserFeedbackRecord, VoteState,
    haversine_km, normalize_email, query,
};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::State};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub radius: Option<String>,
    pub product: Option<String>,
    pub sort_type: Option<String>,
    pub email: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number(name: &str, value: &Option<String>) -> Result<Option<f64>, QueryError> {
    present(value)
        .map(|raw| {
            raw.parse::<f64>()
                .map_err(|_| QueryError::MalformedQuery(format!("{name} is not a number: {raw}")))
        })
        .transpose()
}

impl SearchParams {
    pub fn to_query(&self, default_radius_km: f64) -> Result<PriceQuery, QueryError> {
        let sort = present(&self.sort_type)
            .map(SortKey::from_str)
            .transpose()?
            .unwrap_or_default();

        Ok(PriceQuery {
            lat: parse_number("lat", &self.lat)?,
            lng: parse_number("lng", &self.lng)?,
            radius_km: Some(parse_number("radius", &self.radius)?.unwrap_or(default_radius_km)),
            product: present(&self.product).map(String::from),
            sort,
        })
    }

    pub fn viewer(&self) -> Option<String> {
        present(&self.email).map(normalize_email)
    }
}

/// A post as returned by `/prices`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    pub post: PricePost,
    pub rating: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_liked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_disliked: Option<bool>,
}

impl PostView {
    pub fn new(
        post: PricePost,
        center: Option<Coordinates>,
        viewer: Option<&UserFeedbackRecord>,
    ) -> Self {
        let vote = viewer.map(|user| user.vote_on(post.id));

        Self {
            rating: post.rating(),
            distance_km: center.map(|c| haversine_km(c, Coordinates::new(post.lat, post.lng))),
            is_liked: vote.map(|v| v == VoteState::Liked),
            is_disliked: vote.map(|v| v == VoteState::Disliked),
            post,
        }
    }
}

pub async fn search(state: &State, params: &SearchParams) -> Result<Vec<PostView>, AppError> {
    let price_query = params.to_query(state.config.default_radius_km)?;
    let center = price_query.center()?;

    let records = state.prices.fetch_all().await?;
    let matches = query(records, &price_query)?;

    // An unknown viewer just gets unannotated results.
    let viewer = match params.viewer() {
        Some(email) => state.users.get(&email).await?,
        None => None,
    };

    Ok(matches
        .into_iter()
        .map(|post| PostView::new(post, center, viewer.as_ref()))
        .collect())
}
