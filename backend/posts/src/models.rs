use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feedback::FeedbackError;

/// A single observed price, tied to a location and a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePost {
    pub id: u64,
    pub price: f64,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub date: NaiveDate,
    pub product: String,
    pub by: String,
    pub likes: u64,
    pub dislikes: u64,
}

impl PricePost {
    pub fn from_new(id: u64, post: NewPricePost) -> Self {
        Self {
            id,
            price: post.price,
            address: post.address,
            lat: post.lat,
            lng: post.lng,
            date: post.date,
            product: post.product,
            by: post.by,
            likes: 0,
            dislikes: 0,
        }
    }

    pub fn rating(&self) -> i64 {
        self.likes as i64 - self.dislikes as i64
    }

    pub fn counter(&self, kind: FeedbackKind) -> u64 {
        match kind {
            FeedbackKind::Like => self.likes,
            FeedbackKind::Dislike => self.dislikes,
        }
    }
}

/// Insert payload. The store assigns the id and starts both counters at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPricePost {
    pub price: f64,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub date: NaiveDate,
    pub product: String,
    pub by: String,
}

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Price must be a positive amount, got {0}")]
    Price(f64),

    #[error("Latitude out of range: {0}")]
    Latitude(f64),

    #[error("Longitude out of range: {0}")]
    Longitude(f64),

    #[error("Missing field: {0}")]
    Missing(&'static str),
}

impl NewPricePost {
    /// Trims and collapses whitespace in the free-text fields, lowercases the
    /// submitter's email.
    pub fn normalized(mut self) -> Self {
        self.product = collapse_whitespace(&self.product);
        self.address = collapse_whitespace(&self.address);
        self.by = normalize_email(&self.by);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError::Price(self.price));
        }

        if !valid_latitude(self.lat) {
            return Err(ValidationError::Latitude(self.lat));
        }

        if !valid_longitude(self.lng) {
            return Err(ValidationError::Longitude(self.lng));
        }

        if self.product.trim().is_empty() {
            return Err(ValidationError::Missing("product"));
        }

        if self.by.trim().is_empty() {
            return Err(ValidationError::Missing("by"));
        }

        Ok(())
    }
}

pub fn valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn valid_longitude(lng: f64) -> bool {
    lng.is_finite() && (-180.0..=180.0).contains(&lng)
}

/// Users are keyed by email, compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Per-user vote membership. Keyed by email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFeedbackRecord {
    pub email: String,
    pub posts: Vec<u64>,
    pub likes: BTreeSet<u64>,
    pub dislikes: BTreeSet<u64>,
}

impl UserFeedbackRecord {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn vote_on(&self, post_id: u64) -> VoteState {
        if self.likes.contains(&post_id) {
            VoteState::Liked
        } else if self.dislikes.contains(&post_id) {
            VoteState::Disliked
        } else {
            VoteState::None
        }
    }

    pub fn votes_mut(&mut self, kind: FeedbackKind) -> &mut BTreeSet<u64> {
        match kind {
            FeedbackKind::Like => &mut self.likes,
            FeedbackKind::Dislike => &mut self.dislikes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteState {
    None,
    Liked,
    Disliked,
}

impl VoteState {
    pub fn of(kind: FeedbackKind) -> Self {
        match kind {
            FeedbackKind::Like => VoteState::Liked,
            FeedbackKind::Dislike => VoteState::Disliked,
        }
    }
}

/// Which counter (and which user vote set) a feedback touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackKind {
    Like,
    Dislike,
}

impl FeedbackKind {
    pub fn opposite(self) -> Self {
        match self {
            FeedbackKind::Like => FeedbackKind::Dislike,
            FeedbackKind::Dislike => FeedbackKind::Like,
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            FeedbackKind::Like => "likes",
            FeedbackKind::Dislike => "dislikes",
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackKind::Like => f.write_str("Like"),
            FeedbackKind::Dislike => f.write_str("Dislike"),
        }
    }
}

impl FromStr for FeedbackKind {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(FeedbackKind::Like),
            "dislike" => Ok(FeedbackKind::Dislike),
            _ => Err(FeedbackError::InvalidFeedbackType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackAction {
    Add,
    Remove,
}

impl FeedbackAction {
    pub fn delta(self) -> i64 {
        match self {
            FeedbackAction::Add => 1,
            FeedbackAction::Remove => -1,
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackAction::Add => f.write_str("Add"),
            FeedbackAction::Remove => f.write_str("Remove"),
        }
    }
}

impl FromStr for FeedbackAction {
    type Err = FeedbackError;

    // `1` / `-1` are what older clients send.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" | "1" | "+1" => Ok(FeedbackAction::Add),
            "remove" | "-1" => Ok(FeedbackAction::Remove),
            _ => Err(FeedbackError::InvalidAction(s.to_string())),
        }
    }
}
