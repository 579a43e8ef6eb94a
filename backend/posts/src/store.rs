//! Storage capabilities the engines are written against.
//!
//! Every backend provides all three traits. Counter updates must be atomic on the
//! backend side: two concurrent `increment_counter` calls on the same post
//! never lose an update, and a decrement below zero is refused without
//! writing anything.
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{FeedbackAction, FeedbackKind, NewPricePost, PricePost, UserFeedbackRecord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Counter would go negative")]
    Underflow,

    #[error("Unknown post: {0}")]
    UnknownPost(u64),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Stores a new post and returns its id.
    async fn insert(&self, post: NewPricePost) -> StoreResult<u64>;

    /// All posts in ascending id order.
    async fn fetch_all(&self) -> StoreResult<Vec<PricePost>>;

    /// Posts for the given ids, in the order asked for. Unknown ids are skipped.
    async fn fetch_by_ids(&self, ids: &[u64]) -> StoreResult<Vec<PricePost>>;

    /// Adds `delta` to one counter and returns the new value.
    async fn increment_counter(&self, id: u64, kind: FeedbackKind, delta: i64) -> StoreResult<u64>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, email: &str) -> StoreResult<Option<UserFeedbackRecord>>;

    /// Creates an empty record, or returns the existing one untouched.
    async fn create(&self, email: &str) -> StoreResult<UserFeedbackRecord>;

    /// Appends an authored post id.
    async fn record_post(&self, email: &str, post_id: u64) -> StoreResult<()>;

    async fn mutate_vote_set(
        &self,
        email: &str,
        kind: FeedbackKind,
        post_id: u64,
        action: FeedbackAction,
    ) -> StoreResult<()>;
}

/// Mutual exclusion for one (post, user) pair, shared by every process that
/// talks to the same backend. Holders that crash lose the pair after a
/// backend-defined expiry.
#[async_trait]
pub trait PairLock: Send + Sync {
    /// Waits until the pair is free and takes it. The returned token is what
    /// [`PairLock::release`] checks ownership against.
    async fn acquire(&self, post_id: u64, email: &str) -> StoreResult<u64>;

    /// Frees the pair if `token` still holds it.
    async fn release(&self, post_id: u64, email: &str, token: u64) -> StoreResult<()>;
}
