//! # Price Posts
//!
//! Core of the price board: the records users submit, the radius query over
//! them, and the like/dislike ledger.
//!
//! Nothing here knows about HTTP or about which database is plugged in. The
//! engines are written against [`store::PriceStore`] and [`store::UserStore`];
//! [`memory::MemoryStore`] is the in-process implementation, the Redis one
//! lives in the server crate.
//!
//! ## Query
//!
//! [`geo::query`] takes any collection of posts plus a [`geo::PriceQuery`]:
//! - optional center (`lat` and `lng` together, or neither)
//! - radius in kilometres, 5 by default
//! - optional product substring, case-insensitive
//! - sort key: `Price_LTH` (default), `Price_HTL`, `Rating_LTH`, `Rating_HTL`
//!
//! ## Feedback
//!
//! [`feedback::FeedbackLedger::apply`] moves a (post, user) pair between
//! `None`, `Liked` and `Disliked`, keeping the post counters and the user's
//! vote sets in step.
pub mod feedback;
pub mod geo;
pub mod memory;
pub mod models;
pub mod store;

pub use feedback::{FeedbackError, FeedbackLedger, FeedbackOutcome};
pub use geo::{Coordinates, PriceQuery, QueryError, SortKey, haversine_km, query};
pub use models::{
    FeedbackAction, FeedbackKind, NewPricePost, PricePost, UserFeedbackRecord, ValidationError,
    VoteState, normalize_email,
};
pub use store::{PairLock, PriceStore, StoreError, StoreResult, UserStore};
