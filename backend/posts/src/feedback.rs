//! # Feedback Ledger
//!
//! Likes and dislikes on a post, kept in two places:
//! - the post's aggregate `likes` / `dislikes` counters ([`PriceStore`])
//! - the user's `likes` / `dislikes` id sets ([`UserStore`])
//!
//! ## Vote states
//!
//! Per (post, user) pair the state is one of `None`, `Liked`, `Disliked`.
//!
//! | from       | request         | to         | mutations                              |
//! |------------|-----------------|------------|----------------------------------------|
//! | `None`     | Add(k)          | k          | counter(k) + 1, set(k) += id           |
//! | k          | Remove(k)       | `None`     | counter(k) - 1, set(k) -= id           |
//! | opposite   | Add(k)          | k          | Remove(opposite) then Add(k)           |
//! | k          | Add(k)          | k          | none                                   |
//! | not k      | Remove(k)       | unchanged  | none                                   |
//!
//! A `Remove(k)` against a zero counter is refused with `Underflow` before
//! the vote state is looked at.
//!
//! ## Consistency
//!
//! Each step writes the counter first and the user's set second. Nothing is
//! rolled back across the two stores: if a counter write lands and a later
//! write fails, the caller gets [`FeedbackError::PartialFailure`] listing
//! what was applied.
//!
//! Requests on the same (post, user) pair are serialized by a keyed lock, so
//! the read of the user's vote state and the writes that follow cannot
//! interleave with another toggle on that pair. Different pairs never wait on
//! each other. When several processes share a backend, the ledger is built
//! [`with_shared_locks`](FeedbackLedger::with_shared_locks) and also holds the
//! backend's [`PairLock`] for the pair. Counter atomicity is the store's job.
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::{
    models::{FeedbackAction, FeedbackKind, PricePost, VoteState},
    store::{PairLock, PriceStore, StoreError, UserStore},
};

/// Idle pair locks are pruned once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedbackError {
    #[error("{kind} counter on post {post_id} is already zero")]
    Underflow { post_id: u64, kind: FeedbackKind },

    #[error("Unknown post: {0}")]
    UnknownPost(u64),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Invalid feedback type: {0}")]
    InvalidFeedbackType(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Feedback on post {post_id} partially applied ({}): {source}", .applied.join(", "))]
    PartialFailure {
        post_id: u64,
        applied: Vec<String>,
        source: StoreError,
    },

    #[error(transparent)]
    Store(StoreError),
}

/// One counter + set mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub kind: FeedbackKind,
    pub action: FeedbackAction,
}

impl Step {
    fn new(kind: FeedbackKind, action: FeedbackAction) -> Self {
        Self { kind, action }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.action, self.kind)
    }
}

/// Mutations needed to move from `state` under the request `(kind, action)`.
///
/// `post` is only consulted for the zero-counter guard on removals.
pub fn plan(
    post: &PricePost,
    state: VoteState,
    kind: FeedbackKind,
    action: FeedbackAction,
) -> Result<Vec<Step>, FeedbackError> {
    match action {
        FeedbackAction::Remove => {
            if post.counter(kind) == 0 {
                return Err(FeedbackError::Underflow {
                    post_id: post.id,
                    kind,
                });
            }

            if state == VoteState::of(kind) {
                Ok(vec![Step::new(kind, FeedbackAction::Remove)])
            } else {
                Ok(Vec::new())
            }
        }
        FeedbackAction::Add => {
            if state == VoteState::of(kind) {
                Ok(Vec::new())
            } else if state == VoteState::of(kind.opposite()) {
                Ok(vec![
                    Step::new(kind.opposite(), FeedbackAction::Remove),
                    Step::new(kind, FeedbackAction::Add),
                ])
            } else {
                Ok(vec![Step::new(kind, FeedbackAction::Add)])
            }
        }
    }
}

/// What a successful [`FeedbackLedger::apply`] left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub post_id: u64,
    pub state: VoteState,
    pub changed: bool,
    pub likes: u64,
    pub dislikes: u64,
}

enum StepError {
    /// The counter write failed; this step changed nothing.
    Counter(StoreError),
    /// The counter write landed, the set write did not.
    VoteSet(StoreError),
}

#[derive(Default)]
struct PairLocks {
    table: Mutex<HashMap<(u64, String), Arc<AsyncMutex<()>>>>,
}

impl PairLocks {
    async fn lock(&self, post_id: u64, email: &str) -> Result<OwnedMutexGuard<()>, FeedbackError> {
        let pair = {
            let mut table = self.table.lock().map_err(|_| {
                let reason = "feedback lock table poisoned".to_string();
                FeedbackError::Store(StoreError::Backend(reason))
            })?;

            if table.len() >= PRUNE_THRESHOLD {
                table.retain(|_, lock| Arc::strong_count(lock) > 1);
            }

            table
                .entry((post_id, email.to_string()))
                .or_default()
                .clone()
        };

        Ok(pair.lock_owned().await)
    }
}

pub struct FeedbackLedger {
    prices: Arc<dyn PriceStore>,
    users: Arc<dyn UserStore>,
    locks: PairLocks,
    shared: Option<Arc<dyn PairLock>>,
}

impl FeedbackLedger {
    pub fn new(prices: Arc<dyn PriceStore>, users: Arc<dyn UserStore>) -> Self {
        Self {
            prices,
            users,
            locks: PairLocks::default(),
            shared: None,
        }
    }

    pub fn with_shared_locks(mut self, shared: Arc<dyn PairLock>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub async fn apply(
        &self,
        post_id: u64,
        email: &str,
        kind: FeedbackKind,
        action: FeedbackAction,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let _pair = self.locks.lock(post_id, email).await?;

        let Some(shared) = &self.shared else {
            return self.apply_locked(post_id, email, kind, action).await;
        };

        let token = shared
            .acquire(post_id, email)
            .await
            .map_err(FeedbackError::Store)?;

        let result = self.apply_locked(post_id, email, kind, action).await;

        if let Err(e) = shared.release(post_id, email, token).await {
            warn!(post_id, email, %e, "Failed to release pair lock, it will expire");
        }

        result
    }

    async fn apply_locked(
        &self,
        post_id: u64,
        email: &str,
        kind: FeedbackKind,
        action: FeedbackAction,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let post = self
            .prices
            .fetch_by_ids(&[post_id])
            .await
            .map_err(FeedbackError::Store)?
            .into_iter()
            .next()
            .ok_or(FeedbackError::UnknownPost(post_id))?;

        let user = self
            .users
            .get(email)
            .await
            .map_err(FeedbackError::Store)?
            .ok_or_else(|| FeedbackError::UnknownUser(email.to_string()))?;

        let before = user.vote_on(post_id);
        let steps = plan(&post, before, kind, action)?;

        debug!(post_id, email, %kind, %action, ?before, steps = steps.len(), "Applying feedback");

        let mut outcome = FeedbackOutcome {
            post_id,
            state: before,
            changed: !steps.is_empty(),
            likes: post.likes,
            dislikes: post.dislikes,
        };

        let mut applied: Vec<String> = Vec::new();

        for step in steps {
            match self.run(post_id, email, step).await {
                Ok(value) => {
                    match step.kind {
                        FeedbackKind::Like => outcome.likes = value,
                        FeedbackKind::Dislike => outcome.dislikes = value,
                    }
                    applied.push(step.to_string());
                }
                Err(StepError::Counter(source)) if applied.is_empty() => {
                    return Err(from_store(post_id, step.kind, source));
                }
                Err(StepError::Counter(source)) => {
                    warn!(post_id, email, ?applied, %source, "Feedback partially applied");
                    return Err(FeedbackError::PartialFailure {
                        post_id,
                        applied,
                        source,
                    });
                }
                Err(StepError::VoteSet(source)) => {
                    applied.push(format!("{step} counter"));
                    warn!(post_id, email, ?applied, %source, "Feedback partially applied");
                    return Err(FeedbackError::PartialFailure {
                        post_id,
                        applied,
                        source,
                    });
                }
            }
        }

        if outcome.changed {
            outcome.state = match action {
                FeedbackAction::Add => VoteState::of(kind),
                FeedbackAction::Remove => VoteState::None,
            };
        }

        Ok(outcome)
    }

    async fn run(&self, post_id: u64, email: &str, step: Step) -> Result<u64, StepError> {
        let value = self
            .prices
            .increment_counter(post_id, step.kind, step.action.delta())
            .await
            .map_err(StepError::Counter)?;

        self.users
            .mutate_vote_set(email, step.kind, post_id, step.action)
            .await
            .map_err(StepError::VoteSet)?;

        Ok(value)
    }
}

fn from_store(post_id: u64, kind: FeedbackKind, err: StoreError) -> FeedbackError {
    match err {
        StoreError::Underflow => FeedbackError::Underflow { post_id, kind },
        StoreError::UnknownPost(id) => FeedbackError::UnknownPost(id),
        StoreError::UnknownUser(email) => FeedbackError::UnknownUser(email),
        other => FeedbackError::Store(other),
    }
}
