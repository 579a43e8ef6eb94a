use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use crate::{
    models::{FeedbackAction, FeedbackKind, NewPricePost, PricePost, UserFeedbackRecord},
    store::{PairLock, PriceStore, StoreError, StoreResult, UserStore},
};

const LOCK_WAIT: Duration = Duration::from_secs(2);
const LOCK_RETRY: Duration = Duration::from_millis(2);

/// Process-local store. Every mutation happens under a lock, so counter
/// updates are atomic within the process.
#[derive(Default)]
pub struct MemoryStore {
    posts: Mutex<Posts>,
    users: Mutex<HashMap<String, UserFeedbackRecord>>,
    held: Mutex<HashMap<(u64, String), u64>>,
    lock_seq: AtomicU64,
}

#[derive(Default)]
struct Posts {
    next_id: u64,
    by_id: BTreeMap<u64, PricePost>,
}

fn guard<T>(lock: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    lock.lock()
        .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads existing posts as-is, keeping their ids and counters.
    pub fn with_posts(posts: impl IntoIterator<Item = PricePost>) -> Self {
        let by_id: BTreeMap<u64, PricePost> = posts.into_iter().map(|p| (p.id, p)).collect();
        let next_id = by_id.keys().next_back().copied().unwrap_or(0);

        Self {
            posts: Mutex::new(Posts { next_id, by_id }),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn insert(&self, post: NewPricePost) -> StoreResult<u64> {
        let mut posts = guard(&self.posts)?;

        posts.next_id += 1;
        let id = posts.next_id;
        posts.by_id.insert(id, PricePost::from_new(id, post));

        Ok(id)
    }

    async fn fetch_all(&self) -> StoreResult<Vec<PricePost>> {
        Ok(guard(&self.posts)?.by_id.values().cloned().collect())
    }

    async fn fetch_by_ids(&self, ids: &[u64]) -> StoreResult<Vec<PricePost>> {
        let posts = guard(&self.posts)?;

        Ok(ids
            .iter()
            .filter_map(|id| posts.by_id.get(id).cloned())
            .collect())
    }

    async fn increment_counter(&self, id: u64, kind: FeedbackKind, delta: i64) -> StoreResult<u64> {
        let mut posts = guard(&self.posts)?;
        let post = posts.by_id.get_mut(&id).ok_or(StoreError::UnknownPost(id))?;

        let counter = match kind {
            FeedbackKind::Like => &mut post.likes,
            FeedbackKind::Dislike => &mut post.dislikes,
        };

        *counter = counter
            .checked_add_signed(delta)
            .ok_or(StoreError::Underflow)?;

        Ok(*counter)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get(&self, email: &str) -> StoreResult<Option<UserFeedbackRecord>> {
        Ok(guard(&self.users)?.get(email).cloned())
    }

    async fn create(&self, email: &str) -> StoreResult<UserFeedbackRecord> {
        Ok(guard(&self.users)?
            .entry(email.to_string())
            .or_insert_with(|| UserFeedbackRecord::new(email))
            .clone())
    }

    async fn record_post(&self, email: &str, post_id: u64) -> StoreResult<()> {
        let mut users = guard(&self.users)?;
        let user = users
            .get_mut(email)
            .ok_or_else(|| StoreError::UnknownUser(email.to_string()))?;

        user.posts.push(post_id);
        Ok(())
    }

    async fn mutate_vote_set(
        &self,
        email: &str,
        kind: FeedbackKind,
        post_id: u64,
        action: FeedbackAction,
    ) -> StoreResult<()> {
        let mut users = guard(&self.users)?;
        let votes = users
            .get_mut(email)
            .ok_or_else(|| StoreError::UnknownUser(email.to_string()))?
            .votes_mut(kind);

        match action {
            FeedbackAction::Add => votes.insert(post_id),
            FeedbackAction::Remove => votes.remove(&post_id),
        };

        Ok(())
    }
}

#[async_trait]
impl PairLock for MemoryStore {
    async fn acquire(&self, post_id: u64, email: &str) -> StoreResult<u64> {
        let token = self.lock_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + LOCK_WAIT;

        loop {
            {
                let mut held = guard(&self.held)?;
                if let Entry::Vacant(entry) = held.entry((post_id, email.to_string())) {
                    entry.insert(token);
                    return Ok(token);
                }
            }

            if Instant::now() >= deadline {
                return Err(StoreError::Backend(format!(
                    "timed out waiting for post {post_id} / {email}"
                )));
            }

            sleep(LOCK_RETRY).await;
        }
    }

    async fn release(&self, post_id: u64, email: &str, token: u64) -> StoreResult<()> {
        let mut held = guard(&self.held)?;
        let key = (post_id, email.to_string());

        if held.get(&key) == Some(&token) {
            held.remove(&key);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn new_post(product: &str) -> NewPricePost {
        NewPricePost {
            price: 2.5,
            address: "1 Elm St".to_string(),
            lat: 40.0,
            lng: -86.9,
            date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            product: product.to_string(),
            by: "a@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = MemoryStore::new();

        let first = store.insert(new_post("Milk")).await.unwrap();
        let second = store.insert(new_post("Eggs")).await.unwrap();
        assert!(second > first);

        let all = store.fetch_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].likes, 0);

        let some = store.fetch_by_ids(&[second, 999, first]).await.unwrap();
        let ids: Vec<u64> = some.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_counter_underflow() {
        let store = MemoryStore::new();
        let id = store.insert(new_post("Milk")).await.unwrap();

        assert_eq!(store.increment_counter(id, FeedbackKind::Like, 1).await, Ok(1));
        assert_eq!(store.increment_counter(id, FeedbackKind::Like, -1).await, Ok(0));
        assert_eq!(
            store.increment_counter(id, FeedbackKind::Like, -1).await,
            Err(StoreError::Underflow)
        );
        assert_eq!(
            store.increment_counter(42, FeedbackKind::Like, 1).await,
            Err(StoreError::UnknownPost(42))
        );
    }

    #[tokio::test]
    async fn test_with_posts_continues_ids() {
        let mut post = PricePost::from_new(7, new_post("Milk"));
        post.likes = 3;
        let store = MemoryStore::with_posts(vec![post]);

        assert_eq!(store.insert(new_post("Eggs")).await, Ok(8));
        assert_eq!(store.fetch_by_ids(&[7]).await.unwrap()[0].likes, 3);
    }

    #[tokio::test]
    async fn test_pair_lock() {
        let store = MemoryStore::new();

        let first = store.acquire(1, "a@example.com").await.unwrap();
        // another pair is independent
        let other = store.acquire(2, "a@example.com").await.unwrap();

        // a stale token does not free the pair
        store.release(1, "a@example.com", other).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), store.acquire(1, "a@example.com"))
                .await
                .is_err()
        );

        store.release(1, "a@example.com", first).await.unwrap();
        let second = store.acquire(1, "a@example.com").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_user_sets() {
        let store = MemoryStore::new();

        assert_eq!(UserStore::get(&store, "a@example.com").await, Ok(None));
        store.create("a@example.com").await.unwrap();
        store.record_post("a@example.com", 3).await.unwrap();
        store
            .mutate_vote_set("a@example.com", FeedbackKind::Like, 3, FeedbackAction::Add)
            .await
            .unwrap();

        // create is idempotent and keeps existing data
        let user = store.create("a@example.com").await.unwrap();
        assert_eq!(user.posts, vec![3]);
        assert!(user.likes.contains(&3));

        assert_eq!(
            store
                .mutate_vote_set("b@example.com", FeedbackKind::Like, 3, FeedbackAction::Add)
                .await,
            Err(StoreError::UnknownUser("b@example.com".to_string()))
        );
    }
}
