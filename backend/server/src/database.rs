//! # Redis
//!
//! RAM database holding every post, its counters, and the per-user vote sets.
//!
//! ## Layout
//!
//! - `prices:next_id` (**int**): `INCR` to hand out post ids
//! - `prices` (**hash**): post id to JSON body, counters excluded
//! - `prices:likes`, `prices:dislikes` (**hash**): post id to counter
//! - `users` (**set**): known emails
//! - `user:{email}:posts` (**list**): authored ids, append-only
//! - `user:{email}:likes`, `user:{email}:dislikes` (**set**): current votes
//! - `feedback:lock_seq` (**int**): `INCR` to hand out pair lock tokens
//! - `feedback:lock:{id}:{email}` (**string**, expiring): holder's token
//!
//! ## Atomicity
//!
//! Counters are only ever changed by [`COUNTER_SCRIPT`], which checks that
//! the post exists and that the result stays non-negative before writing.
//! Redis runs scripts one at a time, so concurrent likes cannot lose updates
//! even across server processes.
//!
//! A feedback toggle reads the user's vote state before writing, so the
//! ledger also takes the pair lock (`SET NX PX`) for its duration. The lock
//! expires after [`LOCK_TTL`] if its holder dies.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use posts::{
    FeedbackAction, FeedbackKind, NewPricePost, PairLock, PricePost, PriceStore, StoreError,
    StoreResult, UserFeedbackRecord, UserStore,
};
use redis::{
    AsyncCommands, Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::debug;

pub const NEXT_ID_KEY: &str = "prices:next_id";
pub const POSTS_KEY: &str = "prices";
pub const LIKES_KEY: &str = "prices:likes";
pub const DISLIKES_KEY: &str = "prices:dislikes";
pub const USERS_KEY: &str = "users";
pub const LOCK_SEQ_KEY: &str = "feedback:lock_seq";

pub const LOCK_TTL: Duration = Duration::from_secs(5);
const LOCK_WAIT: Duration = Duration::from_secs(2);
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// KEYS[1] lock key, ARGV[1] token. Deletes the key only if the token still
/// holds it.
pub const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// KEYS[1] post hash, KEYS[2] counter hash, ARGV[1] id, ARGV[2] delta.
/// Returns the new value, -1 on underflow, -2 for an unknown post.
pub const COUNTER_SCRIPT: &str = r#"
    if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
        return -2
    end
    local current = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
    local next = current + tonumber(ARGV[2])
    if next < 0 then
        return -1
    end
    redis.call('HSET', KEYS[2], ARGV[1], next)
    return next
"#;

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    client.get_connection_manager_with_config(config).await
}

fn counter_key(kind: FeedbackKind) -> &'static str {
    match kind {
        FeedbackKind::Like => LIKES_KEY,
        FeedbackKind::Dislike => DISLIKES_KEY,
    }
}

fn user_key(email: &str, field: &str) -> String {
    format!("user:{email}:{field}")
}

fn lock_key(post_id: u64, email: &str) -> String {
    format!("feedback:lock:{post_id}:{email}")
}

fn backend(err: RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Stored body of a post. Counters live in their own hashes.
#[derive(Serialize, Deserialize)]
struct StoredPost {
    #[serde(flatten)]
    post: NewPricePost,
}

fn decode(id: u64, body: &str, likes: u64, dislikes: u64) -> StoreResult<PricePost> {
    let stored: StoredPost = serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        key: format!("{POSTS_KEY}/{id}"),
        reason: e.to_string(),
    })?;

    let mut post = PricePost::from_new(id, stored.post);
    post.likes = likes;
    post.dislikes = dislikes;
    Ok(post)
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    counter_script: Script,
    release_script: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            counter_script: Script::new(COUNTER_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, RedisError> {
        Ok(Self::new(init_redis(redis_url).await?))
    }

    async fn counters(&self, ids: &[u64]) -> StoreResult<(Vec<Option<u64>>, Vec<Option<u64>>)> {
        let mut connection = self.connection.clone();

        let (likes, dislikes): (Vec<Option<u64>>, Vec<Option<u64>>) = redis::pipe()
            .cmd("HMGET")
            .arg(LIKES_KEY)
            .arg(ids)
            .cmd("HMGET")
            .arg(DISLIKES_KEY)
            .arg(ids)
            .query_async(&mut connection)
            .await
            .map_err(backend)?;

        Ok((likes, dislikes))
    }

    async fn ensure_user(&self, email: &str) -> StoreResult<()> {
        let mut connection = self.connection.clone();

        let known: bool = connection
            .sismember(USERS_KEY, email)
            .await
            .map_err(backend)?;

        if !known {
            return Err(StoreError::UnknownUser(email.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl PriceStore for RedisStore {
    async fn insert(&self, post: NewPricePost) -> StoreResult<u64> {
        let mut connection = self.connection.clone();

        let id: u64 = connection.incr(NEXT_ID_KEY, 1).await.map_err(backend)?;
        let body = serde_json::to_string(&StoredPost { post }).map_err(|e| StoreError::Corrupt {
            key: format!("{POSTS_KEY}/{id}"),
            reason: e.to_string(),
        })?;

        let _: () = connection
            .hset(POSTS_KEY, id, body)
            .await
            .map_err(backend)?;

        debug!(id, "Inserted post");
        Ok(id)
    }

    async fn fetch_all(&self) -> StoreResult<Vec<PricePost>> {
        let mut connection = self.connection.clone();

        let (bodies, likes, dislikes): (
            HashMap<u64, String>,
            HashMap<u64, u64>,
            HashMap<u64, u64>,
        ) = redis::pipe()
            .hgetall(POSTS_KEY)
            .hgetall(LIKES_KEY)
            .hgetall(DISLIKES_KEY)
            .query_async(&mut connection)
            .await
            .map_err(backend)?;

        let mut posts = bodies
            .iter()
            .map(|(&id, body)| {
                decode(
                    id,
                    body,
                    likes.get(&id).copied().unwrap_or(0),
                    dislikes.get(&id).copied().unwrap_or(0),
                )
            })
            .collect::<StoreResult<Vec<_>>>()?;

        posts.sort_by_key(|post| post.id);
        Ok(posts)
    }

    async fn fetch_by_ids(&self, ids: &[u64]) -> StoreResult<Vec<PricePost>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut connection = self.connection.clone();

        let bodies: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(POSTS_KEY)
            .arg(ids)
            .query_async(&mut connection)
            .await
            .map_err(backend)?;
        let (likes, dislikes) = self.counters(ids).await?;

        ids.iter()
            .zip(bodies)
            .zip(likes.into_iter().zip(dislikes))
            .filter_map(|((&id, body), (likes, dislikes))| {
                body.map(|body| decode(id, &body, likes.unwrap_or(0), dislikes.unwrap_or(0)))
            })
            .collect()
    }

    async fn increment_counter(&self, id: u64, kind: FeedbackKind, delta: i64) -> StoreResult<u64> {
        let mut connection = self.connection.clone();

        let result: i64 = self
            .counter_script
            .key(POSTS_KEY)
            .key(counter_key(kind))
            .arg(id)
            .arg(delta)
            .invoke_async(&mut connection)
            .await
            .map_err(backend)?;

        match result {
            -2 => Err(StoreError::UnknownPost(id)),
            -1 => Err(StoreError::Underflow),
            value => Ok(value as u64),
        }
    }
}

#[async_trait]
impl UserStore for RedisStore {
    async fn get(&self, email: &str) -> StoreResult<Option<UserFeedbackRecord>> {
        let mut connection = self.connection.clone();

        let (known, posts, likes, dislikes): (bool, Vec<u64>, Vec<u64>, Vec<u64>) = redis::pipe()
            .sismember(USERS_KEY, email)
            .lrange(user_key(email, "posts"), 0, -1)
            .smembers(user_key(email, "likes"))
            .smembers(user_key(email, "dislikes"))
            .query_async(&mut connection)
            .await
            .map_err(backend)?;

        if !known {
            return Ok(None);
        }

        Ok(Some(UserFeedbackRecord {
            email: email.to_string(),
            posts,
            likes: likes.into_iter().collect(),
            dislikes: dislikes.into_iter().collect(),
        }))
    }

    async fn create(&self, email: &str) -> StoreResult<UserFeedbackRecord> {
        let mut connection = self.connection.clone();

        let added: bool = connection.sadd(USERS_KEY, email).await.map_err(backend)?;
        if added {
            debug!(email, "Created user");
        }

        self.get(email)
            .await?
            .ok_or_else(|| StoreError::UnknownUser(email.to_string()))
    }

    async fn record_post(&self, email: &str, post_id: u64) -> StoreResult<()> {
        self.ensure_user(email).await?;

        let mut connection = self.connection.clone();
        let _: () = connection
            .rpush(user_key(email, "posts"), post_id)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn mutate_vote_set(
        &self,
        email: &str,
        kind: FeedbackKind,
        post_id: u64,
        action: FeedbackAction,
    ) -> StoreResult<()> {
        self.ensure_user(email).await?;

        let mut connection = self.connection.clone();
        let key = user_key(email, kind.field());

        let _: () = match action {
            FeedbackAction::Add => connection.sadd(key, post_id).await,
            FeedbackAction::Remove => connection.srem(key, post_id).await,
        }
        .map_err(backend)?;

        Ok(())
    }
}

#[async_trait]
impl PairLock for RedisStore {
    async fn acquire(&self, post_id: u64, email: &str) -> StoreResult<u64> {
        let mut connection = self.connection.clone();

        let token: u64 = connection.incr(LOCK_SEQ_KEY, 1).await.map_err(backend)?;
        let key = lock_key(post_id, email);
        let deadline = Instant::now() + LOCK_WAIT;

        loop {
            let taken: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL.as_millis() as u64)
                .query_async(&mut connection)
                .await
                .map_err(backend)?;

            if taken.is_some() {
                return Ok(token);
            }

            if Instant::now() >= deadline {
                return Err(StoreError::Backend(format!("timed out waiting for {key}")));
            }

            sleep(LOCK_RETRY).await;
        }
    }

    async fn release(&self, post_id: u64, email: &str, token: u64) -> StoreResult<()> {
        let mut connection = self.connection.clone();

        let _: i64 = self
            .release_script
            .key(lock_key(post_id, email))
            .arg(token)
            .invoke_async(&mut connection)
            .await
            .map_err(backend)?;

        Ok(())
    }
}
