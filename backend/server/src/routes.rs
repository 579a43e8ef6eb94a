use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use posts::{FeedbackError, FeedbackOutcome, NewPricePost, PricePost, UserFeedbackRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::AppError,
    search::{PostView, SearchParams, search},
    state::State,
    utils::{FeedbackPayload, require_email},
};

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "connection successful")
}

pub async fn search_handler(
    AxumState(state): AxumState<Arc<State>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<PostView>>, AppError> {
    let results = search(&state, &params).await?;
    debug!(count = results.len(), "Search served");

    Ok(Json(results))
}

#[derive(Serialize)]
pub struct Created {
    id: u64,
}

pub async fn insert_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<NewPricePost>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let post = payload.normalized();
    post.validate()?;

    let email = require_email(&post.by)?;

    // Submitting a price implies a user record, same as signing in.
    state.users.create(&email).await?;
    let id = state.prices.insert(post).await?;
    state.users.record_post(&email, id).await?;

    info!(id, %email, "New price posted");
    Ok((StatusCode::CREATED, Json(Created { id })))
}

pub async fn feedback_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<FeedbackPayload>, JsonRejection>,
) -> Result<Json<FeedbackOutcome>, AppError> {
    let Json(payload) = payload?;
    let (kind, action) = payload.parse()?;
    let email = require_email(&payload.email)?;

    let outcome = state.ledger.apply(payload.id, &email, kind, action).await?;

    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct SignIn {
    email: String,
}

pub async fn sign_in_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<SignIn>, JsonRejection>,
) -> Result<Json<UserFeedbackRecord>, AppError> {
    let Json(payload) = payload?;
    let email = require_email(&payload.email)?;

    Ok(Json(state.users.create(&email).await?))
}

async fn find_user(state: &State, email: &str) -> Result<UserFeedbackRecord, AppError> {
    let email = require_email(email)?;

    let user = state.users.get(&email).await?;

    user.ok_or_else(|| FeedbackError::UnknownUser(email).into())
}

pub async fn user_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(email): Path<String>,
) -> Result<Json<UserFeedbackRecord>, AppError> {
    Ok(Json(find_user(&state, &email).await?))
}

#[derive(Serialize)]
pub struct UserFeedback {
    likes: Vec<u64>,
    dislikes: Vec<u64>,
}

pub async fn user_feedback_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(email): Path<String>,
) -> Result<Json<UserFeedback>, AppError> {
    let user = find_user(&state, &email).await?;

    Ok(Json(UserFeedback {
        likes: user.likes.into_iter().collect(),
        dislikes: user.dislikes.into_iter().collect(),
    }))
}

#[derive(Serialize)]
pub struct UserPosts {
    likes: Vec<PricePost>,
    dislikes: Vec<PricePost>,
    posts: Vec<PricePost>,
}

pub async fn user_posts_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(email): Path<String>,
) -> Result<Json<UserPosts>, AppError> {
    let user = find_user(&state, &email).await?;

    let likes: Vec<u64> = user.likes.into_iter().collect();
    let dislikes: Vec<u64> = user.dislikes.into_iter().collect();

    Ok(Json(UserPosts {
        likes: state.prices.fetch_by_ids(&likes).await?,
        dislikes: state.prices.fetch_by_ids(&dislikes).await?,
        posts: state.prices.fetch_by_ids(&user.posts).await?,
    }))
}
