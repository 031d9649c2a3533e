use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    AppState,
    auth::{AuthUser, OptionalAuthUser},
    error::{AppError, Result},
    extract::AppJson,
    models::{
        CreatePostRequest, FeedQuery, PaginatedPosts, PostId, PostResponse, UpdatePostRequest,
        VoteRequest, VoteResponse,
    },
    services::post_service,
    store::Store,
};

const VOTE_RATE_WINDOW_SECONDS: u64 = 3600;

pub async fn get_posts<S: Store>(
    State(state): State<AppState<S>>,
    Query(params): Query<FeedQuery>,
    auth_user: OptionalAuthUser,
) -> Result<Json<PaginatedPosts>> {
    let page = post_service::feed(
        &state.store,
        auth_user.user_id(),
        params.limit,
        params.cursor(),
        state.config.feed_max_limit,
    )
    .await?;

    Ok(Json(page))
}

pub async fn get_post<S: Store>(
    State(state): State<AppState<S>>,
    Path(post_id): Path<PostId>,
    auth_user: OptionalAuthUser,
) -> Result<Json<PostResponse>> {
    let post = post_service::get_post(&state.store, post_id, auth_user.user_id())
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    Ok(Json(post))
}

pub async fn create_post<S: Store>(
    State(state): State<AppState<S>>,
    auth_user: AuthUser,
    AppJson(payload): AppJson<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostResponse>)> {
    payload.validate()?;

    let post = post_service::create_post(&state.store, auth_user.user_id, payload).await?;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn update_post<S: Store>(
    State(state): State<AppState<S>>,
    auth_user: AuthUser,
    Path(post_id): Path<PostId>,
    AppJson(payload): AppJson<UpdatePostRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;

    let post =
        post_service::update_post(&state.store, auth_user.user_id, post_id, payload).await?;

    Ok(Json(json!({
        "message": "Post updated successfully",
        "post": post
    })))
}

pub async fn delete_post<S: Store>(
    State(state): State<AppState<S>>,
    auth_user: AuthUser,
    Path(post_id): Path<PostId>,
) -> Result<Json<Value>> {
    post_service::delete_post(&state.store, auth_user.user_id, post_id).await?;

    Ok(Json(json!({
        "message": "Post deleted successfully"
    })))
}

// The ledger itself rejects a missing user, so the extractor stays optional here.
pub async fn vote_post<S: Store>(
    State(state): State<AppState<S>>,
    auth_user: OptionalAuthUser,
    Path(post_id): Path<PostId>,
    AppJson(payload): AppJson<VoteRequest>,
) -> Result<Json<VoteResponse>> {
    let user_id = auth_user.user_id();

    if let Some(user_id) = user_id {
        let rate_limit_key = format!("vote_post:{}", user_id);
        if !state
            .sessions
            .check_rate_limit(
                &rate_limit_key,
                state.config.vote_rate_limit,
                VOTE_RATE_WINDOW_SECONDS,
            )
            .await?
        {
            return Err(AppError::RateLimit);
        }
    }

    let cast = state
        .ledger
        .cast_vote(user_id, post_id, payload.value)
        .await?;

    Ok(Json(VoteResponse {
        success: true,
        outcome: cast.outcome,
        points: cast.points,
        vote_status: payload.value,
    }))
}
