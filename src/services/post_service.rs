use std::collections::HashMap;

use crate::{
    error::{AppError, Result},
    models::{
        CreatePostRequest, FeedCursor, NewPost, PaginatedPosts, Post, PostCreator, PostId,
        PostResponse, UpdatePostRequest, UserId, VoteDirection,
    },
    store::{PostStore, UserStore},
};

pub const DEFAULT_FEED_LIMIT: u32 = 15;

/// Creators of the given posts, one round trip for the batch.
async fn creators<S: UserStore + ?Sized>(
    store: &S,
    posts: &[Post],
) -> Result<HashMap<UserId, PostCreator>> {
    if posts.is_empty() {
        return Ok(HashMap::new());
    }

    let mut ids: Vec<UserId> = posts.iter().map(|post| post.creator_id).collect();
    ids.sort_unstable();
    ids.dedup();

    Ok(store
        .find_users(&ids)
        .await?
        .iter()
        .map(|user| (user.id, PostCreator::from(user)))
        .collect())
}

fn creator_of(creators: &HashMap<UserId, PostCreator>, post: &Post) -> Result<PostCreator> {
    creators.get(&post.creator_id).cloned().ok_or_else(|| {
        AppError::Internal(format!(
            "creator {} of post {} is missing",
            post.creator_id, post.id
        ))
    })
}

pub async fn create_post<S: PostStore + UserStore + ?Sized>(
    store: &S,
    creator_id: UserId,
    payload: CreatePostRequest,
) -> Result<PostResponse> {
    if payload.title.trim().is_empty() || payload.text.trim().is_empty() {
        return Err(AppError::Validation(
            "Posts must have a title and text".to_string(),
        ));
    }

    let post = store
        .create_post(NewPost {
            title: payload.title,
            text: payload.text,
            creator_id,
        })
        .await?;

    tracing::info!(post_id = post.id, creator_id, "post created");

    let creators = creators(store, std::slice::from_ref(&post)).await?;
    let creator = creator_of(&creators, &post)?;
    Ok(PostResponse::new(post, creator, None))
}

pub async fn get_post<S: PostStore + UserStore + ?Sized>(
    store: &S,
    post_id: PostId,
    viewer_id: Option<UserId>,
) -> Result<Option<PostResponse>> {
    let Some(post) = store.find_post(post_id).await? else {
        return Ok(None);
    };

    let vote_status = match viewer_id {
        Some(viewer_id) => store
            .vote_statuses(viewer_id, &[post_id])
            .await?
            .into_iter()
            .next()
            .map(|(_, direction)| direction),
        None => None,
    };

    let creators = creators(store, std::slice::from_ref(&post)).await?;
    let creator = creator_of(&creators, &post)?;
    Ok(Some(PostResponse::new(post, creator, vote_status)))
}

pub async fn update_post<S: PostStore + ?Sized>(
    store: &S,
    actor_id: UserId,
    post_id: PostId,
    payload: UpdatePostRequest,
) -> Result<Post> {
    let post = store
        .find_post(post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    if post.creator_id != actor_id {
        return Err(AppError::Authorization(
            "Can only edit your own posts".to_string(),
        ));
    }

    store
        .update_post(post_id, payload.title, payload.text)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
}

pub async fn delete_post<S: PostStore + ?Sized>(
    store: &S,
    actor_id: UserId,
    post_id: PostId,
) -> Result<()> {
    let post = store
        .find_post(post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    if post.creator_id != actor_id {
        return Err(AppError::Authorization(
            "Cannot delete this post".to_string(),
        ));
    }

    if !store.delete_post(post_id).await? {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    tracing::info!(post_id, actor_id, "post deleted");
    Ok(())
}

/// Newest-first page of posts after `cursor`.
///
/// One extra row is fetched to learn whether another page exists; it is not
/// returned. Vote statuses and creators for the whole page each come from a
/// single batched lookup.
pub async fn feed<S: PostStore + UserStore + ?Sized>(
    store: &S,
    viewer_id: Option<UserId>,
    limit: Option<u32>,
    cursor: Option<FeedCursor>,
    max_limit: u32,
) -> Result<PaginatedPosts> {
    let limit = limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, max_limit.max(1));

    let mut posts = store.list_posts(limit.saturating_add(1), cursor).await?;
    let has_more = posts.len() > limit as usize;
    posts.truncate(limit as usize);

    let statuses: HashMap<PostId, VoteDirection> = match viewer_id {
        Some(viewer_id) if !posts.is_empty() => {
            let ids: Vec<PostId> = posts.iter().map(|post| post.id).collect();
            store
                .vote_statuses(viewer_id, &ids)
                .await?
                .into_iter()
                .collect()
        }
        _ => HashMap::new(),
    };

    let creators = creators(store, &posts).await?;
    let next_cursor = posts.last().map(FeedCursor::of);
    let posts = posts
        .into_iter()
        .map(|post| {
            let creator = creator_of(&creators, &post)?;
            let status = statuses.get(&post.id).copied();
            Ok(PostResponse::new(post, creator, status))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PaginatedPosts {
        posts,
        has_more,
        next_cursor,
    })
}
