use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::{PostId, User, UserId, VoteDirection};

const SNIPPET_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub text: String,
    pub points: i32,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn text_snippet(&self) -> String {
        self.text.chars().take(SNIPPET_CHARS).collect()
    }
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub text: String,
    pub creator_id: UserId,
}

// Create post request
#[derive(Debug, Validate, Deserialize)]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[validate(length(min = 1))]
    pub text: String,
}

// Update post request
#[derive(Debug, Validate, Deserialize)]
pub struct UpdatePostRequest {
    #[validate(length(min = 1, max = 300))]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    pub text: Option<String>,
}

/// Position of the last post on a page. Posts sharing a `created_at` are
/// ordered by `id`, so the pair is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedCursor {
    pub created_at: DateTime<Utc>,
    pub id: PostId,
}

impl FeedCursor {
    pub fn of(post: &Post) -> Self {
        Self {
            created_at: post.created_at,
            id: post.id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<u32>,
    pub cursor: Option<DateTime<Utc>>,
    pub cursor_id: Option<PostId>,
}

impl FeedQuery {
    // Without an id the page starts strictly before `cursor`.
    pub fn cursor(&self) -> Option<FeedCursor> {
        self.cursor.map(|created_at| FeedCursor {
            created_at,
            id: self.cursor_id.unwrap_or(PostId::MIN),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostCreator {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for PostCreator {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

// Post response with its creator and the viewer's own vote
#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: PostId,
    pub title: String,
    pub text: String,
    pub text_snippet: String,
    pub points: i32,
    pub creator: PostCreator,
    pub vote_status: Option<VoteDirection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostResponse {
    pub fn new(post: Post, creator: PostCreator, vote_status: Option<VoteDirection>) -> Self {
        let text_snippet = post.text_snippet();
        Self {
            id: post.id,
            title: post.title,
            text: post.text,
            text_snippet,
            points: post.points,
            creator,
            vote_status,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedPosts {
    pub posts: Vec<PostResponse>,
    pub has_more: bool,
    pub next_cursor: Option<FeedCursor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let now = Utc::now();
        let post = Post {
            id: 1,
            title: "t".to_string(),
            text: "é".repeat(80),
            points: 0,
            creator_id: 1,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(post.text_snippet().chars().count(), 50);
    }

    #[test]
    fn test_cursor_without_id_starts_before_timestamp() {
        let now = Utc::now();
        let query = FeedQuery {
            limit: None,
            cursor: Some(now),
            cursor_id: None,
        };
        let cursor = query.cursor().unwrap();

        // every post created at `now` compares above the cursor, so none is listed
        assert!(FeedCursor { created_at: now, id: 1 } > cursor);
        assert_eq!(cursor.created_at, now);
    }
}
