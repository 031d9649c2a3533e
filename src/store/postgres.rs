use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};
use std::time::Duration;

use crate::{
    error::{AppError, Result, is_foreign_key_violation},
    models::{
        FeedCursor, NewPost, NewUser, Post, PostId, User, UserId, Vote, VoteDirection, VoteRow,
    },
    store::{PostStore, Store, UserStore, VoteStore, VoteTransaction},
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

pub struct PgVoteTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl VoteStore for PgStore {
    type Tx = PgVoteTx;

    async fn begin(&self) -> Result<PgVoteTx> {
        let tx = self.pool.begin().await?;
        Ok(PgVoteTx { tx })
    }
}

#[async_trait]
impl VoteTransaction for PgVoteTx {
    async fn lock_post_points(&mut self, post_id: PostId) -> Result<Option<i32>> {
        // Row lock held until commit/rollback; concurrent votes on the post queue here.
        let points: Option<i32> =
            sqlx::query_scalar("SELECT points FROM posts WHERE id = $1 FOR UPDATE")
                .bind(post_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(points)
    }

    async fn find_vote_by_user_and_post(
        &mut self,
        user_id: UserId,
        post_id: PostId,
    ) -> Result<Option<Vote>> {
        let row = sqlx::query_as::<_, VoteRow>(
            "SELECT user_id, post_id, value, created_at FROM votes WHERE user_id = $1 AND post_id = $2",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Vote::try_from)
            .transpose()
            .map_err(AppError::Internal)
    }

    async fn upsert_vote(
        &mut self,
        user_id: UserId,
        post_id: PostId,
        direction: VoteDirection,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO votes (user_id, post_id, value, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, post_id)
            DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(user_id)
        .bind(post_id)
        .bind(direction.value())
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            // the post row is locked, so a dangling reference can only be the voter
            if is_foreign_key_violation(&e) {
                AppError::Unauthenticated
            } else {
                AppError::from(e)
            }
        })?;

        Ok(())
    }

    async fn increment_post_score(&mut self, post_id: PostId, delta: i32) -> Result<i32> {
        let points: Option<i32> = sqlx::query_scalar(
            "UPDATE posts SET points = points + $1 WHERE id = $2 RETURNING points",
        )
        .bind(delta)
        .bind(post_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        points.ok_or_else(|| AppError::NotFound("Post not found".to_string()))
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PostStore for PgStore {
    async fn create_post(&self, post: NewPost) -> Result<Post> {
        let now = Utc::now();
        let post = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (title, text, points, creator_id, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $4, $4)
            RETURNING id, title, text, points, creator_id, created_at, updated_at
            "#,
        )
        .bind(&post.title)
        .bind(&post.text)
        .bind(post.creator_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Unauthenticated
            } else {
                AppError::from(e)
            }
        })?;

        Ok(post)
    }

    async fn find_post(&self, post_id: PostId) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            "SELECT id, title, text, points, creator_id, created_at, updated_at FROM posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    async fn update_post(
        &self,
        post_id: PostId,
        title: Option<String>,
        text: Option<String>,
    ) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            UPDATE posts
            SET title = COALESCE($1, title),
                text = COALESCE($2, text),
                updated_at = $3
            WHERE id = $4
            RETURNING id, title, text, points, creator_id, created_at, updated_at
            "#,
        )
        .bind(title)
        .bind(text)
        .bind(Utc::now())
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    async fn delete_post(&self, post_id: PostId) -> Result<bool> {
        // votes go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_posts(&self, limit: u32, cursor: Option<FeedCursor>) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, title, text, points, creator_id, created_at, updated_at
            FROM posts
            WHERE $1::TIMESTAMPTZ IS NULL OR (created_at, id) < ($1, $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(cursor.map(|cursor| cursor.created_at))
        .bind(cursor.map(|cursor| cursor.id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(posts)
    }

    async fn vote_statuses(
        &self,
        user_id: UserId,
        post_ids: &[PostId],
    ) -> Result<Vec<(PostId, VoteDirection)>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, VoteRow>(
            r#"
            SELECT user_id, post_id, value, created_at
            FROM votes
            WHERE user_id = $1 AND post_id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<(PostId, VoteDirection)> {
                let vote = Vote::try_from(row).map_err(AppError::Internal)?;
                Ok((vote.post_id, vote.direction))
            })
            .collect()
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::StorageConflict(_) => {
                AppError::BadRequest("Username or email already taken".to_string())
            }
            other => other,
        })?;

        Ok(user)
    }

    async fn find_users(&self, user_ids: &[UserId]) -> Result<Vec<User>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
