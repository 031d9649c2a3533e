//! Storage ports for users, posts and the vote ledger.
//!
//! `PgStore` backs the running service. `MemoryStore` keeps everything in
//! process and is what the test suite runs against.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    error::Result,
    models::{FeedCursor, NewPost, NewUser, Post, PostId, User, UserId, Vote, VoteDirection},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Opens ledger transactions.
#[async_trait]
pub trait VoteStore: Send + Sync {
    type Tx: VoteTransaction;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// One atomic unit of ledger work. Dropping it without `commit` discards every
/// write made through it.
#[async_trait]
pub trait VoteTransaction: Send {
    /// Locks the post against other ledger transactions until this one ends and
    /// returns its current points, or `None` if the post does not exist.
    async fn lock_post_points(&mut self, post_id: PostId) -> Result<Option<i32>>;

    async fn find_vote_by_user_and_post(
        &mut self,
        user_id: UserId,
        post_id: PostId,
    ) -> Result<Option<Vote>>;

    async fn upsert_vote(
        &mut self,
        user_id: UserId,
        post_id: PostId,
        direction: VoteDirection,
    ) -> Result<()>;

    /// Adds `delta` to the post's points and returns the new total.
    async fn increment_post_score(&mut self, post_id: PostId, delta: i32) -> Result<i32>;

    async fn commit(self) -> Result<()>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create_post(&self, post: NewPost) -> Result<Post>;

    async fn find_post(&self, post_id: PostId) -> Result<Option<Post>>;

    /// Leaves a field untouched when it is `None`. Returns `None` if the post
    /// does not exist.
    async fn update_post(
        &self,
        post_id: PostId,
        title: Option<String>,
        text: Option<String>,
    ) -> Result<Option<Post>>;

    /// Removes the post together with its votes. Returns whether a post was removed.
    async fn delete_post(&self, post_id: PostId) -> Result<bool>;

    /// Ordered by `(created_at, id)` descending, strictly after `cursor` in that
    /// order when given. Returns at most `limit` posts.
    async fn list_posts(&self, limit: u32, cursor: Option<FeedCursor>) -> Result<Vec<Post>>;

    /// The given user's votes on the given posts, one round trip for the batch.
    async fn vote_statuses(
        &self,
        user_id: UserId,
        post_ids: &[PostId],
    ) -> Result<Vec<(PostId, VoteDirection)>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Users among `user_ids` that exist, in no particular order.
    async fn find_users(&self, user_ids: &[UserId]) -> Result<Vec<User>>;
}

/// Everything the HTTP layer needs from a backend.
#[async_trait]
pub trait Store: VoteStore + PostStore + UserStore + Clone + 'static {
    async fn ping(&self) -> Result<()>;
}
