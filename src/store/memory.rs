use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{AppError, Result},
    models::{FeedCursor, NewPost, NewUser, Post, PostId, User, UserId, Vote, VoteDirection},
    store::{PostStore, Store, UserStore, VoteStore, VoteTransaction},
};

#[derive(Default)]
struct MemoryState {
    next_user_id: UserId,
    next_post_id: PostId,
    users: BTreeMap<UserId, User>,
    posts: BTreeMap<PostId, Post>,
    votes: HashMap<(UserId, PostId), Vote>,
    pending_conflicts: u32,
}

/// In-process store. A ledger transaction holds the store lock from `begin`
/// until it is committed or dropped, so transactions are fully serialized.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` ledger commits fail with `StorageConflict`.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.lock().await.pending_conflicts = count;
    }

    pub async fn votes_for_post(&self, post_id: PostId) -> Vec<Vote> {
        let state = self.state.lock().await;
        let mut votes: Vec<Vote> = state
            .votes
            .values()
            .filter(|vote| vote.post_id == post_id)
            .cloned()
            .collect();
        votes.sort_by_key(|vote| vote.user_id);
        votes
    }

    /// Sum of the post's vote values, recomputed from the ledger.
    pub async fn vote_total(&self, post_id: PostId) -> i32 {
        self.votes_for_post(post_id)
            .await
            .iter()
            .map(|vote| i32::from(vote.direction.value()))
            .sum()
    }
}

pub struct MemoryVoteTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged_votes: HashMap<(UserId, PostId), Vote>,
    staged_points: HashMap<PostId, i32>,
}

impl MemoryVoteTx {
    fn current_points(&self, post_id: PostId) -> Option<i32> {
        let post = self.guard.posts.get(&post_id)?;
        Some(post.points + self.staged_points.get(&post_id).copied().unwrap_or(0))
    }
}

#[async_trait]
impl VoteStore for MemoryStore {
    type Tx = MemoryVoteTx;

    async fn begin(&self) -> Result<MemoryVoteTx> {
        let guard = self.state.clone().lock_owned().await;
        Ok(MemoryVoteTx {
            guard,
            staged_votes: HashMap::new(),
            staged_points: HashMap::new(),
        })
    }
}

#[async_trait]
impl VoteTransaction for MemoryVoteTx {
    async fn lock_post_points(&mut self, post_id: PostId) -> Result<Option<i32>> {
        Ok(self.current_points(post_id))
    }

    async fn find_vote_by_user_and_post(
        &mut self,
        user_id: UserId,
        post_id: PostId,
    ) -> Result<Option<Vote>> {
        let key = (user_id, post_id);
        Ok(self
            .staged_votes
            .get(&key)
            .or_else(|| self.guard.votes.get(&key))
            .cloned())
    }

    async fn upsert_vote(
        &mut self,
        user_id: UserId,
        post_id: PostId,
        direction: VoteDirection,
    ) -> Result<()> {
        if !self.guard.users.contains_key(&user_id) {
            return Err(AppError::Unauthenticated);
        }
        if !self.guard.posts.contains_key(&post_id) {
            return Err(AppError::NotFound("Post not found".to_string()));
        }

        let key = (user_id, post_id);
        let created_at = self
            .staged_votes
            .get(&key)
            .or_else(|| self.guard.votes.get(&key))
            .map(|vote| vote.created_at)
            .unwrap_or_else(Utc::now);

        self.staged_votes.insert(
            key,
            Vote {
                user_id,
                post_id,
                direction,
                created_at,
            },
        );
        Ok(())
    }

    async fn increment_post_score(&mut self, post_id: PostId, delta: i32) -> Result<i32> {
        if !self.guard.posts.contains_key(&post_id) {
            return Err(AppError::NotFound("Post not found".to_string()));
        }
        *self.staged_points.entry(post_id).or_insert(0) += delta;
        self.current_points(post_id)
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
    }

    async fn commit(mut self) -> Result<()> {
        if self.guard.pending_conflicts > 0 {
            self.guard.pending_conflicts -= 1;
            return Err(AppError::StorageConflict(
                "injected serialization failure".to_string(),
            ));
        }

        let state = &mut *self.guard;
        for (key, vote) in self.staged_votes.drain() {
            state.votes.insert(key, vote);
        }
        for (post_id, delta) in self.staged_points.drain() {
            if let Some(post) = state.posts.get_mut(&post_id) {
                post.points += delta;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn create_post(&self, post: NewPost) -> Result<Post> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&post.creator_id) {
            return Err(AppError::Unauthenticated);
        }

        let now = Utc::now();
        state.next_post_id += 1;
        let post = Post {
            id: state.next_post_id,
            title: post.title,
            text: post.text,
            points: 0,
            creator_id: post.creator_id,
            created_at: now,
            updated_at: now,
        };
        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn find_post(&self, post_id: PostId) -> Result<Option<Post>> {
        Ok(self.state.lock().await.posts.get(&post_id).cloned())
    }

    async fn update_post(
        &self,
        post_id: PostId,
        title: Option<String>,
        text: Option<String>,
    ) -> Result<Option<Post>> {
        let mut state = self.state.lock().await;
        let Some(post) = state.posts.get_mut(&post_id) else {
            return Ok(None);
        };

        if let Some(title) = title {
            post.title = title;
        }
        if let Some(text) = text {
            post.text = text;
        }
        post.updated_at = Utc::now();
        Ok(Some(post.clone()))
    }

    async fn delete_post(&self, post_id: PostId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.posts.remove(&post_id).is_some();
        if removed {
            state.votes.retain(|(_, voted_post), _| *voted_post != post_id);
        }
        Ok(removed)
    }

    async fn list_posts(&self, limit: u32, cursor: Option<FeedCursor>) -> Result<Vec<Post>> {
        let state = self.state.lock().await;
        let mut posts: Vec<Post> = state
            .posts
            .values()
            .filter(|post| cursor.is_none_or(|cursor| FeedCursor::of(post) < cursor))
            .cloned()
            .collect();

        posts.sort_by_key(|post| std::cmp::Reverse(FeedCursor::of(post)));
        posts.truncate(limit as usize);
        Ok(posts)
    }

    async fn vote_statuses(
        &self,
        user_id: UserId,
        post_ids: &[PostId],
    ) -> Result<Vec<(PostId, VoteDirection)>> {
        let state = self.state.lock().await;
        Ok(post_ids
            .iter()
            .filter_map(|post_id| {
                state
                    .votes
                    .get(&(user_id, *post_id))
                    .map(|vote| (*post_id, vote.direction))
            })
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.state.lock().await;
        let taken = state
            .users
            .values()
            .any(|existing| existing.username == user.username || existing.email == user.email);
        if taken {
            return Err(AppError::BadRequest(
                "Username or email already taken".to_string(),
            ));
        }

        let now = Utc::now();
        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_users(&self, user_ids: &[UserId]) -> Result<Vec<User>> {
        let state = self.state.lock().await;
        Ok(user_ids
            .iter()
            .filter_map(|user_id| state.users.get(user_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &MemoryStore) -> (User, Post) {
        let user = store
            .create_user(NewUser {
                username: "ben".to_string(),
                email: "ben@ben.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        let post = store
            .create_post(NewPost {
                title: "first".to_string(),
                text: "hello".to_string(),
                creator_id: user.id,
            })
            .await
            .unwrap();
        (user, post)
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        let (user, post) = seed(&store).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.upsert_vote(user.id, post.id, VoteDirection::Up).await.unwrap();
            assert_eq!(tx.increment_post_score(post.id, 1).await.unwrap(), 1);
        }

        assert_eq!(store.find_post(post.id).await.unwrap().unwrap().points, 0);
        assert!(store.votes_for_post(post.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_injected_conflict_rolls_back() {
        let store = MemoryStore::new();
        let (user, post) = seed(&store).await;
        store.inject_conflicts(1).await;

        let mut tx = store.begin().await.unwrap();
        tx.upsert_vote(user.id, post.id, VoteDirection::Down).await.unwrap();
        tx.increment_post_score(post.id, -1).await.unwrap();
        assert!(tx.commit().await.unwrap_err().is_conflict());

        assert_eq!(store.find_post(post.id).await.unwrap().unwrap().points, 0);
        assert_eq!(store.vote_total(post.id).await, 0);
    }

    #[tokio::test]
    async fn test_delete_post_cascades_votes() {
        let store = MemoryStore::new();
        let (user, post) = seed(&store).await;

        let mut tx = store.begin().await.unwrap();
        tx.upsert_vote(user.id, post.id, VoteDirection::Up).await.unwrap();
        tx.increment_post_score(post.id, 1).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.delete_post(post.id).await.unwrap());
        assert!(store.votes_for_post(post.id).await.is_empty());
        assert!(!store.delete_post(post.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = MemoryStore::new();
        seed(&store).await;

        let err = store
            .create_user(NewUser {
                username: "ben".to_string(),
                email: "other@ben.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_voter_is_unauthenticated() {
        let store = MemoryStore::new();
        let (_, post) = seed(&store).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.upsert_vote(999, post.id, VoteDirection::Up).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_cursor_pages_through_tied_timestamps() {
        let store = MemoryStore::new();
        let (user, first) = seed(&store).await;
        for title in ["second", "third", "fourth"] {
            store
                .create_post(NewPost {
                    title: title.to_string(),
                    text: "same instant".to_string(),
                    creator_id: user.id,
                })
                .await
                .unwrap();
        }

        {
            let mut state = store.state.lock().await;
            for post in state.posts.values_mut() {
                post.created_at = first.created_at;
            }
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.list_posts(2, cursor).await.unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some(FeedCursor::of(last));
            seen.extend(page.iter().map(|post| post.id));
        }

        assert_eq!(seen, vec![4, 3, 2, 1]);
    }
}
