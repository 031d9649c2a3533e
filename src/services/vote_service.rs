use crate::{
    error::{AppError, Result},
    models::{CastVote, PostId, UserId, VoteDirection, VoteOutcome},
    store::{VoteStore, VoteTransaction},
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Records votes and keeps each post's points equal to the sum of its votes.
///
/// Every cast runs in one store transaction that first locks the post, so two
/// casts on the same post never interleave. A cast that loses a race inside the
/// store is retried from scratch; re-reading and re-applying is safe because a
/// repeated cast in the same direction changes nothing.
pub struct VoteLedger<S> {
    store: S,
    max_attempts: u32,
}

impl<S: VoteStore> VoteLedger<S> {
    pub fn new(store: S) -> Self {
        Self::with_max_attempts(store, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(store: S, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn cast_vote(
        &self,
        user_id: Option<UserId>,
        post_id: PostId,
        direction: VoteDirection,
    ) -> Result<CastVote> {
        let user_id = user_id.ok_or(AppError::Unauthenticated)?;

        let mut attempt = 1;
        loop {
            match self.try_cast(user_id, post_id, direction).await {
                Ok(cast) => {
                    tracing::debug!(
                        user_id,
                        post_id,
                        %direction,
                        outcome = ?cast.outcome,
                        points = cast.points,
                        "vote cast"
                    );
                    return Ok(cast);
                }
                Err(err) if err.is_conflict() && attempt < self.max_attempts => {
                    tracing::warn!(
                        user_id,
                        post_id,
                        attempt,
                        "vote hit a storage conflict, retrying: {}",
                        err
                    );
                    attempt += 1;
                }
                Err(err) if err.is_conflict() => {
                    tracing::error!(
                        user_id,
                        post_id,
                        attempts = attempt,
                        "vote retries exhausted: {}",
                        err
                    );
                    return Err(AppError::Internal(format!(
                        "vote could not be recorded after {} attempts",
                        attempt
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_cast(
        &self,
        user_id: UserId,
        post_id: PostId,
        direction: VoteDirection,
    ) -> Result<CastVote> {
        let mut tx = self.store.begin().await?;

        let points = tx
            .lock_post_points(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

        let existing = tx.find_vote_by_user_and_post(user_id, post_id).await?;
        let (outcome, delta) = match existing {
            None => (VoteOutcome::Inserted, i32::from(direction.value())),
            Some(vote) if vote.direction == direction => {
                // Same direction again: nothing to write. Dropping `tx` releases the lock.
                return Ok(CastVote {
                    outcome: VoteOutcome::Unchanged,
                    points,
                });
            }
            Some(_) => (VoteOutcome::Flipped, 2 * i32::from(direction.value())),
        };

        tx.upsert_vote(user_id, post_id, direction).await?;
        let points = tx.increment_post_score(post_id, delta).await?;
        tx.commit().await?;

        Ok(CastVote { outcome, points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPost, NewUser};
    use crate::store::{MemoryStore, PostStore, UserStore};

    async fn setup() -> (VoteLedger<MemoryStore>, UserId, PostId) {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: "x".to_string(),
            })
            .await
            .unwrap();
        let post = store
            .create_post(NewPost {
                title: "hello".to_string(),
                text: "world".to_string(),
                creator_id: user.id,
            })
            .await
            .unwrap();
        (VoteLedger::new(store), user.id, post.id)
    }

    #[tokio::test]
    async fn test_first_vote_inserts() {
        let (ledger, user, post) = setup().await;

        let cast = ledger
            .cast_vote(Some(user), post, VoteDirection::Down)
            .await
            .unwrap();

        assert_eq!(cast.outcome, VoteOutcome::Inserted);
        assert_eq!(cast.points, -1);
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found() {
        let (ledger, user, _) = setup().await;

        let err = ledger
            .cast_vote(Some(user), 999, VoteDirection::Up)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let (ledger, user, post) = setup().await;
        ledger.store().inject_conflicts(2).await;

        let cast = ledger
            .cast_vote(Some(user), post, VoteDirection::Up)
            .await
            .unwrap();

        assert_eq!(cast.points, 1);
        assert_eq!(ledger.store().vote_total(post).await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_generic_failure() {
        let (ledger, user, post) = setup().await;
        ledger.store().inject_conflicts(DEFAULT_MAX_ATTEMPTS).await;

        let err = ledger
            .cast_vote(Some(user), post, VoteDirection::Up)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        let post = ledger.store().find_post(post).await.unwrap().unwrap();
        assert_eq!(post.points, 0);
        assert!(ledger.store().votes_for_post(post.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_single_attempt_ledger_does_not_retry() {
        let (ledger, user, post) = setup().await;
        let ledger = VoteLedger::with_max_attempts(ledger.store, 1);
        ledger.store().inject_conflicts(1).await;

        assert!(
            ledger
                .cast_vote(Some(user), post, VoteDirection::Up)
                .await
                .is_err()
        );
        // the injected conflict was consumed, so the next cast goes through
        let cast = ledger
            .cast_vote(Some(user), post, VoteDirection::Up)
            .await
            .unwrap();
        assert_eq!(cast.outcome, VoteOutcome::Inserted);
    }
}
