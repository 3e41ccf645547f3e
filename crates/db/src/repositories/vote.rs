//! Vote repository.

use std::sync::Arc;

use crate::entities::{vote, Vote};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    SqlErr,
};
use tally_common::{AppError, AppResult};

/// User-facing message for a duplicate vote on one option.
///
/// The insert-time uniqueness violation and the proactive duplicate check
/// must be indistinguishable to the caller, so both use this message.
pub const DUPLICATE_OPTION_VOTE: &str = "You have already voted for this option";

/// Vote repository for database operations.
#[derive(Clone)]
pub struct VoteRepository {
    db: Arc<DatabaseConnection>,
}

impl VoteRepository {
    /// Create a new vote repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a vote.
    ///
    /// A violation of the (poll_id, user_id, option_id) unique index is the
    /// authoritative duplicate signal: the eligibility check and the insert
    /// are not atomic, so two concurrent submissions can both pass the
    /// check and race here.
    pub async fn create(&self, model: vote::ActiveModel) -> AppResult<vote::Model> {
        model.insert(self.db.as_ref()).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                AppError::Conflict(DUPLICATE_OPTION_VOTE.to_string())
            } else {
                AppError::Database(e.to_string())
            }
        })
    }

    /// Count votes cast by a user on a poll.
    pub async fn count_by_poll_and_user(&self, poll_id: &str, user_id: &str) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::UserId.eq(user_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Check if a user has any vote on a poll, regardless of option.
    pub async fn has_voted_on_poll(&self, poll_id: &str, user_id: &str) -> AppResult<bool> {
        Ok(Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .is_some())
    }

    /// Check if a user has already voted for a specific option.
    pub async fn has_voted_for_option(
        &self,
        poll_id: &str,
        user_id: &str,
        option_id: &str,
    ) -> AppResult<bool> {
        Ok(Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::UserId.eq(user_id))
            .filter(vote::Column::OptionId.eq(option_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .is_some())
    }

    /// Get all votes on a poll.
    pub async fn find_by_poll(&self, poll_id: &str) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a user's votes on a poll.
    pub async fn find_by_poll_and_user(
        &self,
        poll_id: &str,
        user_id: &str,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::UserId.eq(user_id))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count all votes on a poll.
    pub async fn count_by_poll(&self, poll_id: &str) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a user's vote for one option. Returns whether a row was removed.
    ///
    /// The unique index guarantees at most one row matches.
    pub async fn delete_by_owner(
        &self,
        poll_id: &str,
        option_id: &str,
        user_id: &str,
    ) -> AppResult<bool> {
        let result = Vote::delete_many()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::OptionId.eq(option_id))
            .filter(vote::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }
}
