//! Poll view repository.

use std::sync::Arc;

use crate::entities::{poll_view, PollView};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
};
use tally_common::{AppError, AppResult};

/// Poll view repository for database operations.
#[derive(Clone)]
pub struct PollViewRepository {
    db: Arc<DatabaseConnection>,
}

impl PollViewRepository {
    /// Create a new poll view repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record a view.
    pub async fn create(&self, model: poll_view::ActiveModel) -> AppResult<poll_view::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count views of a poll.
    pub async fn count_by_poll(&self, poll_id: &str) -> AppResult<u64> {
        PollView::find()
            .filter(poll_view::Column::PollId.eq(poll_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
