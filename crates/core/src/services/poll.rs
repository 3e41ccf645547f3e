//! Poll service.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use serde::Deserialize;
use tally_common::{AppError, AppResult, IdGenerator};
use tally_db::{
    entities::{poll, poll_option, poll_view},
    repositories::{PollOptionRepository, PollRepository, PollViewRepository, VoteRepository},
};
use validator::Validate;

use crate::services::saga::run_with_compensation;
use crate::services::vote::evaluate_eligibility;

/// Poll service for business logic.
#[derive(Clone)]
pub struct PollService {
    poll_repo: PollRepository,
    option_repo: PollOptionRepository,
    vote_repo: VoteRepository,
    view_repo: PollViewRepository,
    id_gen: IdGenerator,
}

/// Input for creating a poll.
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePollInput {
    #[validate(length(min = 3, max = 255))]
    pub title: String,

    #[validate(length(max = 1000))]
    pub description: Option<String>,

    /// Option texts in display order.
    #[validate(length(min = 2, max = 10))]
    pub options: Vec<String>,

    pub allow_multiple_votes: bool,

    pub is_anonymous: bool,

    #[validate(range(min = 1))]
    pub max_votes_per_user: i32,

    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for updating a poll. Only the creator may apply it.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdatePollInput {
    #[validate(length(min = 3, max = 255))]
    pub title: Option<String>,

    #[validate(length(max = 1000))]
    pub description: Option<String>,

    pub expires_at: Option<DateTime<Utc>>,

    pub is_active: Option<bool>,
}

/// A poll together with its ordered options.
pub struct PollWithOptions {
    pub poll: poll::Model,
    pub options: Vec<poll_option::Model>,
}

/// A poll as seen by one viewer.
pub struct PollForViewer {
    pub poll: poll::Model,
    pub options: Vec<poll_option::Model>,
    /// Option ids the viewer has voted for.
    pub user_votes: Vec<String>,
    pub is_expired: bool,
    pub can_vote: bool,
}

impl PollService {
    /// Create a new poll service.
    #[must_use]
    pub const fn new(
        poll_repo: PollRepository,
        option_repo: PollOptionRepository,
        vote_repo: VoteRepository,
        view_repo: PollViewRepository,
    ) -> Self {
        Self {
            poll_repo,
            option_repo,
            vote_repo,
            view_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Create a poll with its options.
    ///
    /// The poll row and its option rows are separate inserts; if an option
    /// insert fails the poll row is deleted again so no half-created poll
    /// becomes visible.
    pub async fn create(&self, user_id: &str, input: CreatePollInput) -> AppResult<PollWithOptions> {
        input.validate()?;

        for text in &input.options {
            if text.trim().is_empty() {
                return Err(AppError::BadRequest(
                    "Poll options cannot be empty".to_string(),
                ));
            }
            if text.len() > 500 {
                return Err(AppError::BadRequest(
                    "Poll option is too long (max 500 chars)".to_string(),
                ));
            }
        }

        let poll_model = poll::ActiveModel {
            id: Set(self.id_gen.generate()),
            user_id: Set(user_id.to_string()),
            title: Set(input.title.clone()),
            description: Set(input.description.clone()),
            is_active: Set(true),
            allow_multiple_votes: Set(input.allow_multiple_votes),
            is_anonymous: Set(input.is_anonymous),
            max_votes_per_user: Set(input.max_votes_per_user),
            expires_at: Set(input.expires_at.map(Into::into)),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
        };

        let poll = self.poll_repo.create(poll_model).await?;

        let options = run_with_compensation(
            &poll.id,
            async {
                let mut options = Vec::with_capacity(input.options.len());
                for (index, text) in input.options.iter().enumerate() {
                    let model = poll_option::ActiveModel {
                        id: Set(self.id_gen.generate()),
                        poll_id: Set(poll.id.clone()),
                        text: Set(text.clone()),
                        order_index: Set(index as i32),
                    };
                    options.push(self.option_repo.create(model).await?);
                }
                Ok(options)
            },
            || self.poll_repo.delete(&poll.id),
        )
        .await?;

        Ok(PollWithOptions { poll, options })
    }

    /// Get a poll by ID.
    pub async fn get(&self, poll_id: &str) -> AppResult<poll::Model> {
        self.poll_repo.get_by_id(poll_id).await
    }

    /// Get a poll with its options in display order.
    pub async fn get_with_options(&self, poll_id: &str) -> AppResult<PollWithOptions> {
        let poll = self.poll_repo.get_by_id(poll_id).await?;
        let options = self.option_repo.find_by_poll(&poll.id).await?;
        Ok(PollWithOptions { poll, options })
    }

    /// Get a poll as one viewer sees it: options, own votes, vote ability.
    ///
    /// Inactive polls stay visible to their creator and read as absent to
    /// everyone else.
    pub async fn get_for_viewer(
        &self,
        poll_id: &str,
        viewer_id: Option<&str>,
    ) -> AppResult<PollForViewer> {
        let poll = self.poll_repo.get_by_id(poll_id).await?;

        if !poll.is_active && viewer_id != Some(poll.user_id.as_str()) {
            return Err(AppError::PollNotFound(poll_id.to_string()));
        }

        let options = self.option_repo.find_by_poll(&poll.id).await?;

        let user_votes: Vec<String> = match viewer_id {
            Some(uid) => self
                .vote_repo
                .find_by_poll_and_user(&poll.id, uid)
                .await?
                .into_iter()
                .map(|v| v.option_id)
                .collect(),
            None => Vec::new(),
        };

        let now = Utc::now();
        let is_expired = poll.expires_at.as_ref().is_some_and(|exp| *exp < now);
        let can_vote = match viewer_id {
            Some(_) => evaluate_eligibility(&poll, user_votes.len() as u64, now).is_eligible(),
            // Signed-out viewers can vote only on anonymous polls
            None => poll.is_anonymous && evaluate_eligibility(&poll, 0, now).is_eligible(),
        };

        Ok(PollForViewer {
            poll,
            options,
            user_votes,
            is_expired,
            can_vote,
        })
    }

    /// Record that a poll was viewed. No eligibility check applies.
    pub async fn record_view(&self, poll_id: &str, viewer_id: Option<&str>) -> AppResult<()> {
        let model = poll_view::ActiveModel {
            id: Set(self.id_gen.generate()),
            poll_id: Set(poll_id.to_string()),
            viewer_id: Set(viewer_id.map(ToString::to_string)),
            created_at: Set(Utc::now().into()),
        };
        self.view_repo.create(model).await?;
        Ok(())
    }

    /// Update a poll. Only the creator may do this.
    pub async fn update(
        &self,
        user_id: &str,
        poll_id: &str,
        input: UpdatePollInput,
    ) -> AppResult<poll::Model> {
        input.validate()?;

        let poll = self.poll_repo.get_by_id(poll_id).await?;
        if poll.user_id != user_id {
            return Err(AppError::Forbidden(
                "Only the poll creator can modify it".to_string(),
            ));
        }

        let mut active: poll::ActiveModel = poll.into();

        if let Some(title) = input.title {
            active.title = Set(title);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(expires_at) = input.expires_at {
            active.expires_at = Set(Some(expires_at.into()));
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }

        active.updated_at = Set(Some(Utc::now().into()));

        self.poll_repo.update(active).await
    }

    /// Delete a poll and, via cascade, its options, votes and views.
    pub async fn delete(&self, user_id: &str, poll_id: &str) -> AppResult<()> {
        let poll = self.poll_repo.get_by_id(poll_id).await?;
        if poll.user_id != user_id {
            return Err(AppError::Forbidden(
                "Only the poll creator can delete it".to_string(),
            ));
        }

        self.poll_repo.delete(&poll.id).await
    }

    /// List active polls, newest first.
    pub async fn list(&self, limit: u64, offset: u64) -> AppResult<Vec<poll::Model>> {
        self.poll_repo.list_active(limit, offset).await
    }

    /// List a creator's polls, including inactive ones.
    pub async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<poll::Model>> {
        self.poll_repo.list_by_user(user_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, DatabaseConnection, DbErr, MockDatabase, MockExecResult};
    use std::sync::Arc;

    fn create_test_poll(id: &str, creator: &str) -> poll::Model {
        poll::Model {
            id: id.to_string(),
            user_id: creator.to_string(),
            title: "Favorite color?".to_string(),
            description: None,
            is_active: true,
            allow_multiple_votes: false,
            is_anonymous: false,
            max_votes_per_user: 1,
            expires_at: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn create_test_option(id: &str, poll_id: &str, text: &str, order_index: i32) -> poll_option::Model {
        poll_option::Model {
            id: id.to_string(),
            poll_id: poll_id.to_string(),
            text: text.to_string(),
            order_index,
        }
    }

    fn valid_input() -> CreatePollInput {
        CreatePollInput {
            title: "Favorite color?".to_string(),
            description: None,
            options: vec!["Red".to_string(), "Green".to_string(), "Blue".to_string()],
            allow_multiple_votes: false,
            is_anonymous: false,
            max_votes_per_user: 1,
            expires_at: None,
        }
    }

    fn create_test_service(
        poll_db: Arc<DatabaseConnection>,
        option_db: Arc<DatabaseConnection>,
        vote_db: Arc<DatabaseConnection>,
        view_db: Arc<DatabaseConnection>,
    ) -> PollService {
        PollService::new(
            PollRepository::new(poll_db),
            PollOptionRepository::new(option_db),
            VoteRepository::new(vote_db),
            PollViewRepository::new(view_db),
        )
    }

    fn empty_service() -> PollService {
        let mock = || Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        create_test_service(mock(), mock(), mock(), mock())
    }

    // Input validation
    #[test]
    fn test_create_input_title_bounds() {
        let mut input = valid_input();
        input.title = "ab".to_string();
        assert!(input.validate().is_err());

        input.title = "a".repeat(256);
        assert!(input.validate().is_err());

        input.title = "abc".to_string();
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_create_input_option_count_bounds() {
        let mut input = valid_input();
        input.options = vec!["only one".to_string()];
        assert!(input.validate().is_err());

        input.options = (0..11).map(|i| format!("option {i}")).collect();
        assert!(input.validate().is_err());

        input.options = vec!["a".to_string(), "b".to_string()];
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_create_input_max_votes_positive() {
        let mut input = valid_input();
        input.max_votes_per_user = 0;
        assert!(input.validate().is_err());

        input.max_votes_per_user = 1;
        assert!(input.validate().is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_option_text() {
        let service = empty_service();

        let mut input = valid_input();
        input.options = vec!["Red".to_string(), "   ".to_string()];

        let result = service.create("user1", input).await;
        match result {
            Err(AppError::BadRequest(msg)) => assert!(msg.contains("empty")),
            _ => panic!("Expected BadRequest error"),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_option_text() {
        let service = empty_service();

        let mut input = valid_input();
        input.options = vec!["Red".to_string(), "x".repeat(501)];

        let result = service.create("user1", input).await;
        match result {
            Err(AppError::BadRequest(msg)) => assert!(msg.contains("too long")),
            _ => panic!("Expected BadRequest error"),
        }
    }

    #[tokio::test]
    async fn test_create_preserves_option_order() {
        let poll = create_test_poll("p1", "user1");
        let o0 = create_test_option("o0", "p1", "Red", 0);
        let o1 = create_test_option("o1", "p1", "Green", 1);
        let o2 = create_test_option("o2", "p1", "Blue", 2);

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[o0]])
                .append_query_results([[o1]])
                .append_query_results([[o2]])
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                ])
                .into_connection(),
        );
        let vote_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let view_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let service = create_test_service(poll_db, option_db, vote_db, view_db);

        let created = service.create("user1", valid_input()).await.unwrap();

        let texts: Vec<&str> = created.options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, ["Red", "Green", "Blue"]);
        let indexes: Vec<i32> = created.options.iter().map(|o| o.order_index).collect();
        assert_eq!(indexes, [0, 1, 2]);
    }

    #[tokio::test]
    async fn test_create_compensates_on_option_failure() {
        let poll = create_test_poll("p1", "user1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                // the compensating delete of the poll row
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_errors([DbErr::Custom("insert failed".to_string())])
                .into_connection(),
        );
        let vote_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let view_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let service = create_test_service(poll_db, option_db, vote_db, view_db);

        let result = service.create("user1", valid_input()).await;
        match result {
            Err(AppError::Database(msg)) => assert!(msg.contains("insert failed")),
            _ => panic!("Expected Database error"),
        }
    }

    #[tokio::test]
    async fn test_update_requires_creator() {
        let poll = create_test_poll("p1", "creator1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let mock = || Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let service = create_test_service(poll_db, mock(), mock(), mock());

        let result = service
            .update(
                "someone_else",
                "p1",
                UpdatePollInput {
                    title: Some("New title".to_string()),
                    ..UpdatePollInput::default()
                },
            )
            .await;
        match result {
            Err(AppError::Forbidden(_)) => {}
            _ => panic!("Expected Forbidden error"),
        }
    }

    #[tokio::test]
    async fn test_update_applies_fields() {
        let poll = create_test_poll("p1", "creator1");
        let mut updated = create_test_poll("p1", "creator1");
        updated.title = "New title".to_string();
        updated.is_active = false;

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .append_query_results([[updated]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );
        let mock = || Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let service = create_test_service(poll_db, mock(), mock(), mock());

        let result = service
            .update(
                "creator1",
                "p1",
                UpdatePollInput {
                    title: Some("New title".to_string()),
                    is_active: Some(false),
                    ..UpdatePollInput::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.title, "New title");
        assert!(!result.is_active);
    }

    #[tokio::test]
    async fn test_delete_requires_creator() {
        let poll = create_test_poll("p1", "creator1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let mock = || Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let service = create_test_service(poll_db, mock(), mock(), mock());

        let result = service.delete("someone_else", "p1").await;
        match result {
            Err(AppError::Forbidden(_)) => {}
            _ => panic!("Expected Forbidden error"),
        }
    }

    #[tokio::test]
    async fn test_get_for_viewer_hides_inactive_from_others() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.is_active = false;

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let mock = || Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let service = create_test_service(poll_db, mock(), mock(), mock());

        let result = service.get_for_viewer("p1", Some("someone_else")).await;
        match result {
            Err(AppError::PollNotFound(_)) => {}
            _ => panic!("Expected PollNotFound error"),
        }
    }

    #[tokio::test]
    async fn test_get_for_viewer_creator_sees_inactive() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.is_active = false;

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![
                    create_test_option("o0", "p1", "Red", 0),
                    create_test_option("o1", "p1", "Green", 1),
                ]])
                .into_connection(),
        );
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<tally_db::entities::vote::Model>::new()])
                .into_connection(),
        );
        let view_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let service = create_test_service(poll_db, option_db, vote_db, view_db);

        let result = service.get_for_viewer("p1", Some("creator1")).await.unwrap();
        assert_eq!(result.options.len(), 2);
        // Inactive polls accept no votes, even from their creator
        assert!(!result.can_vote);
    }
}
