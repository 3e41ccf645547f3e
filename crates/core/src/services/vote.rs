//! Vote service: eligibility evaluation and the vote submission workflow.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use tally_common::{AppError, AppResult, IdGenerator};
use tally_db::{
    entities::{poll, vote},
    repositories::{PollOptionRepository, PollRepository, VoteRepository, DUPLICATE_OPTION_VOTE},
};

/// The identity behind a vote submission.
#[derive(Debug, Clone)]
pub enum Voter {
    /// An authenticated user.
    User(String),
    /// An unauthenticated caller; accepted only on anonymous polls.
    Anonymous {
        /// Network origin, recorded on the vote row.
        ip: Option<String>,
    },
}

/// Outcome of evaluating whether a voter may cast another vote on a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    PollInactive,
    PollExpired,
    QuotaExhausted,
}

impl Eligibility {
    /// Whether a new vote is permitted.
    #[must_use]
    pub const fn is_eligible(self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Decide whether another vote is permitted on `poll`, given how many votes
/// the voter has already cast there.
///
/// Pure over its inputs; the caller supplies the evaluation time and the
/// prior vote count. An absent poll never reaches this function, lookups
/// fail closed before it.
#[must_use]
pub fn evaluate_eligibility(
    poll: &poll::Model,
    prior_votes: u64,
    now: DateTime<Utc>,
) -> Eligibility {
    if !poll.is_active {
        return Eligibility::PollInactive;
    }
    if poll.expires_at.as_ref().is_some_and(|exp| *exp < now) {
        return Eligibility::PollExpired;
    }
    if prior_votes >= u64::try_from(poll.max_votes_per_user).unwrap_or(0) {
        return Eligibility::QuotaExhausted;
    }
    Eligibility::Eligible
}

/// Vote service for business logic.
#[derive(Clone)]
pub struct VoteService {
    poll_repo: PollRepository,
    option_repo: PollOptionRepository,
    vote_repo: VoteRepository,
    id_gen: IdGenerator,
}

impl VoteService {
    /// Create a new vote service.
    #[must_use]
    pub const fn new(
        poll_repo: PollRepository,
        option_repo: PollOptionRepository,
        vote_repo: VoteRepository,
    ) -> Self {
        Self {
            poll_repo,
            option_repo,
            vote_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Check whether `user_id` may cast another vote on `poll_id`.
    ///
    /// Pure read; fails closed when the poll does not exist. This is a
    /// fast-path answer only: submission re-checks everything, and the
    /// unique index has the final word under concurrency.
    pub async fn can_vote(&self, poll_id: &str, user_id: &str) -> AppResult<bool> {
        let Some(poll) = self.poll_repo.find_by_id(poll_id).await? else {
            return Ok(false);
        };
        let prior = self
            .vote_repo
            .count_by_poll_and_user(&poll.id, user_id)
            .await?;
        Ok(evaluate_eligibility(&poll, prior, Utc::now()).is_eligible())
    }

    /// Submit a vote.
    pub async fn submit(
        &self,
        poll_id: &str,
        option_id: &str,
        voter: Voter,
    ) -> AppResult<vote::Model> {
        let poll = self.poll_repo.get_by_id(poll_id).await?;

        // Inactive polls are indistinguishable from absent ones to voters
        if !poll.is_active {
            return Err(AppError::PollNotFound(poll_id.to_string()));
        }

        let user_id = match &voter {
            Voter::User(id) => Some(id.clone()),
            Voter::Anonymous { .. } => {
                if !poll.is_anonymous {
                    return Err(AppError::Unauthorized);
                }
                None
            }
        };

        // Fast-path eligibility; anonymous voters have no stable identity,
        // so no quota applies to them
        let prior = match user_id.as_deref() {
            Some(uid) => self.vote_repo.count_by_poll_and_user(&poll.id, uid).await?,
            None => 0,
        };
        match evaluate_eligibility(&poll, prior, Utc::now()) {
            Eligibility::Eligible => {}
            Eligibility::PollInactive => {
                return Err(AppError::PollNotFound(poll_id.to_string()));
            }
            Eligibility::PollExpired => {
                return Err(AppError::BadRequest("Poll has expired".to_string()));
            }
            Eligibility::QuotaExhausted => {
                // On single-vote polls an exhausted quota means the user
                // already voted; surface that as the duplicate case
                if !poll.allow_multiple_votes {
                    return Err(AppError::Conflict(
                        "You have already voted on this poll".to_string(),
                    ));
                }
                return Err(AppError::BadRequest(
                    "You have reached the vote limit for this poll".to_string(),
                ));
            }
        }

        // A vote aimed at another poll's option is malformed input, not an
        // eligibility failure
        let option = self.option_repo.get_by_id(option_id).await?;
        if option.poll_id != poll.id {
            return Err(AppError::Validation(
                "Option does not belong to this poll".to_string(),
            ));
        }

        if let Some(uid) = user_id.as_deref() {
            // Stricter than the quota: on single-vote polls any prior vote
            // blocks, regardless of which option it targeted
            if !poll.allow_multiple_votes
                && self.vote_repo.has_voted_on_poll(&poll.id, uid).await?
            {
                return Err(AppError::Conflict(
                    "You have already voted on this poll".to_string(),
                ));
            }

            if self
                .vote_repo
                .has_voted_for_option(&poll.id, uid, &option.id)
                .await?
            {
                return Err(AppError::Conflict(DUPLICATE_OPTION_VOTE.to_string()));
            }
        }

        let voter_ip = match voter {
            Voter::Anonymous { ip } => ip,
            Voter::User(_) => None,
        };

        let model = vote::ActiveModel {
            id: Set(self.id_gen.generate()),
            poll_id: Set(poll.id),
            option_id: Set(option.id),
            user_id: Set(user_id),
            voter_ip: Set(voter_ip),
            created_at: Set(Utc::now().into()),
        };

        // The repository surfaces a unique-index violation here as the same
        // duplicate error as the proactive checks above
        self.vote_repo.create(model).await
    }

    /// Remove the caller's own vote for one option.
    pub async fn retract(&self, poll_id: &str, option_id: &str, user_id: &str) -> AppResult<()> {
        let removed = self
            .vote_repo
            .delete_by_owner(poll_id, option_id, user_id)
            .await?;
        if !removed {
            return Err(AppError::NotFound("Vote not found".to_string()));
        }
        Ok(())
    }

    /// Get the caller's votes on a poll, for viewer state in responses.
    pub async fn user_votes(&self, poll_id: &str, user_id: &str) -> AppResult<Vec<vote::Model>> {
        self.vote_repo.find_by_poll_and_user(poll_id, user_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
    use std::sync::Arc;
    use tally_db::entities::poll_option;

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

    fn create_test_option(id: &str, poll_id: &str, order_index: i32) -> poll_option::Model {
        poll_option::Model {
            id: id.to_string(),
            poll_id: poll_id.to_string(),
            text: format!("Option {order_index}"),
            order_index,
        }
    }

    fn create_test_vote(id: &str, poll_id: &str, option_id: &str, user_id: &str) -> vote::Model {
        vote::Model {
            id: id.to_string(),
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            user_id: Some(user_id.to_string()),
            voter_ip: None,
            created_at: Utc::now().into(),
        }
    }

    fn count_row(n: i64) -> std::collections::BTreeMap<&'static str, sea_orm::Value> {
        maplit::btreemap! { "num_items" => sea_orm::Value::BigInt(Some(n)) }
    }

    fn create_test_service(
        poll_db: Arc<DatabaseConnection>,
        option_db: Arc<DatabaseConnection>,
        vote_db: Arc<DatabaseConnection>,
    ) -> VoteService {
        VoteService::new(
            PollRepository::new(poll_db),
            PollOptionRepository::new(option_db),
            VoteRepository::new(vote_db),
        )
    }

    // Unit tests for the pure eligibility evaluation
    #[test]
    fn test_eligibility_inactive_poll() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.is_active = false;

        let result = evaluate_eligibility(&poll, 0, Utc::now());
        assert_eq!(result, Eligibility::PollInactive);
        assert!(!result.is_eligible());
    }

    #[test]
    fn test_eligibility_expired_poll() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.expires_at = Some((Utc::now() - Duration::hours(1)).into());

        assert_eq!(
            evaluate_eligibility(&poll, 0, Utc::now()),
            Eligibility::PollExpired
        );
    }

    #[test]
    fn test_eligibility_expiry_checked_before_quota() {
        // Expired polls reject even voters with quota headroom
        let mut poll = create_test_poll("p1", "creator1");
        poll.expires_at = Some((Utc::now() - Duration::hours(1)).into());
        poll.max_votes_per_user = 5;

        assert_eq!(
            evaluate_eligibility(&poll, 0, Utc::now()),
            Eligibility::PollExpired
        );
    }

    #[test]
    fn test_eligibility_future_expiry_ok() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.expires_at = Some((Utc::now() + Duration::hours(1)).into());

        assert_eq!(
            evaluate_eligibility(&poll, 0, Utc::now()),
            Eligibility::Eligible
        );
    }

    #[test]
    fn test_eligibility_quota_boundary() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.allow_multiple_votes = true;
        poll.max_votes_per_user = 3;

        let now = Utc::now();
        assert_eq!(evaluate_eligibility(&poll, 2, now), Eligibility::Eligible);
        assert_eq!(
            evaluate_eligibility(&poll, 3, now),
            Eligibility::QuotaExhausted
        );
        assert_eq!(
            evaluate_eligibility(&poll, 4, now),
            Eligibility::QuotaExhausted
        );
    }

    // Service tests
    #[tokio::test]
    async fn test_can_vote_missing_poll_fails_closed() {
        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<poll::Model>::new()])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let service = create_test_service(poll_db, option_db, vote_db);

        assert!(!service.can_vote("missing", "user1").await.unwrap());
    }

    #[tokio::test]
    async fn test_can_vote_fresh_user() {
        let poll = create_test_poll("p1", "creator1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(0)]])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        assert!(service.can_vote("p1", "user1").await.unwrap());
    }

    #[tokio::test]
    async fn test_submit_poll_not_found() {
        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<poll::Model>::new()])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("missing", "o1", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::PollNotFound(id)) => assert_eq!(id, "missing"),
            _ => panic!("Expected PollNotFound error"),
        }
    }

    #[tokio::test]
    async fn test_submit_inactive_poll_hidden_as_not_found() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.is_active = false;

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("p1", "o1", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::PollNotFound(_)) => {}
            _ => panic!("Expected PollNotFound error"),
        }
    }

    #[tokio::test]
    async fn test_submit_expired_poll() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.expires_at = Some((Utc::now() - Duration::minutes(5)).into());

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(0)]])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("p1", "o1", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::BadRequest(msg)) => assert!(msg.contains("expired")),
            _ => panic!("Expected BadRequest error"),
        }
    }

    #[tokio::test]
    async fn test_submit_quota_exhausted() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.allow_multiple_votes = true;
        poll.max_votes_per_user = 2;

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(2)]])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        // Third distinct option, but the quota of 2 is already spent
        let result = service
            .submit("p1", "o3", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::BadRequest(msg)) => assert!(msg.contains("limit")),
            _ => panic!("Expected BadRequest error"),
        }
    }

    #[tokio::test]
    async fn test_submit_second_vote_on_single_vote_poll_is_duplicate() {
        // Single-vote poll, user already voted for X; a vote for Y must come
        // back as a duplicate, not as a quota or wrong-option error
        let poll = create_test_poll("p1", "creator1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(1)]])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("p1", "o2", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::Conflict(msg)) => assert!(msg.contains("voted on this poll")),
            _ => panic!("Expected Conflict error"),
        }
    }

    #[tokio::test]
    async fn test_submit_option_from_other_poll() {
        let poll = create_test_poll("p1", "creator1");
        let foreign_option = create_test_option("o9", "p2", 0);

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[foreign_option]])
                .into_connection(),
        );
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(0)]])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("p1", "o9", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::Validation(msg)) => assert!(msg.contains("belong")),
            _ => panic!("Expected Validation error"),
        }
    }

    #[tokio::test]
    async fn test_submit_second_option_on_single_vote_poll() {
        // Quota headroom left on purpose: the any-vote guard itself must
        // reject the second option on a single-vote poll
        let mut poll = create_test_poll("p1", "creator1");
        poll.max_votes_per_user = 2;

        let existing = create_test_vote("v1", "p1", "o1", "user1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_option("o2", "p1", 1)]])
                .into_connection(),
        );
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(1)]])
                .append_query_results([[existing]])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("p1", "o2", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::Conflict(msg)) => assert!(msg.contains("voted on this poll")),
            _ => panic!("Expected Conflict error"),
        }
    }

    #[tokio::test]
    async fn test_submit_duplicate_option_on_multi_vote_poll() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.allow_multiple_votes = true;
        poll.max_votes_per_user = 3;

        let existing = create_test_vote("v1", "p1", "o1", "user1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_option("o1", "p1", 0)]])
                .into_connection(),
        );
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(1)]])
                .append_query_results([[existing]])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("p1", "o1", Voter::User("user1".to_string()))
            .await;
        match result {
            Err(AppError::Conflict(msg)) => assert_eq!(msg, DUPLICATE_OPTION_VOTE),
            _ => panic!("Expected Conflict error"),
        }
    }

    #[tokio::test]
    async fn test_submit_success() {
        let poll = create_test_poll("p1", "creator1");
        let option = create_test_option("o1", "p1", 0);
        let inserted = create_test_vote("v1", "p1", "o1", "user1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[option]])
                .into_connection(),
        );
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(0)]])
                .append_query_results([Vec::<vote::Model>::new()]) // no vote on poll yet
                .append_query_results([Vec::<vote::Model>::new()]) // no vote for option yet
                .append_query_results([[inserted]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let vote = service
            .submit("p1", "o1", Voter::User("user1".to_string()))
            .await
            .unwrap();
        assert_eq!(vote.poll_id, "p1");
        assert_eq!(vote.option_id, "o1");
        assert_eq!(vote.user_id.as_deref(), Some("user1"));
    }

    #[tokio::test]
    async fn test_submit_anonymous_on_named_poll() {
        let poll = create_test_poll("p1", "creator1");

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service
            .submit("p1", "o1", Voter::Anonymous { ip: None })
            .await;
        match result {
            Err(AppError::Unauthorized) => {}
            _ => panic!("Expected Unauthorized error"),
        }
    }

    #[tokio::test]
    async fn test_submit_anonymous_on_anonymous_poll() {
        let mut poll = create_test_poll("p1", "creator1");
        poll.is_anonymous = true;

        let option = create_test_option("o1", "p1", 0);
        let inserted = vote::Model {
            user_id: None,
            voter_ip: Some("203.0.113.9".to_string()),
            ..create_test_vote("v1", "p1", "o1", "ignored")
        };

        let poll_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll]])
                .into_connection(),
        );
        let option_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[option]])
                .into_connection(),
        );
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[inserted]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let vote = service
            .submit(
                "p1",
                "o1",
                Voter::Anonymous {
                    ip: Some("203.0.113.9".to_string()),
                },
            )
            .await
            .unwrap();
        assert!(vote.user_id.is_none());
        assert_eq!(vote.voter_ip.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_retract_not_found() {
        let poll_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        let result = service.retract("p1", "o1", "user1").await;
        match result {
            Err(AppError::NotFound(msg)) => assert!(msg.contains("Vote")),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[tokio::test]
    async fn test_retract_success() {
        let poll_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let option_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let vote_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let service = create_test_service(poll_db, option_db, vote_db);

        assert!(service.retract("p1", "o1", "user1").await.is_ok());
    }
}
