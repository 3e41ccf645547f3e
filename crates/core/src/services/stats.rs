//! Statistics service: read-time aggregation over raw vote rows.
//!
//! No denormalized counters are persisted; every read recomputes from the
//! vote and view tables.

use std::collections::{HashMap, HashSet};

use futures::future::try_join_all;
use serde::Serialize;
use tally_common::{AppError, AppResult};
use tally_db::{
    entities::poll,
    repositories::{PollOptionRepository, PollRepository, PollViewRepository, VoteRepository},
};

/// Per-option tally within [`PollStats`].
#[derive(Debug, Clone, Serialize)]
pub struct OptionStat {
    pub option_id: String,
    pub text: String,
    pub vote_count: u64,
    pub percentage: f64,
}

/// A consistent snapshot of a poll's voting statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PollStats {
    pub poll_id: String,
    pub total_votes: u64,
    pub total_views: u64,
    /// Distinct signed-in voters; anonymous votes carry no identity.
    pub unique_voters: u64,
    /// One entry per option in display order, zero-vote options included.
    pub options: Vec<OptionStat>,
}

/// A poll with its total vote count, for listings.
pub struct PollWithVoteCount {
    pub poll: poll::Model,
    pub total_votes: u64,
}

/// Percentage of `count` out of `total`, rounded to 2 decimal places.
///
/// A poll with no votes yields 0.0, never a division error.
#[must_use]
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = (count as f64 / total as f64) * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Statistics service for read-time aggregation.
#[derive(Clone)]
pub struct StatsService {
    poll_repo: PollRepository,
    option_repo: PollOptionRepository,
    vote_repo: VoteRepository,
    view_repo: PollViewRepository,
}

impl StatsService {
    /// Create a new statistics service.
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
        }
    }

    /// Compute a poll's statistics at read time.
    ///
    /// Inactive polls stay visible to their creator and read as absent to
    /// everyone else, like the poll itself.
    pub async fn poll_stats(
        &self,
        poll_id: &str,
        viewer_id: Option<&str>,
    ) -> AppResult<PollStats> {
        let poll = self.poll_repo.get_by_id(poll_id).await?;
        if !poll.is_active && viewer_id != Some(poll.user_id.as_str()) {
            return Err(AppError::PollNotFound(poll_id.to_string()));
        }

        let options = self.option_repo.find_by_poll(&poll.id).await?;
        // One read of the vote rows gives a consistent snapshot
        let votes = self.vote_repo.find_by_poll(&poll.id).await?;
        let total_views = self.view_repo.count_by_poll(&poll.id).await?;

        let total_votes = votes.len() as u64;
        let mut per_option: HashMap<&str, u64> = HashMap::new();
        let mut voters: HashSet<&str> = HashSet::new();
        for vote in &votes {
            *per_option.entry(vote.option_id.as_str()).or_insert(0) += 1;
            if let Some(uid) = vote.user_id.as_deref() {
                voters.insert(uid);
            }
        }
        let unique_voters = voters.len() as u64;

        // Zero-vote options stay in the result
        let options = options
            .into_iter()
            .map(|option| {
                let vote_count = per_option.get(option.id.as_str()).copied().unwrap_or(0);
                OptionStat {
                    percentage: percentage(vote_count, total_votes),
                    option_id: option.id,
                    text: option.text,
                    vote_count,
                }
            })
            .collect();

        Ok(PollStats {
            poll_id: poll.id,
            total_votes,
            total_views,
            unique_voters,
            options,
        })
    }

    /// Attach a total vote count to each poll in a listing.
    ///
    /// The counts touch disjoint poll ids and run concurrently; a failing
    /// count fails the listing rather than masquerading as zero.
    pub async fn attach_vote_counts(
        &self,
        polls: Vec<poll::Model>,
    ) -> AppResult<Vec<PollWithVoteCount>> {
        let counts = try_join_all(
            polls
                .iter()
                .map(|poll| self.vote_repo.count_by_poll(&poll.id)),
        )
        .await?;

        Ok(polls
            .into_iter()
            .zip(counts)
            .map(|(poll, total_votes)| PollWithVoteCount { poll, total_votes })
            .collect())
    }
}
