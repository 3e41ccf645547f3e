//! Business logic services.

#![allow(missing_docs)]

pub mod poll;
pub mod saga;
pub mod stats;
pub mod user;
pub mod vote;

pub use poll::{CreatePollInput, PollForViewer, PollService, PollWithOptions, UpdatePollInput};
pub use saga::run_with_compensation;
pub use stats::{OptionStat, PollStats, PollWithVoteCount, StatsService};
pub use user::{CreateUserInput, UserService};
pub use vote::{Eligibility, Voter, VoteService, evaluate_eligibility};
