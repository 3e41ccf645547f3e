//! Database repositories.

pub mod poll;
pub mod poll_view;
pub mod user;
pub mod vote;

pub use poll::{PollOptionRepository, PollRepository};
pub use poll_view::PollViewRepository;
pub use user::UserRepository;
pub use vote::{VoteRepository, DUPLICATE_OPTION_VOTE};
