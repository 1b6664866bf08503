//! Audience voting: per-window tally and chat vote parsing.

pub mod chat;
pub mod tally;

pub use chat::parse_chat_vote;
pub use tally::{
    option_counts, Ballot, GenreOption, OptionId, VoteError, VoteReceipt, VoteTally, VoterId,
    WinnerResult,
};
