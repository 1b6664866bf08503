//! Live-chat vote parsing.
//!
//! Audience votes arrive as free-form chat lines. A line counts as a vote
//! when it is an option number (`2`, `#2`, `!vote 2`, `vote #2`) or an
//! option name, optionally prefixed with `!vote`. Anything else is chatter.

use std::sync::LazyLock;

use regex::Regex;

use super::tally::{GenreOption, OptionId};

static NUMERIC_VOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:!?vote\s+)?#?(\d{1,9})\s*!*\s*$")
        .expect("NUMERIC_VOTE_RE regex should compile")
});

static NAMED_VOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:!?vote\s+)?(.+?)\s*!*\s*$").expect("NAMED_VOTE_RE regex should compile")
});

/// Resolve a chat line to a published option, if it is a vote.
pub fn parse_chat_vote(text: &str, options: &[GenreOption]) -> Option<OptionId> {
    if let Some(caps) = NUMERIC_VOTE_RE.captures(text) {
        let id: OptionId = caps[1].parse().ok()?;
        return options.iter().find(|o| o.id == id).map(|o| o.id);
    }

    let name = NAMED_VOTE_RE.captures(text)?.get(1)?.as_str().to_lowercase();
    options
        .iter()
        .find(|o| o.name.to_lowercase() == name)
        .map(|o| o.id)
}
