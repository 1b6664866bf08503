//! Vote tally for one audience voting window.
//!
//! Keeps the current ballot per voter and derived per-option counts. A voter
//! re-voting moves their ballot; repeating the same vote changes nothing.
//! Ballots are ordered by `cast_at` per voter (last timestamp wins), so a
//! late-delivered older vote is accepted but superseded.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordinal identifying a published option.
pub type OptionId = u32;

/// Identity of an audience member.
pub type VoterId = String;

/// A votable genre published for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreOption {
    pub id: OptionId,
    pub name: String,
    #[serde(default)]
    pub tagline: String,
}

impl GenreOption {
    pub fn new(id: OptionId, name: impl Into<String>, tagline: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tagline: tagline.into(),
        }
    }
}

/// Error type for tally operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteError {
    #[error("option {0} is not in the published set")]
    UnknownOption(OptionId),

    /// The engine routed a vote or close while no window exists.
    #[error("vote tally used with no open window")]
    NoWindow,
}

impl VoteError {
    /// Whether this is an internal ordering bug rather than bad input.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::NoWindow)
    }
}

/// Current ballot of one voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub option_id: OptionId,
    pub cast_at: DateTime<Utc>,
}

/// Result of casting a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    /// Counts changed because of this vote.
    pub changed: bool,
    /// First accepted vote of the window.
    pub first_vote: bool,
    /// Older than the voter's recorded ballot; kept for the record only.
    pub superseded: bool,
    #[serde(deserialize_with = "option_counts::deserialize")]
    pub counts: BTreeMap<OptionId, u32>,
    pub total_votes: u32,
}

/// Outcome of closing a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerResult {
    /// `None` when no votes were cast.
    pub winner: Option<OptionId>,
    #[serde(deserialize_with = "option_counts::deserialize")]
    pub counts: BTreeMap<OptionId, u32>,
    pub total_votes: u32,
    /// Options sharing the maximum count when more than one did.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tied: Vec<OptionId>,
}

/// Per-option counts keyed by option id.
///
/// JSON object keys are strings. Tagged and flattened containers buffer the
/// object before the map sees it, so the integer key has to be parsed back
/// from the string form here.
pub mod option_counts {
    use std::collections::BTreeMap;
    use std::fmt;

    use serde::de::{self, Deserializer, MapAccess, Visitor};

    use super::OptionId;

    struct OptionKey(OptionId);

    impl<'de> de::Deserialize<'de> for OptionKey {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct KeyVisitor;

            impl Visitor<'_> for KeyVisitor {
                type Value = OptionKey;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("an option id")
                }

                fn visit_u64<E: de::Error>(self, v: u64) -> Result<OptionKey, E> {
                    OptionId::try_from(v)
                        .map(OptionKey)
                        .map_err(|_| E::custom(format!("option id {v} out of range")))
                }

                fn visit_str<E: de::Error>(self, v: &str) -> Result<OptionKey, E> {
                    v.parse()
                        .map(OptionKey)
                        .map_err(|_| E::custom(format!("invalid option id {v:?}")))
                }
            }

            deserializer.deserialize_any(KeyVisitor)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<OptionId, u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = BTreeMap<OptionId, u32>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of option id to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut counts = BTreeMap::new();
                while let Some((OptionKey(id), count)) = map.next_entry::<OptionKey, u32>()? {
                    counts.insert(id, count);
                }
                Ok(counts)
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}

#[derive(Debug, Clone)]
struct VoteWindow {
    /// Publication order; index is the tie-break rank.
    options: Vec<GenreOption>,
    ballots: HashMap<VoterId, Ballot>,
    counts: BTreeMap<OptionId, u32>,
    timer_started: bool,
}

impl VoteWindow {
    fn new(options: Vec<GenreOption>) -> Self {
        let counts = options.iter().map(|o| (o.id, 0)).collect();
        Self {
            options,
            ballots: HashMap::new(),
            counts,
            timer_started: false,
        }
    }

    fn total(&self) -> u32 {
        self.ballots.len() as u32
    }
}

/// Tally owning the voter → option mapping for the current window.
#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    window: Option<VoteWindow>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh window over `options`, discarding any previous ballots.
    pub fn open(&mut self, options: Vec<GenreOption>) {
        debug!(options = options.len(), "Opening vote window");
        self.window = Some(VoteWindow::new(options));
    }

    /// Drop the window without producing a result.
    pub fn discard(&mut self) {
        self.window = None;
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// Options of the open window in publication order.
    pub fn options(&self) -> &[GenreOption] {
        self.window.as_ref().map(|w| w.options.as_slice()).unwrap_or(&[])
    }

    pub fn ballot(&self, voter_id: &str) -> Option<Ballot> {
        self.window.as_ref()?.ballots.get(voter_id).copied()
    }

    /// Current counts (empty when no window is open).
    pub fn counts(&self) -> BTreeMap<OptionId, u32> {
        self.window
            .as_ref()
            .map(|w| w.counts.clone())
            .unwrap_or_default()
    }

    pub fn total_votes(&self) -> u32 {
        self.window.as_ref().map(VoteWindow::total).unwrap_or(0)
    }

    /// Record `voter_id`'s vote for `option_id`.
    pub fn cast_vote(
        &mut self,
        voter_id: &str,
        option_id: OptionId,
        cast_at: DateTime<Utc>,
    ) -> Result<VoteReceipt, VoteError> {
        let window = self.window.as_mut().ok_or(VoteError::NoWindow)?;
        if !window.counts.contains_key(&option_id) {
            return Err(VoteError::UnknownOption(option_id));
        }

        let mut changed = false;
        let mut superseded = false;

        match window.ballots.get_mut(voter_id) {
            None => {
                window.ballots.insert(
                    voter_id.to_string(),
                    Ballot {
                        option_id,
                        cast_at,
                    },
                );
                *window.counts.entry(option_id).or_insert(0) += 1;
                changed = true;
            }
            Some(ballot) if cast_at < ballot.cast_at => {
                debug!(voter_id, option_id, "Vote older than recorded ballot");
                superseded = true;
            }
            Some(ballot) if ballot.option_id == option_id => {
                ballot.cast_at = cast_at;
            }
            Some(ballot) => {
                let previous = ballot.option_id;
                ballot.option_id = option_id;
                ballot.cast_at = cast_at;
                if let Some(count) = window.counts.get_mut(&previous) {
                    *count = count.saturating_sub(1);
                }
                *window.counts.entry(option_id).or_insert(0) += 1;
                changed = true;
            }
        }

        let first_vote = !superseded && !window.timer_started;
        if first_vote {
            window.timer_started = true;
        }

        Ok(VoteReceipt {
            changed,
            first_vote,
            superseded,
            counts: window.counts.clone(),
            total_votes: window.total(),
        })
    }

    /// Close the window and pick the winner.
    ///
    /// Ties go to the option published earliest among the tied set.
    pub fn close(&mut self) -> Result<WinnerResult, VoteError> {
        let window = self.window.take().ok_or(VoteError::NoWindow)?;
        let max = window.counts.values().copied().max().unwrap_or(0);

        let (winner, tied) = if max == 0 {
            (None, Vec::new())
        } else {
            let leaders: Vec<OptionId> = window
                .options
                .iter()
                .map(|o| o.id)
                .filter(|id| window.counts.get(id).copied().unwrap_or(0) == max)
                .collect();
            let tied = if leaders.len() > 1 {
                leaders.clone()
            } else {
                Vec::new()
            };
            (leaders.first().copied(), tied)
        };

        debug!(?winner, total = window.total(), "Vote window closed");

        Ok(WinnerResult {
            winner,
            total_votes: window.total(),
            counts: window.counts,
            tied,
        })
    }
}
