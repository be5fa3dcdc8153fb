//! Win Leaderboard
//!
//! Process-wide win tally keyed by username. Independent of any room:
//! the same name accumulates wins across rooms and reconnects.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Default number of entries in a snapshot.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// One row of the leaderboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Player name.
    pub username: String,
    /// Matches won (ties credit every tied player).
    pub wins: u32,
    /// Time of the most recent win.
    pub last_win: DateTime<Utc>,
}

/// Win tally.
#[derive(Clone, Debug, Default)]
pub struct Leaderboard {
    /// Entries in first-seen order.
    entries: Vec<LeaderboardEntry>,
    /// Username to position in `entries`.
    index: BTreeMap<String, usize>,
}

impl Leaderboard {
    /// Create an empty leaderboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit one win to each username.
    pub fn record_win<S: AsRef<str>>(&mut self, usernames: &[S]) {
        self.record_win_at(usernames, Utc::now());
    }

    /// Credit one win to each username at a given time.
    pub fn record_win_at<S: AsRef<str>>(&mut self, usernames: &[S], at: DateTime<Utc>) {
        for name in usernames {
            let name = name.as_ref();
            match self.index.get(name) {
                Some(&idx) => {
                    let entry = &mut self.entries[idx];
                    entry.wins += 1;
                    entry.last_win = at;
                }
                None => {
                    self.index.insert(name.to_string(), self.entries.len());
                    self.entries.push(LeaderboardEntry {
                        username: name.to_string(),
                        wins: 1,
                        last_win: at,
                    });
                }
            }
        }
    }

    /// Top entries by wins, ties in first-seen order.
    pub fn top(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut ranked: Vec<&LeaderboardEntry> = self.entries.iter().collect();
        // Stable sort keeps first-seen order among equal win counts.
        ranked.sort_by(|a, b| b.wins.cmp(&a.wins));
        ranked.into_iter().take(limit).cloned().collect()
    }

    /// Wins for a username.
    pub fn wins(&self, username: &str) -> u32 {
        self.index
            .get(username)
            .map(|&idx| self.entries[idx].wins)
            .unwrap_or(0)
    }

    /// Number of distinct winners.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nobody has won yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
