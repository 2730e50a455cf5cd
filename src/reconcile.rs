//! Merge per-team matchup fragments into canonical two-sided matchups.
//!
//! The provider only reports matchups from one team's point of view, so every
//! game arrives twice: once in each team's schedule. A game is emitted only
//! when both sides are present; a fragment whose opponent never reported the
//! same week (a bye, a data gap) is dropped.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::model::{team_id_suffix, CanonicalMatchup, TeamFragment};

/// Deterministic id for a week's game between two teams.
///
/// Numeric team suffixes are ordered ascending; keys without a numeric suffix
/// fall back to their full text.
pub fn canonical_id(week: i32, team_a: &str, team_b: &str) -> String {
    let (low, high) = ordered_pair(team_a, team_b);
    format!("{}_{}_{}", week, id_part(low), id_part(high))
}

fn id_part(team_key: &str) -> String {
    team_id_suffix(team_key)
        .map(|n| n.to_string())
        .unwrap_or_else(|| team_key.to_string())
}

fn compare_keys(a: &str, b: &str) -> Ordering {
    match (team_id_suffix(a), team_id_suffix(b)) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if compare_keys(a, b) == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    }
}

pub struct MatchupReconciler {
    league_key: String,
    season: String,
}

impl MatchupReconciler {
    pub fn new(league_key: impl Into<String>, season: impl Into<String>) -> Self {
        Self {
            league_key: league_key.into(),
            season: season.into(),
        }
    }

    /// Reconcile fragments into canonical matchups ordered by week then id.
    ///
    /// When two fragments share a `(week, team_key)`, the later one wins, so
    /// callers pass fresher sources last.
    pub fn reconcile(&self, fragments: Vec<TeamFragment>) -> Vec<CanonicalMatchup> {
        let mut lookup: HashMap<(i32, String), TeamFragment> = HashMap::new();
        let mut order: Vec<(i32, String)> = Vec::new();
        for fragment in fragments {
            let key = (fragment.week, fragment.team_key.clone());
            if lookup.insert(key.clone(), fragment).is_none() {
                order.push(key);
            }
        }

        let mut processed: HashSet<(i32, String)> = HashSet::new();
        let mut matchups = Vec::new();
        let mut dropped = 0usize;

        for key in order {
            if processed.contains(&key) {
                continue;
            }
            let Some(own) = lookup.get(&key) else {
                continue;
            };
            let opponent_key = (own.week, own.opponent_key.clone());
            match lookup.get(&opponent_key) {
                Some(opponent)
                    if opponent.opponent_key == own.team_key
                        && !processed.contains(&opponent_key) =>
                {
                    matchups.push(self.merge(own, opponent));
                    processed.insert(key);
                    processed.insert(opponent_key);
                }
                _ => {
                    dropped += 1;
                    processed.insert(key);
                }
            }
        }

        if dropped > 0 {
            debug!(
                league_key = %self.league_key,
                dropped,
                "Dropped fragments without a matching opponent view"
            );
        }

        matchups.sort_by(|a, b| a.week.cmp(&b.week).then_with(|| a.id.cmp(&b.id)));
        matchups
    }

    fn merge(&self, a: &TeamFragment, b: &TeamFragment) -> CanonicalMatchup {
        let (first, second) = if compare_keys(&a.team_key, &b.team_key) == Ordering::Greater {
            (b, a)
        } else {
            (a, b)
        };

        let winner_key = first
            .winner_key
            .clone()
            .or_else(|| second.winner_key.clone());

        CanonicalMatchup {
            id: canonical_id(first.week, &first.team_key, &second.team_key),
            league_key: self.league_key.clone(),
            season: self.season.clone(),
            week: first.week,
            week_start: first.week_start.or(second.week_start),
            week_end: first.week_end.or(second.week_end),
            team1_key: first.team_key.clone(),
            team2_key: second.team_key.clone(),
            team1_points: first.points,
            team2_points: second.points,
            team1_stats: first.stats.clone(),
            team2_stats: second.stats.clone(),
            winner_key,
            is_playoffs: first.is_playoffs || second.is_playoffs,
            is_consolation: first.is_consolation || second.is_consolation,
            is_tied: first.is_tied || second.is_tied,
        }
    }
}
