//! Renewal-chain filtering of discovered leagues.
//!
//! A league that continues into a new season gets a new key, linked to the
//! old one through `renew` (previous season) and `renewed` (next season). Only
//! leagues connected to the anchor through those links are synced; other
//! leagues the user belongs to, even in the same game, are ignored.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use crate::model::{DiscoveredLeague, LeagueIdentity};

/// Leagues reachable from `anchor`, oldest season first.
pub fn trace_renewal_chain(leagues: &[DiscoveredLeague], anchor: &str) -> Vec<LeagueIdentity> {
    let by_key: HashMap<&str, &DiscoveredLeague> = leagues
        .iter()
        .map(|l| (l.identity.league_key.as_str(), l))
        .collect();

    if !by_key.contains_key(anchor) {
        warn!(anchor, "Anchor league not among discovered leagues");
        return Vec::new();
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([anchor]);
    let mut chain = Vec::new();

    while let Some(key) = queue.pop_front() {
        if !seen.insert(key) {
            continue;
        }
        let Some(league) = by_key.get(key) else {
            continue;
        };
        chain.push(league.identity.clone());

        for link in [&league.renew, &league.renewed].into_iter().flatten() {
            if let Some((linked, _)) = by_key.get_key_value(link.as_str()) {
                queue.push_back(*linked);
            }
        }
    }

    chain.sort_by(|a, b| a.season.cmp(&b.season).then_with(|| a.league_key.cmp(&b.league_key)));
    chain
}

/// Keep identities whose season is listed; an empty list keeps everything.
pub fn filter_seasons(identities: Vec<LeagueIdentity>, seasons: &[String]) -> Vec<LeagueIdentity> {
    if seasons.is_empty() {
        return identities;
    }
    identities
        .into_iter()
        .filter(|i| seasons.iter().any(|s| s == &i.season))
        .collect()
}
