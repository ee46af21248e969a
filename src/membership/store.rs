//! Exchange membership index
//!
//! A `MembershipSet` is built off to the side and then installed in a single
//! swap. Readers hold the read lock only long enough to clone the `Arc`, so
//! a lookup never waits on a rebuild and never sees a partial set.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::models::{Exchange, Ticker};

/// Immutable exchange → tickers mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSet {
    generation: u64,
    built_at: Option<DateTime<Utc>>,
    priority: Vec<Exchange>,
    members: HashMap<Exchange, HashSet<Ticker>>,
}

impl MembershipSet {
    /// Set in place before the first successful build
    pub fn empty(priority: Vec<Exchange>) -> Self {
        Self {
            generation: 0,
            built_at: None,
            priority,
            members: HashMap::new(),
        }
    }

    /// Freshly built set; its generation is assigned on install
    pub fn new(priority: Vec<Exchange>, members: HashMap<Exchange, HashSet<Ticker>>) -> Self {
        Self::built_at(priority, members, Utc::now())
    }

    pub fn built_at(
        priority: Vec<Exchange>,
        members: HashMap<Exchange, HashSet<Ticker>>,
        built_at: DateTime<Utc>,
    ) -> Self {
        Self {
            generation: 0,
            built_at: Some(built_at),
            priority,
            members,
        }
    }

    /// First exchange in priority order whose set contains `symbol`
    pub fn first_match(&self, symbol: &str) -> Option<Exchange> {
        self.priority.iter().copied().find(|exchange| {
            self.members
                .get(exchange)
                .map_or(false, |tickers| tickers.contains(symbol))
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn build_time(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn priority(&self) -> &[Exchange] {
        &self.priority
    }

    pub fn tickers(&self, exchange: Exchange) -> Option<&HashSet<Ticker>> {
        self.members.get(&exchange)
    }

    pub fn count(&self, exchange: Exchange) -> usize {
        self.members.get(&exchange).map_or(0, HashSet::len)
    }

    pub fn total(&self) -> usize {
        self.members.values().map(HashSet::len).sum()
    }

    pub fn summary(&self) -> MembershipSummary {
        MembershipSummary {
            generation: self.generation,
            built_at: self.built_at,
            exchanges: self
                .priority
                .iter()
                .map(|exchange| ExchangeMembership {
                    exchange: *exchange,
                    tickers: self.count(*exchange),
                })
                .collect(),
            total: self.total(),
        }
    }

    /// Never built, or built at least `max_age` before `now`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.built_at {
            None => true,
            Some(built_at) => now - built_at >= max_age,
        }
    }
}

/// Ticker count per exchange, in priority order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MembershipSummary {
    pub generation: u64,
    pub built_at: Option<DateTime<Utc>>,
    pub exchanges: Vec<ExchangeMembership>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ExchangeMembership {
    pub exchange: Exchange,
    pub tickers: usize,
}

/// Process-wide holder of the current membership set
pub struct MembershipStore {
    current: RwLock<Arc<MembershipSet>>,
}

impl MembershipStore {
    pub fn new(priority: Vec<Exchange>) -> Self {
        Self {
            current: RwLock::new(Arc::new(MembershipSet::empty(priority))),
        }
    }

    /// The installed set; never blocks on a rebuild in progress
    pub fn current(&self) -> Arc<MembershipSet> {
        self.current.read().clone()
    }

    /// Replace the installed set, returning its generation
    pub fn install(&self, mut set: MembershipSet) -> u64 {
        let mut current = self.current.write();
        set.generation = current.generation + 1;
        let generation = set.generation;
        *current = Arc::new(set);
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(entries: &[(Exchange, &[&str])]) -> HashMap<Exchange, HashSet<Ticker>> {
        entries
            .iter()
            .map(|(exchange, symbols)| {
                (
                    *exchange,
                    symbols.iter().map(|s| Ticker::new(*s).unwrap()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_first_match_follows_priority() {
        let set = MembershipSet::new(
            vec![Exchange::Xnas, Exchange::Xnys, Exchange::Xase],
            members(&[
                (Exchange::Xnys, &["IBM", "DUAL"][..]),
                (Exchange::Xnas, &["AAPL", "DUAL"][..]),
                (Exchange::Xase, &["SMALL"][..]),
            ]),
        );

        assert_eq!(set.first_match("AAPL"), Some(Exchange::Xnas));
        assert_eq!(set.first_match("IBM"), Some(Exchange::Xnys));
        assert_eq!(set.first_match("SMALL"), Some(Exchange::Xase));
        assert_eq!(set.first_match("DUAL"), Some(Exchange::Xnas));
        assert_eq!(set.first_match("NOPE"), None);
        assert_eq!(set.total(), 5);
    }

    #[test]
    fn test_exchange_outside_priority_never_matches() {
        let set = MembershipSet::new(vec![Exchange::Xnys], members(&[(Exchange::Xnas, &["AAPL"][..])]));
        assert_eq!(set.first_match("AAPL"), None);
    }

    #[test]
    fn test_boot_set_is_empty_and_stale() {
        let store = MembershipStore::new(Exchange::ALL.to_vec());
        let set = store.current();

        assert_eq!(set.generation(), 0);
        assert_eq!(set.total(), 0);
        assert!(set.is_stale(Utc::now(), chrono::Duration::hours(12)));
    }

    #[test]
    fn test_staleness() {
        let built = Utc::now();
        let set = MembershipSet::built_at(vec![], HashMap::new(), built);

        assert!(!set.is_stale(built + chrono::Duration::hours(11), chrono::Duration::hours(12)));
        assert!(set.is_stale(built + chrono::Duration::hours(12), chrono::Duration::hours(12)));
    }

    #[test]
    fn test_install_assigns_generations_and_keeps_old_readers_valid() {
        let store = MembershipStore::new(vec![Exchange::Xnas]);
        let before = store.current();

        let generation = store.install(MembershipSet::new(
            vec![Exchange::Xnas],
            members(&[(Exchange::Xnas, &["AAPL"][..])]),
        ));

        assert_eq!(generation, 1);
        assert_eq!(before.first_match("AAPL"), None);
        assert_eq!(store.current().first_match("AAPL"), Some(Exchange::Xnas));
        assert_eq!(store.install(MembershipSet::empty(vec![])), 2);
    }

    #[test]
    fn test_readers_only_see_complete_generations() {
        const GENERATIONS: u64 = 200;
        const SIZE: usize = 50;

        let store = Arc::new(MembershipStore::new(vec![Exchange::Xnas]));

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for g in 1..=GENERATIONS {
                    // every ticker of generation g is tagged with g
                    let symbols: HashSet<Ticker> = (0..SIZE)
                        .map(|i| Ticker::new(format!("G{}-{}", g, i)).unwrap())
                        .collect();
                    store.install(MembershipSet::new(
                        vec![Exchange::Xnas],
                        HashMap::from([(Exchange::Xnas, symbols)]),
                    ));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut last = 0;
                    while last < GENERATIONS {
                        let set = store.current();
                        let generation = set.generation();
                        assert!(generation >= last, "generation went backwards");
                        last = generation;
                        if generation == 0 {
                            continue;
                        }
                        assert_eq!(set.count(Exchange::Xnas), SIZE);
                        let prefix = format!("G{}-", generation);
                        assert!(set
                            .tickers(Exchange::Xnas)
                            .unwrap()
                            .iter()
                            .all(|t| t.as_str().starts_with(&prefix)));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.current().generation(), GENERATIONS);
    }
}
