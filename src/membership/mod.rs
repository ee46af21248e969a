/// Exchange membership for the streaming router
///
/// - `store`: copy-then-swap holder of the current exchange → tickers set
/// - `refresh`: warehouse rebuilds and the staleness-driven refresh loop

pub mod refresh;
pub mod store;

pub use refresh::{MembershipBuilder, RefreshScheduler, TickOutcome};
pub use store::{ExchangeMembership, MembershipSet, MembershipStore, MembershipSummary};
