//! Chain watchers: the confirmation-gated EVM event source and the
//! privacy-chain burn watcher. Both create UNSIGNED swap records; neither
//! ever signs or broadcasts anything.

pub mod eth;
pub mod scrt;

pub use eth::{DepositHandler, EventHandler, EventSource};
pub use scrt::BurnWatcher;
