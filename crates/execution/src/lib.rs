pub mod feed;
pub mod paper;
pub mod retry;

pub use feed::{ScriptedFeed, SyntheticFeed};
pub use paper::{PaperBroker, SettlementModel};
pub use retry::{close_with_retry, submit_with_retry, with_retry, RetryPolicy};
