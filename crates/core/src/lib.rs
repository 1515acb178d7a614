pub mod account;
pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod events;
pub mod health;
pub mod market;
pub mod position;
pub mod position_sizing;
pub mod traits;

pub use account::{AccountState, RiskBudget, TradingMode};
pub use config::{
    AccountConfig, AppConfig, BrokerConfig, DatabaseConfig, FailoverConfig, IncomeConfig,
    RiskConfig, ServerConfig, StrategiesConfig, TradingConfig, TurboConfig, WatchdogConfig,
};
pub use config_loader::{ConfigLoader, DEFAULT_CONFIG_PATH};
pub use config_watcher::ConfigWatcher;
pub use error::{BreakerCause, BrokerError, PilotError, ReasonCode, RejectReason};
pub use events::{BrokerEvent, CloseReport, DeskEvent, Fill, OrderRequest};
pub use health::{HealthSignal, Host};
pub use market::{CandidateTrade, MarketSignal, MarketSnapshot, Trend};
pub use position::Position;
pub use position_sizing::{PositionSizer, SizingConfig};
pub use traits::{BrokerGateway, EdgeScorer, LeaseInfo, LeaseStore, MarketDataSource, PeerNotifier};
