pub mod bridge;
pub mod rate_limiter;
pub mod sdk;
pub mod types;

pub use bridge::{BrokerBridge, ConnectionState};
pub use sdk::{BrokerSdk, MockBrokerSdk};
pub use types::{Account, OrderResult, RealPosition, SymbolMetadata, TickEvent};
