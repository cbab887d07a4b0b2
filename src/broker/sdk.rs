// =============================================================================
// BrokerSdk — capability contract the bridge adapts into request/response
// =============================================================================
//
// The source vendor SDK is duck-typed: register a handler, pump an event
// loop, receive callbacks. This trait is the capability contract that
// replaces that duck typing (Design Note: a connector interface becomes a
// trait so the bridge, the risk guard, and the tests all depend on the same
// abstract surface rather than a concrete vendor client).
// =============================================================================

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};

use crate::broker::types::{Account, OrderResult, RealPosition, SymbolMetadata, TickEvent};
use crate::error::BrokerError;
use crate::types::Bar;

/// The abstract operations the bridge depends on, independent of the
/// concrete wire protocol.
#[async_trait]
pub trait BrokerSdk: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn get_history(&self, symbol: &str, timeframe: &str, count: usize) -> Result<Vec<Bar>, BrokerError>;
    async fn subscribe_bars(&self, symbol: &str) -> Result<mpsc::Receiver<TickEvent>, BrokerError>;
    async fn get_positions(&self) -> Result<Vec<RealPosition>, BrokerError>;
    async fn open_order(
        &self,
        symbol: &str,
        direction: i8,
        volume: f64,
        sl_price: Option<f64>,
        tp_price: Option<f64>,
        comment: &str,
    ) -> Result<OrderResult, BrokerError>;
    async fn close_order(&self, ticket: u64) -> Result<OrderResult, BrokerError>;
    async fn modify_order(&self, ticket: u64, sl_price: Option<f64>, tp_price: Option<f64>) -> Result<(), BrokerError>;
    async fn get_account(&self) -> Result<Account, BrokerError>;
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolMetadata, BrokerError>;
}

/// Deterministic in-process implementation used by tests and by
/// `broker.type = mock` in the main configuration, letting the whole
/// orchestrator run end-to-end with no network access.
pub struct MockBrokerSdk {
    account: Mutex<Account>,
    positions: Mutex<HashMap<u64, RealPosition>>,
    next_ticket: Mutex<u64>,
    symbol_info: HashMap<String, SymbolMetadata>,
}

impl MockBrokerSdk {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            account: Mutex::new(Account {
                balance: initial_balance,
                equity: initial_balance,
                used_margin: 0.0,
                free_margin: initial_balance,
                margin_level: 0.0,
            }),
            positions: Mutex::new(HashMap::new()),
            next_ticket: Mutex::new(1),
            symbol_info: HashMap::new(),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>, info: SymbolMetadata) -> Self {
        self.symbol_info.insert(symbol.into(), info);
        self
    }
}

#[async_trait]
impl BrokerSdk for MockBrokerSdk {
    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn get_history(&self, _symbol: &str, _timeframe: &str, _count: usize) -> Result<Vec<Bar>, BrokerError> {
        Ok(Vec::new())
    }

    async fn subscribe_bars(&self, _symbol: &str) -> Result<mpsc::Receiver<TickEvent>, BrokerError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn get_positions(&self) -> Result<Vec<RealPosition>, BrokerError> {
        Ok(self.positions.lock().await.values().cloned().collect())
    }

    async fn open_order(
        &self,
        symbol: &str,
        direction: i8,
        volume: f64,
        _sl_price: Option<f64>,
        _tp_price: Option<f64>,
        _comment: &str,
    ) -> Result<OrderResult, BrokerError> {
        let mut next_ticket = self.next_ticket.lock().await;
        let ticket = *next_ticket;
        *next_ticket += 1;

        let fill_price = 1.0;
        self.positions.lock().await.insert(
            ticket,
            RealPosition {
                symbol: symbol.to_string(),
                ticket,
                direction,
                volume,
                entry_price: fill_price,
            },
        );
        Ok(OrderResult { ticket, fill_price })
    }

    async fn close_order(&self, ticket: u64) -> Result<OrderResult, BrokerError> {
        let mut positions = self.positions.lock().await;
        let position = positions.remove(&ticket).ok_or(BrokerError::OrderRejected(format!(
            "unknown ticket {ticket}"
        )))?;
        Ok(OrderResult {
            ticket,
            fill_price: position.entry_price,
        })
    }

    async fn modify_order(&self, ticket: u64, sl_price: Option<f64>, tp_price: Option<f64>) -> Result<(), BrokerError> {
        let positions = self.positions.lock().await;
        if !positions.contains_key(&ticket) {
            return Err(BrokerError::OrderRejected(format!("unknown ticket {ticket}")));
        }
        let _ = (sl_price, tp_price);
        Ok(())
    }

    async fn get_account(&self) -> Result<Account, BrokerError> {
        Ok(*self.account.lock().await)
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolMetadata, BrokerError> {
        self.symbol_info
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::UnknownSymbol(symbol.to_string()))
    }
}
