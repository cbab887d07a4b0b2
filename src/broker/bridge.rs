// =============================================================================
// Broker Bridge — adapts the BrokerSdk into a bounded-timeout,
// rate-limited, reconnecting request/response surface
// =============================================================================
//
// Grounded in the teacher's reconnect-loop pattern in
// `market_data::candle_buffer::run_kline_stream` (caller-driven reconnect
// with a fixed delay) generalized here to exponential backoff, and its
// `binance::client` request style generalized to per-request timeouts via
// `tokio::time::timeout` instead of relying on the HTTP client's own
// timeout configuration.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::broker::rate_limiter::BridgeRateLimiter;
use crate::broker::sdk::BrokerSdk;
use crate::broker::types::{Account, OrderResult, RealPosition, SymbolMetadata, TickEvent};
use crate::error::BrokerError;
use crate::types::Bar;

const SYMBOL_CACHE_TTL: Duration = Duration::from_secs(600);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
}

struct CachedSymbol {
    metadata: SymbolMetadata,
    fetched_at: Instant,
}

/// Wraps a `BrokerSdk` with the cross-cutting concerns the executor and
/// risk guard depend on: bounded timeouts, rate limiting, a symbol-metadata
/// cache, and reconnect-with-backoff. Owns the connection and the cache
/// exclusively, per the ownership summary.
pub struct BrokerBridge<S: BrokerSdk> {
    sdk: Arc<S>,
    rate_limiter: BridgeRateLimiter,
    request_timeout: Duration,
    symbol_cache: RwLock<HashMap<String, CachedSymbol>>,
    state: RwLock<ConnectionState>,
    token_expires_at: RwLock<Instant>,
}

impl<S: BrokerSdk> BrokerBridge<S> {
    pub fn new(sdk: Arc<S>, request_timeout: Duration) -> Self {
        Self {
            sdk,
            rate_limiter: BridgeRateLimiter::with_default_quotas(),
            request_timeout,
            symbol_cache: RwLock::new(HashMap::new()),
            state: RwLock::new(ConnectionState::Reconnecting),
            token_expires_at: RwLock::new(Instant::now() + Duration::from_secs(3600)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Establish the connection before any other SDK call, per the
    /// bootstrap ordering requirement: the event loop must be installed
    /// before any subscription or query touches the SDK.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.sdk.connect().await?;
        *self.state.write() = ConnectionState::Connected;
        *self.token_expires_at.write() = Instant::now() + Duration::from_secs(3600);
        info!("broker bridge connected");
        Ok(())
    }

    /// Reconnect with exponential backoff (base 1s, cap 60s), invalidating
    /// the symbol-metadata cache once the connection is reestablished.
    pub async fn reconnect_with_backoff(&self) {
        *self.state.write() = ConnectionState::Reconnecting;
        let mut delay = Duration::from_secs(1);
        const CAP: Duration = Duration::from_secs(60);

        loop {
            match self.sdk.connect().await {
                Ok(()) => {
                    *self.state.write() = ConnectionState::Connected;
                    self.symbol_cache.write().clear();
                    info!("broker bridge reconnected; symbol cache invalidated");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, delay_secs = delay.as_secs(), "reconnect attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(CAP);
                }
            }
        }
    }

    /// Proactively refresh authentication if the token expires within the
    /// margin; treated here as reconnecting through the SDK.
    pub async fn ensure_authenticated(&self) -> Result<(), BrokerError> {
        let expires_at = *self.token_expires_at.read();
        if expires_at.saturating_duration_since(Instant::now()) < TOKEN_REFRESH_MARGIN {
            self.sdk
                .connect()
                .await
                .map_err(|_| BrokerError::AuthenticationFailed("token refresh failed".to_string()))?;
            *self.token_expires_at.write() = Instant::now() + Duration::from_secs(3600);
        }
        Ok(())
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = Result<T, BrokerError>>) -> Result<T, BrokerError> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::RequestTimeout(self.request_timeout)),
        }
    }

    /// Historical bars for warmup/cold-start, also rate-limited as a
    /// history op. Not time-bounded by `with_timeout` beyond the shared
    /// request timeout, since a large warmup fetch is still one request.
    pub async fn get_history(&self, symbol: &str, timeframe: &str, count: usize) -> Result<Vec<Bar>, BrokerError> {
        self.rate_limiter.acquire_history().await;
        self.with_timeout(self.sdk.get_history(symbol, timeframe, count)).await
    }

    /// Subscribe to the tick stream for a symbol. Streaming subscriptions
    /// are not individually rate-limited or timeout-wrapped (the request/
    /// response contract in `with_timeout` does not fit an open channel);
    /// only the subscribe call itself consumes a history-ops token.
    pub async fn subscribe_bars(&self, symbol: &str) -> Result<tokio::sync::mpsc::Receiver<TickEvent>, BrokerError> {
        self.rate_limiter.acquire_history().await;
        self.sdk.subscribe_bars(symbol).await
    }

    pub async fn get_positions(&self) -> Result<Vec<RealPosition>, BrokerError> {
        self.rate_limiter.acquire_history().await;
        self.with_timeout(self.sdk.get_positions()).await
    }

    pub async fn get_account(&self) -> Result<Account, BrokerError> {
        self.rate_limiter.acquire_history().await;
        self.with_timeout(self.sdk.get_account()).await
    }

    /// Returns the cached value if fresh (TTL 10 min); otherwise fetches
    /// from the broker and refreshes the cache entry. `spread_points` on the
    /// returned value may be up to 10 minutes stale — callers that need a
    /// live spread must use `get_spread_pips` instead.
    pub async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolMetadata, BrokerError> {
        if let Some(cached) = self.symbol_cache.read().get(symbol) {
            if cached.fetched_at.elapsed() < SYMBOL_CACHE_TTL {
                return Ok(cached.metadata);
            }
        }

        self.rate_limiter.acquire_history().await;
        let metadata = self.with_timeout(self.sdk.get_symbol_info(symbol)).await?;
        self.symbol_cache.write().insert(
            symbol.to_string(),
            CachedSymbol {
                metadata,
                fetched_at: Instant::now(),
            },
        );
        Ok(metadata)
    }

    pub fn invalidate_cache(&self, symbol: &str) {
        self.symbol_cache.write().remove(symbol);
    }

    /// Current spread in pips, fetched fresh every call — never served from
    /// `symbol_cache`. Spread moves far faster than the rest of a symbol's
    /// metadata (digits, contract size, margin rate), so the spread-refresh
    /// loop (and anyone else who needs a live spread) must bypass the
    /// 10-minute TTL that the other fields are allowed to ride on.
    pub async fn get_spread_pips(&self, symbol: &str) -> Result<f64, BrokerError> {
        self.rate_limiter.acquire_history().await;
        let info = self.with_timeout(self.sdk.get_symbol_info(symbol)).await?;
        let pip_multiplier = if matches!(info.digits, 3 | 5) { 10.0 } else { 1.0 };
        Ok(info.spread_points * info.point * pip_multiplier)
    }

    pub async fn open_order(
        &self,
        symbol: &str,
        direction: i8,
        volume: f64,
        sl_price: Option<f64>,
        tp_price: Option<f64>,
        comment: &str,
    ) -> Result<OrderResult, BrokerError> {
        self.ensure_authenticated().await?;
        self.rate_limiter.acquire_trading().await;
        self.with_timeout(self.sdk.open_order(symbol, direction, volume, sl_price, tp_price, comment))
            .await
    }

    pub async fn close_order(&self, ticket: u64) -> Result<OrderResult, BrokerError> {
        self.ensure_authenticated().await?;
        self.rate_limiter.acquire_trading().await;
        self.with_timeout(self.sdk.close_order(ticket)).await
    }

    pub async fn modify_order(&self, ticket: u64, sl_price: Option<f64>, tp_price: Option<f64>) -> Result<(), BrokerError> {
        self.ensure_authenticated().await?;
        self.rate_limiter.acquire_trading().await;
        self.with_timeout(self.sdk.modify_order(ticket, sl_price, tp_price)).await
    }
}
