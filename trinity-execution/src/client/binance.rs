use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};
use trinity_instrument::{ExchangeId, InstrumentSpec, MarginMode, OrderRequest, OrderSide, Position, PositionMode, Symbol};

use crate::{
    adapter::{ExchangeAdapter, ShutdownSignal},
    balance::Balance,
    error::AdapterError,
    funding::FundingCacheEntry,
    order::FillResult,
    signer::{ApiCredentials, sign_hex},
    watcher::run_with_backoff,
};

const BASE_URL: &str = "https://fapi.binance.com";
const RECV_WINDOW_MS: u64 = 10_000;

/// Binance USDT-M perpetual futures adapter.
///
/// Funding rate, mark price and next funding time come back in a single batched
/// `/fapi/v1/premiumIndex` call across every symbol, so this venue sets `supports_batch_funding`.
#[derive(Debug)]
pub struct BinanceAdapter {
    http: reqwest::Client,
    credentials: ApiCredentials,
    margin_mode: MarginMode,
    position_mode: PositionMode,
    funding_cache: Arc<RwLock<HashMap<Symbol, FundingCacheEntry>>>,
}

#[derive(Debug, Deserialize)]
struct PremiumIndexEntry {
    symbol: String,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: Decimal,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoSymbol {
    symbol: String,
    filters: Vec<ExchangeInfoFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum ExchangeInfoFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price { #[serde(rename = "tickSize")] tick_size: Decimal },
    #[serde(rename = "LOT_SIZE")]
    Lot { #[serde(rename = "stepSize")] step_size: Decimal },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    #[serde(rename = "availableBalance")]
    available_balance: Decimal,
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionRiskEntry {
    symbol: String,
    #[serde(rename = "positionAmt")]
    position_amt: Decimal,
    #[serde(rename = "entryPrice")]
    entry_price: Decimal,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: Decimal,
    leverage: Decimal,
}

impl BinanceAdapter {
    pub fn new(credentials: ApiCredentials, margin_mode: MarginMode, position_mode: PositionMode) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
            credentials,
            margin_mode,
            position_mode,
            funding_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn signed_query(&self, mut params: Vec<(&str, String)>) -> String {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let query = serde_urlencoded::to_string(&params)
            .expect("query params are plain strings and always encode");
        let signature = sign_hex(&self.credentials.secret, &query);
        format!("{query}&signature={signature}")
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, AdapterError> {
        let query = self.signed_query(params);
        let url = format!("{BASE_URL}{path}?{query}");
        let response = self
            .http
            .get(url)
            .header("X-MBX-APIKEY", &self.credentials.key)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, AdapterError> {
        let query = self.signed_query(params);
        let url = format!("{BASE_URL}{path}?{query}");
        let response = self
            .http
            .post(url)
            .header("X-MBX-APIKEY", &self.credentials.key)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn fetch_premium_index(&self) -> Result<Vec<PremiumIndexEntry>, AdapterError> {
        let url = format!("{BASE_URL}/fapi/v1/premiumIndex");
        let response = self.http.get(url).send().await?;
        parse_response(response).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AdapterError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::AuthError(body));
    }
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::TransientError(body));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::RejectedBySide(body));
    }
    response.json::<T>().await.map_err(AdapterError::from)
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        let url = format!("{BASE_URL}/fapi/v1/ping");
        self.http.get(url).send().await?;
        debug!(exchange = %ExchangeId::Binance, "connected");
        Ok(())
    }

    async fn ensure_trading_settings(&self, symbol: &Symbol, leverage: u32) -> Result<(), AdapterError> {
        // Margin mode before leverage: Binance (unlike OKX) tolerates either order, but we keep
        // the same sequencing across every adapter so the execution controller never needs to
        // special-case this venue. Position mode is account-wide rather than per-symbol, but
        // Binance still requires no open position/order on the symbol when it's changed, so it
        // is applied here too rather than once at startup.
        let margin_type = match self.margin_mode {
            MarginMode::Cross => "CROSSED",
            MarginMode::Isolated => "ISOLATED",
        };
        let margin_mode_result: Result<serde_json::Value, AdapterError> = self
            .post_signed(
                "/fapi/v1/marginType",
                vec![("symbol", symbol.as_str().to_string()), ("marginType", margin_type.to_string())],
            )
            .await;
        if let Err(err) = margin_mode_result {
            if !is_already_set(&err) {
                return Err(err);
            }
        }

        let dual_side = matches!(self.position_mode, PositionMode::Hedged);
        let position_mode_result: Result<serde_json::Value, AdapterError> = self
            .post_signed("/fapi/v1/positionSide/dual", vec![("dualSidePosition", dual_side.to_string())])
            .await;
        if let Err(err) = position_mode_result {
            if !is_already_set(&err) {
                return Err(err);
            }
        }

        let leverage_result: Result<serde_json::Value, AdapterError> = self
            .post_signed(
                "/fapi/v1/leverage",
                vec![("symbol", symbol.as_str().to_string()), ("leverage", leverage.to_string())],
            )
            .await;
        match leverage_result {
            Ok(_) => Ok(()),
            Err(err) if is_already_set(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn get_instrument_spec(&self, symbol: &Symbol) -> Result<InstrumentSpec, AdapterError> {
        let url = format!("{BASE_URL}/fapi/v1/exchangeInfo");
        let response = self.http.get(url).send().await?;
        #[derive(Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<ExchangeInfoSymbol>,
        }
        let info: ExchangeInfo = parse_response(response).await?;

        let entry = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol.as_str())
            .ok_or_else(|| AdapterError::IncompatibleVenue(format!("unknown symbol {symbol}")))?;

        let mut tick_size = Decimal::ZERO;
        let mut lot_size = Decimal::ZERO;
        let mut min_notional = Decimal::ZERO;
        for filter in entry.filters {
            match filter {
                ExchangeInfoFilter::Price { tick_size: t } => tick_size = t,
                ExchangeInfoFilter::Lot { step_size } => lot_size = step_size,
                ExchangeInfoFilter::MinNotional { notional } => min_notional = notional,
                ExchangeInfoFilter::Other => {}
            }
        }

        Ok(InstrumentSpec::new(
            Decimal::ONE,
            tick_size,
            lot_size,
            min_notional,
            Decimal::new(2, 4),  // 0.0002 maker
            Decimal::new(4, 4),  // 0.0004 taker
        ))
    }

    async fn get_balance(&self) -> Result<Balance, AdapterError> {
        let balances: Vec<BalanceEntry> = self.get_signed("/fapi/v2/balance", vec![]).await?;
        let usdt = balances
            .into_iter()
            .find(|b| b.asset == "USDT")
            .ok_or_else(|| AdapterError::TransientError("no USDT balance entry".to_string()))?;
        Ok(Balance {
            free: usdt.available_balance,
            total: usdt.balance,
        })
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        let url = format!("{BASE_URL}/fapi/v1/ticker/price?symbol={}", symbol.as_str());
        let response = self.http.get(url).send().await?;
        #[derive(Deserialize)]
        struct Ticker {
            price: Decimal,
        }
        let ticker: Ticker = parse_response(response).await?;
        Ok(ticker.price)
    }

    async fn get_positions(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>, AdapterError> {
        let mut params = vec![];
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.as_str().to_string()));
        }
        let entries: Vec<PositionRiskEntry> = self.get_signed("/fapi/v2/positionRisk", params).await?;

        Ok(entries
            .into_iter()
            .filter(|p| !p.position_amt.is_zero())
            .map(|p| {
                let side = if p.position_amt.is_sign_positive() { OrderSide::Buy } else { OrderSide::Sell };
                Position::new(
                    ExchangeId::Binance,
                    Symbol::new(p.symbol),
                    side,
                    p.position_amt.abs(),
                    p.entry_price,
                    p.unrealized_profit,
                    p.leverage.to_string().parse().unwrap_or(1),
                )
            })
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingCacheEntry, AdapterError> {
        let url = format!("{BASE_URL}/fapi/v1/premiumIndex?symbol={}", symbol.as_str());
        let response = self.http.get(url).send().await?;
        let entry: PremiumIndexEntry = parse_response(response).await?;
        Ok(FundingCacheEntry::from_venue(entry.last_funding_rate, entry.next_funding_time, 8, Utc::now().timestamp_millis()))
    }

    async fn get_cached_funding(&self, symbol: &Symbol) -> Option<FundingCacheEntry> {
        self.funding_cache.read().get(symbol).copied()
    }

    async fn warm_up_funding(&self, symbols: &[Symbol]) {
        match self.fetch_premium_index().await {
            Ok(entries) => {
                let now_ms = Utc::now().timestamp_millis();
                let mut cache = self.funding_cache.write();
                for entry in entries {
                    let symbol = Symbol::new(entry.symbol);
                    if symbols.contains(&symbol) {
                        cache.insert(symbol, FundingCacheEntry::from_venue(entry.last_funding_rate, entry.next_funding_time, 8, now_ms));
                    }
                }
                info!(exchange = %ExchangeId::Binance, count = symbols.len(), "funding cache warmed up via batch endpoint");
            }
            Err(err) => {
                info!(exchange = %ExchangeId::Binance, %err, "batch warm-up failed, falling back to per-symbol fetch");
                for symbol in symbols {
                    if let Ok(entry) = self.get_funding_rate(symbol).await {
                        self.funding_cache.write().insert(symbol.clone(), entry);
                    }
                }
            }
        }
    }

    fn start_funding_watchers(&self, symbols: Vec<Symbol>, shutdown: ShutdownSignal) {
        let cache = self.funding_cache.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            run_with_backoff(ExchangeId::Binance, shutdown, move || {
                let cache = cache.clone();
                let http = http.clone();
                let symbols = symbols.clone();
                async move {
                    let url = format!("{BASE_URL}/fapi/v1/premiumIndex");
                    let response = http.get(url).send().await?;
                    let entries: Vec<PremiumIndexEntry> = parse_response(response).await?;

                    let now_ms = Utc::now().timestamp_millis();
                    let mut cache = cache.write();
                    for entry in entries {
                        let symbol = Symbol::new(entry.symbol);
                        if symbols.contains(&symbol) {
                            cache.insert(symbol, FundingCacheEntry::from_venue(entry.last_funding_rate, entry.next_funding_time, 8, now_ms));
                        }
                    }
                    Ok(())
                }
            })
            .await;
        });
    }

    fn supports_batch_funding(&self) -> bool {
        true
    }

    async fn place_order(&self, request: OrderRequest) -> Result<FillResult, AdapterError> {
        let side = match request.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        // Convert base-currency quantity to venue-native contract units and round down to the
        // lot step; never round up past what the caller's balance check already cleared.
        let spec = self.get_instrument_spec(&request.symbol).await?;
        let contract_qty = spec.round_lot_down(request.quantity / spec.contract_size);
        if contract_qty.is_zero() {
            return Ok(FillResult::unfilled());
        }

        let mut params = vec![
            ("symbol", request.symbol.as_str().to_string()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", contract_qty.to_string()),
        ];
        // Hedged accounts track long and short as two independent positions per symbol, so the
        // venue needs to be told which one this order affects; reduceOnly is meaningless there
        // (and rejected) since positionSide alone disambiguates close-vs-open.
        if self.position_mode == PositionMode::Hedged {
            let position_side = if request.hedge_affects_long() { "LONG" } else { "SHORT" };
            params.push(("positionSide", position_side.to_string()));
        } else if request.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        #[derive(Deserialize)]
        struct OrderResponse {
            #[serde(rename = "executedQty")]
            executed_qty: Decimal,
            #[serde(rename = "avgPrice")]
            avg_price: Decimal,
        }

        let response: OrderResponse = self.post_signed("/fapi/v1/order", params).await?;
        Ok(FillResult {
            filled_quantity: response.executed_qty * spec.contract_size,
            average_price: response.avg_price,
        })
    }
}

/// Binance returns a distinct error code/message for "margin type already set" / "leverage
/// already set" that would otherwise look like a hard failure on every subsequent trade open.
fn is_already_set(err: &AdapterError) -> bool {
    matches!(err, AdapterError::RejectedBySide(msg) if msg.to_lowercase().contains("no need to change"))
}
