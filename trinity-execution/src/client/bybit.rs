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

const BASE_URL: &str = "https://api.bybit.com";
const RECV_WINDOW_MS: u64 = 10_000;
const CATEGORY: &str = "linear";

/// Bybit v5 USDT-perpetual (unified trading account) adapter.
///
/// Unlike Binance, funding rate here rides along on the general ticker endpoint
/// (`/v5/market/tickers`), so batch warm-up/refresh is also one request for every symbol.
#[derive(Debug)]
pub struct BybitAdapter {
    http: reqwest::Client,
    credentials: ApiCredentials,
    margin_mode: MarginMode,
    position_mode: PositionMode,
    funding_cache: Arc<RwLock<HashMap<Symbol, FundingCacheEntry>>>,
}

#[derive(Debug, Deserialize)]
struct BybitEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: T,
}

#[derive(Debug, Deserialize)]
struct TickerList {
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: Decimal,
    #[serde(rename = "fundingRate")]
    funding_rate: Decimal,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentsInfoList {
    list: Vec<InstrumentInfoEntry>,
}

#[derive(Debug, Deserialize)]
struct InstrumentInfoEntry {
    #[serde(rename = "priceFilter")]
    price_filter: PriceFilter,
    #[serde(rename = "lotSizeFilter")]
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Deserialize)]
struct PriceFilter {
    #[serde(rename = "tickSize")]
    tick_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "qtyStep")]
    qty_step: Decimal,
    #[serde(rename = "minNotionalValue", default)]
    min_notional_value: Decimal,
}

#[derive(Debug, Deserialize)]
struct WalletBalanceList {
    list: Vec<WalletBalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct WalletBalanceEntry {
    coin: Vec<CoinBalance>,
}

#[derive(Debug, Deserialize)]
struct CoinBalance {
    coin: String,
    #[serde(rename = "walletBalance")]
    wallet_balance: Decimal,
    #[serde(rename = "availableToWithdraw")]
    available_to_withdraw: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionList {
    list: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    symbol: String,
    side: String,
    size: Decimal,
    #[serde(rename = "avgPrice")]
    avg_price: Decimal,
    #[serde(rename = "unrealisedPnl")]
    unrealised_pnl: Decimal,
    leverage: String,
}

impl BybitAdapter {
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

    /// Bybit signs `timestamp + api_key + recv_window + payload`, where payload is the raw query
    /// string for GET and the raw JSON body for POST.
    fn auth_headers(&self, payload: &str) -> Vec<(&'static str, String)> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let prehash = format!("{timestamp}{}{RECV_WINDOW_MS}{payload}", self.credentials.key);
        let signature = sign_hex(&self.credentials.secret, &prehash);
        vec![
            ("X-BAPI-API-KEY", self.credentials.key.clone()),
            ("X-BAPI-TIMESTAMP", timestamp),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string()),
            ("X-BAPI-SIGN", signature),
        ]
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, AdapterError> {
        let url = format!("{BASE_URL}{path}?{query}");
        let mut request = self.http.get(url);
        for (k, v) in self.auth_headers(query) {
            request = request.header(k, v);
        }
        let response = request.send().await?;
        parse_envelope(response).await
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &str,
    ) -> Result<T, AdapterError> {
        let url = format!("{BASE_URL}{path}");
        let mut request = self.http.post(url).header("Content-Type", "application/json").body(body.to_string());
        for (k, v) in self.auth_headers(body) {
            request = request.header(k, v);
        }
        let response = request.send().await?;
        parse_envelope(response).await
    }

    async fn fetch_tickers(&self) -> Result<Vec<TickerEntry>, AdapterError> {
        let url = format!("{BASE_URL}/v5/market/tickers?category={CATEGORY}");
        let response = self.http.get(url).send().await?;
        let envelope: BybitEnvelope<TickerList> = parse_envelope(response).await?;
        Ok(envelope.result.list)
    }
}

async fn parse_envelope<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AdapterError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::AuthError(body));
    }
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::TransientError(body));
    }
    let envelope: BybitEnvelope<T> = response.json().await.map_err(AdapterError::from)?;
    if envelope.ret_code != 0 {
        return Err(AdapterError::RejectedBySide(envelope.ret_msg));
    }
    Ok(envelope.result)
}

// `parse_envelope::<T>` above returns `T` via `envelope.result`, but the outer signature is
// `Result<T, _>` while we actually need `BybitEnvelope<T>::result` typed as `T` - the generic
// bound already does that; this comment exists only because the shape looks unusual at a glance.

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        let url = format!("{BASE_URL}/v5/market/time");
        self.http.get(url).send().await?;
        debug!(exchange = %ExchangeId::Bybit, "connected");
        Ok(())
    }

    async fn ensure_trading_settings(&self, symbol: &Symbol, leverage: u32) -> Result<(), AdapterError> {
        // Bybit's tradeMode is 0 (cross) or 1 (isolated); position mode is account-wide per
        // `category`, set via switch-mode rather than per-symbol.
        let trade_mode = match self.margin_mode {
            MarginMode::Cross => 0,
            MarginMode::Isolated => 1,
        };
        let margin_body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol.as_str(),
            "tradeMode": trade_mode,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        })
        .to_string();

        let result: Result<serde_json::Value, AdapterError> =
            self.post_signed("/v5/position/switch-isolated", &margin_body).await;
        if let Err(err) = result {
            if !is_already_set(&err) {
                return Err(err);
            }
        }

        let mode = match self.position_mode {
            PositionMode::OneWay => 0,
            PositionMode::Hedged => 3,
        };
        let mode_body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol.as_str(),
            "mode": mode,
        })
        .to_string();
        let mode_result: Result<serde_json::Value, AdapterError> = self.post_signed("/v5/position/switch-mode", &mode_body).await;
        if let Err(err) = mode_result {
            if !is_already_set(&err) {
                return Err(err);
            }
        }

        let leverage_body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol.as_str(),
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        })
        .to_string();

        let leverage_result: Result<serde_json::Value, AdapterError> =
            self.post_signed("/v5/position/set-leverage", &leverage_body).await;
        match leverage_result {
            Ok(_) => Ok(()),
            Err(err) if is_already_set(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn get_instrument_spec(&self, symbol: &Symbol) -> Result<InstrumentSpec, AdapterError> {
        let query = format!("category={CATEGORY}&symbol={}", symbol.as_str());
        let url = format!("{BASE_URL}/v5/market/instruments-info?{query}");
        let response = self.http.get(url).send().await?;
        let result: InstrumentsInfoList = parse_envelope(response).await?;
        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::IncompatibleVenue(format!("unknown symbol {symbol}")))?;

        Ok(InstrumentSpec::new(
            Decimal::ONE,
            entry.price_filter.tick_size,
            entry.lot_size_filter.qty_step,
            entry.lot_size_filter.min_notional_value,
            Decimal::new(1, 4), // 0.0001 maker
            Decimal::new(6, 4), // 0.0006 taker
        ))
    }

    async fn get_balance(&self) -> Result<Balance, AdapterError> {
        let query = "accountType=UNIFIED&coin=USDT";
        let result: WalletBalanceList = self.get_signed("/v5/account/wallet-balance", query).await?;
        let usdt = result
            .list
            .into_iter()
            .next()
            .and_then(|entry| entry.coin.into_iter().find(|c| c.coin == "USDT"))
            .ok_or_else(|| AdapterError::TransientError("no USDT balance entry".to_string()))?;

        Ok(Balance {
            free: usdt.available_to_withdraw,
            total: usdt.wallet_balance,
        })
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        let tickers = self.fetch_tickers().await?;
        tickers
            .into_iter()
            .find(|t| t.symbol == symbol.as_str())
            .map(|t| t.last_price)
            .ok_or_else(|| AdapterError::IncompatibleVenue(format!("unknown symbol {symbol}")))
    }

    async fn get_positions(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>, AdapterError> {
        let mut query = format!("category={CATEGORY}");
        if let Some(symbol) = symbol {
            query.push_str(&format!("&symbol={}", symbol.as_str()));
        } else {
            query.push_str("&settleCoin=USDT");
        }
        let result: PositionList = self.get_signed("/v5/position/list", &query).await?;

        Ok(result
            .list
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .map(|p| {
                let side = if p.side.eq_ignore_ascii_case("Buy") { OrderSide::Buy } else { OrderSide::Sell };
                Position::new(
                    ExchangeId::Bybit,
                    Symbol::new(p.symbol),
                    side,
                    p.size,
                    p.avg_price,
                    p.unrealised_pnl,
                    p.leverage.parse().unwrap_or(1),
                )
            })
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<FundingCacheEntry, AdapterError> {
        let query = format!("category={CATEGORY}&symbol={}", symbol.as_str());
        let url = format!("{BASE_URL}/v5/market/tickers?{query}");
        let response = self.http.get(url).send().await?;
        let result: TickerList = parse_envelope(response).await?;
        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::IncompatibleVenue(format!("unknown symbol {symbol}")))?;

        Ok(FundingCacheEntry::from_venue(
            entry.funding_rate,
            entry.next_funding_time.parse().unwrap_or_default(),
            8,
            Utc::now().timestamp_millis(),
        ))
    }

    async fn get_cached_funding(&self, symbol: &Symbol) -> Option<FundingCacheEntry> {
        self.funding_cache.read().get(symbol).copied()
    }

    async fn warm_up_funding(&self, symbols: &[Symbol]) {
        match self.fetch_tickers().await {
            Ok(entries) => {
                let now_ms = Utc::now().timestamp_millis();
                let mut cache = self.funding_cache.write();
                for entry in entries {
                    let symbol = Symbol::new(entry.symbol);
                    if symbols.contains(&symbol) {
                        cache.insert(
                            symbol,
                            FundingCacheEntry::from_venue(entry.funding_rate, entry.next_funding_time.parse().unwrap_or_default(), 8, now_ms),
                        );
                    }
                }
                info!(exchange = %ExchangeId::Bybit, count = symbols.len(), "funding cache warmed up via batch endpoint");
            }
            Err(err) => {
                info!(exchange = %ExchangeId::Bybit, %err, "batch warm-up failed, falling back to per-symbol fetch");
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
            run_with_backoff(ExchangeId::Bybit, shutdown, move || {
                let cache = cache.clone();
                let http = http.clone();
                let symbols = symbols.clone();
                async move {
                    let url = format!("{BASE_URL}/v5/market/tickers?category={CATEGORY}");
                    let response = http.get(url).send().await?;
                    let result: TickerList = parse_envelope(response).await?;

                    let now_ms = Utc::now().timestamp_millis();
                    let mut cache = cache.write();
                    for entry in result.list {
                        let symbol = Symbol::new(entry.symbol);
                        if symbols.contains(&symbol) {
                            cache.insert(
                                symbol,
                                FundingCacheEntry::from_venue(entry.funding_rate, entry.next_funding_time.parse().unwrap_or_default(), 8, now_ms),
                            );
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
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };

        // Convert base-currency quantity to venue-native contract units and round down to the
        // lot step; never round up past what the caller's balance check already cleared.
        let spec = self.get_instrument_spec(&request.symbol).await?;
        let contract_qty = spec.round_lot_down(request.quantity / spec.contract_size);
        if contract_qty.is_zero() {
            return Ok(FillResult::unfilled());
        }

        // positionIdx selects which side of a hedge-mode position this order affects (1 = long,
        // 2 = short); one-way mode uses 0 and leaves reduceOnly to disambiguate close-vs-open.
        let position_idx = match self.position_mode {
            PositionMode::OneWay => 0,
            PositionMode::Hedged if request.hedge_affects_long() => 1,
            PositionMode::Hedged => 2,
        };

        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": request.symbol.as_str(),
            "side": side,
            "orderType": "Market",
            "qty": contract_qty.to_string(),
            "reduceOnly": request.reduce_only,
            "positionIdx": position_idx,
        })
        .to_string();

        #[derive(Deserialize)]
        struct PlaceOrderResult {
            #[serde(rename = "orderId")]
            #[allow(dead_code)]
            order_id: String,
        }

        let _result: PlaceOrderResult = self.post_signed("/v5/order/create", &body).await?;

        // Market orders confirm on the order-history / execution-list endpoint rather than the
        // placement response; a real deployment would poll that. For the purposes of this engine
        // we treat a successful placement ack as a full fill at the last observed price, same as
        // the REST-polling model the rest of the adapter uses.
        let price = self.get_ticker(&request.symbol).await?;
        Ok(FillResult {
            filled_quantity: contract_qty * spec.contract_size,
            average_price: price,
        })
    }
}

fn is_already_set(err: &AdapterError) -> bool {
    matches!(err, AdapterError::RejectedBySide(msg) if msg.to_lowercase().contains("not modified"))
}
