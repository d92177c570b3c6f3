//! Spot exchange REST client.
//!
//! Minimal binding to a Binance-compatible spot REST API: public market
//! data (tickers, depth, instrument filters) and signed account endpoints
//! (balances, fee schedule, fee-discount flag, market orders).
//!
//! Signed requests carry `timestamp` and `recvWindow` and are
//! authenticated with an HMAC-SHA256 signature over the query string.

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::execution::InstrumentInfo;
use crate::market::book::{DepthBook, TickerFeed};
use crate::types::{ExecutionError, OrderRequest, OrderResult, Side, SymbolFilters};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Validity window for signed requests (ms).
const RECV_WINDOW_MS: u64 = 5000;

const REQUEST_TIMEOUT_SECS: u64 = 30;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeFee {
    symbol: String,
    taker_commission: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BurnStatus {
    #[serde(rename = "spotBNBBurn")]
    spot_bnb_burn: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    status: String,
    executed_qty: String,
    cummulative_quote_qty: String,
    #[serde(default)]
    price: Option<String>,
    side: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ExchangeClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
}

impl ExchangeClient {
    pub fn new(base_url: Option<String>, api_key: String, api_secret: SecretString) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build exchange HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            api_secret,
        })
    }

    /// Sign a query string with the account secret.
    pub fn sign(&self, query: &str) -> Result<String, ExecutionError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|e| ExecutionError::RequestFailed(format!("invalid signing key: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExecutionError> {
        let query = encode_query(params);
        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };
        let resp = self.http.get(&url).send().await?;
        Self::decode(resp).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExecutionError> {
        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        all.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));

        let query = encode_query(&all);
        let signature = self.sign(&query)?;
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        debug!(path, method = %method, "Signed exchange request");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ExecutionError> {
        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.map_err(|e| ExecutionError::Decode(e.to_string()));
        }

        let text = resp.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            warn!(status = %status, body = %text, "Retryable exchange error");
            return Err(ExecutionError::RequestFailed(format!("HTTP {status}: {text}")));
        }

        match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => Err(ExecutionError::Rejected {
                code: body.code,
                message: body.msg,
            }),
            Err(_) => Err(ExecutionError::RequestFailed(format!("HTTP {status}: {text}"))),
        }
    }

    // -- Public endpoints ---------------------------------------------------

    pub async fn ticker_prices(&self) -> Result<HashMap<String, f64>, ExecutionError> {
        let tickers: Vec<TickerPrice> = self.public("/api/v3/ticker/price", &[]).await?;
        tickers
            .into_iter()
            .map(|t| Ok((t.symbol, parse_f64(&t.price)?)))
            .collect()
    }

    pub async fn depth(&self, symbol: &str, limit: u32) -> Result<DepthBook, ExecutionError> {
        let snap: DepthSnapshot = self
            .public(
                "/api/v3/depth",
                &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(DepthBook::from_levels(parse_levels(&snap.bids)?, parse_levels(&snap.asks)?))
    }

    pub async fn filters(&self, symbol: &str) -> Result<SymbolFilters, ExecutionError> {
        let info: ExchangeInfo = self
            .public("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let sym = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExecutionError::Decode(format!("symbol {symbol} not listed")))?;
        parse_filters(&sym.filters)
    }

    // -- Signed endpoints ---------------------------------------------------

    pub async fn account_balances(&self) -> Result<HashMap<String, f64>, ExecutionError> {
        let account: AccountInfo = self.signed(Method::GET, "/api/v3/account", &[]).await?;
        account
            .balances
            .into_iter()
            .map(|b| Ok((b.asset, parse_f64(&b.free)?)))
            .collect()
    }

    pub async fn taker_fees(&self) -> Result<HashMap<String, f64>, ExecutionError> {
        let fees: Vec<TradeFee> = self.signed(Method::GET, "/sapi/v1/asset/tradeFee", &[]).await?;
        fees.into_iter()
            .map(|f| Ok((f.symbol, parse_f64(&f.taker_commission)?)))
            .collect()
    }

    pub async fn fee_burn_enabled(&self) -> Result<bool, ExecutionError> {
        let status: BurnStatus = self.signed(Method::GET, "/sapi/v1/bnbBurn", &[]).await?;
        Ok(status.spot_bnb_burn)
    }

    /// Submit a market order. Buys spend `quote_quantity`, sells sell
    /// `quantity`.
    pub async fn market_order(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        let mut params = vec![
            ("symbol", order.symbol()),
            ("side", order.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("newClientOrderId", uuid::Uuid::new_v4().simple().to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        match order.side {
            Side::Buy => params.push(("quoteOrderQty", format_quantity(order.quote_quantity))),
            Side::Sell => params.push(("quantity", format_quantity(order.quantity))),
        }

        let resp: OrderResponse = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let side = match resp.side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => return Err(ExecutionError::Decode(format!("unknown side {other}"))),
        };

        Ok(OrderResult {
            order_id: resp.order_id.to_string(),
            symbol: resp.symbol,
            side,
            filled_quantity: parse_f64(&resp.executed_qty)?,
            price: resp.price.as_deref().map(parse_f64).transpose()?.unwrap_or(0.0),
            cumulative_quote: parse_f64(&resp.cummulative_quote_qty)?,
            status: resp.status,
        })
    }
}

#[async_trait]
impl InstrumentInfo for ExchangeClient {
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExecutionError> {
        self.filters(symbol).await
    }

    async fn trade_fees(&self) -> Result<Option<HashMap<String, f64>>, ExecutionError> {
        self.taker_fees().await.map(Some)
    }

    async fn fee_discount_enabled(&self) -> Result<bool, ExecutionError> {
        self.fee_burn_enabled().await
    }
}

#[async_trait]
impl TickerFeed for ExchangeClient {
    async fn all_ticker_prices(&self) -> anyhow::Result<HashMap<String, f64>> {
        Ok(self.ticker_prices().await?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_f64(s: &str) -> Result<f64, ExecutionError> {
    s.parse::<f64>()
        .map_err(|e| ExecutionError::Decode(format!("bad number {s:?}: {e}")))
}

fn parse_levels(levels: &[(String, String)]) -> Result<Vec<(f64, f64)>, ExecutionError> {
    levels
        .iter()
        .map(|(p, q)| Ok((parse_f64(p)?, parse_f64(q)?)))
        .collect()
}

fn parse_filters(filters: &[serde_json::Value]) -> Result<SymbolFilters, ExecutionError> {
    let field = |filter_type: &str, key: &str| -> Option<String> {
        filters
            .iter()
            .find(|f| f["filterType"] == filter_type)
            .and_then(|f| f[key].as_str().map(str::to_string))
    };

    let step = field("LOT_SIZE", "stepSize")
        .ok_or_else(|| ExecutionError::Decode("missing LOT_SIZE filter".into()))?;
    let step_size = Decimal::from_str(&step)
        .map_err(|e| ExecutionError::Decode(format!("bad step size {step:?}: {e}")))?
        .normalize();

    let min_notional = match field("NOTIONAL", "minNotional").or_else(|| field("MIN_NOTIONAL", "minNotional")) {
        Some(v) => parse_f64(&v)?,
        None => 0.0,
    };

    Ok(SymbolFilters { step_size, min_notional })
}

/// Quantity as a plain decimal string without trailing zeros.
pub fn format_quantity(value: f64) -> String {
    let s = format!("{value:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
