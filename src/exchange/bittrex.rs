//! Bittrex v1.1 REST client.
//!
//! Private endpoints are authenticated by appending `apikey` and `nonce`
//! to the query string and sending
//! `apisign = hex(HMAC-SHA512(secret, full request URI))` as a header.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha512;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{MarketDataProvider, OrderPlacer};
use crate::config::ExchangeConfig;
use crate::models::{ExchangeBalance, MarketSummary, OrderRequest, OrderSide};
use crate::{Result, TradeBotError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks the last nonce issued so every call returns a strictly
/// increasing value even when the wall-clock hasn't advanced.
static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// Standard `{success, message, result}` response wrapper.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    message: String,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, endpoint: &str) -> Result<T> {
        if !self.success {
            return Err(TradeBotError::Exchange(format!(
                "{endpoint}: {}",
                self.message
            )));
        }
        self.result
            .ok_or_else(|| TradeBotError::Exchange(format!("{endpoint}: missing result")))
    }
}

#[derive(Debug, Deserialize)]
struct OrderResult {
    uuid: String,
}

/// Client for the Bittrex REST API.
pub struct BittrexClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    api_secret: Zeroizing<String>,
}

impl BittrexClient {
    /// Builds a client from the exchange configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TradeBotError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    /// Builds the URL for a public endpoint.
    fn public_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        Url::parse_with_params(&format!("{}/{path}", self.api_url), query)
            .map_err(|e| TradeBotError::Config(format!("invalid exchange url: {e}")))
    }

    /// Builds the URL for a private endpoint and its `apisign` header.
    fn signed_url(&self, path: &str, query: &[(&str, &str)]) -> Result<(Url, String)> {
        let nonce = next_nonce().to_string();
        let mut params: Vec<(&str, &str)> =
            vec![("apikey", self.api_key.as_str()), ("nonce", nonce.as_str())];
        params.extend_from_slice(query);

        let url = self.public_url(path, &params)?;
        let signature = sign(&self.api_secret, url.as_str())?;
        Ok((url, signature))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        url: Url,
        signature: Option<String>,
    ) -> Result<T> {
        let mut request = self.http.get(url);
        if let Some(signature) = signature {
            request = request.header("apisign", signature);
        }

        let response = request.send().await?.error_for_status()?;
        let body: ApiResponse<T> = response.json().await?;
        body.into_result(endpoint)
    }
}

#[async_trait]
impl MarketDataProvider for BittrexClient {
    async fn get_balances(&self) -> Result<Vec<ExchangeBalance>> {
        let (url, signature) = self.signed_url("account/getbalances", &[])?;
        let balances: Vec<ExchangeBalance> =
            self.get("getbalances", url, Some(signature)).await?;
        debug!(count = balances.len(), "Fetched balances");
        Ok(balances)
    }

    async fn get_market_summary(&self, pair: &str) -> Result<MarketSummary> {
        let url = self.public_url("public/getmarketsummary", &[("market", pair)])?;
        let summaries: Vec<MarketSummary> = self.get("getmarketsummary", url, None).await?;
        summaries
            .into_iter()
            .next()
            .ok_or_else(|| TradeBotError::Exchange(format!("no market summary for {pair}")))
    }
}

#[async_trait]
impl OrderPlacer for BittrexClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<String> {
        let (path, endpoint) = match order.side {
            OrderSide::Buy => ("market/buylimit", "buylimit"),
            OrderSide::Sell => ("market/selllimit", "selllimit"),
        };
        let quantity = order.quantity.to_string();
        let rate = order.rate.to_string();
        let (url, signature) = self.signed_url(
            path,
            &[
                ("market", order.market.as_str()),
                ("quantity", quantity.as_str()),
                ("rate", rate.as_str()),
            ],
        )?;

        let result: OrderResult = self.get(endpoint, url, Some(signature)).await?;
        info!(
            market = %order.market,
            side = %order.side,
            quantity = %order.quantity,
            rate = %order.rate,
            order_id = %result.uuid,
            "Order placed"
        );
        Ok(result.uuid)
    }
}

/// Computes the `apisign` header: lowercase hex of HMAC-SHA512 over the URI.
fn sign(api_secret: &str, uri: &str) -> Result<String> {
    let mut mac = Hmac::<Sha512>::new_from_slice(api_secret.as_bytes())
        .map_err(|e| TradeBotError::Config(format!("invalid HMAC key: {e}")))?;
    mac.update(uri.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Returns a strictly monotonically-increasing nonce with millisecond
/// resolution.
fn next_nonce() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let mut prev = LAST_NONCE.load(Ordering::Relaxed);
    loop {
        let nonce = now.max(prev + 1);
        match LAST_NONCE.compare_exchange_weak(prev, nonce, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return nonce,
            Err(actual) => prev = actual,
        }
    }
}
