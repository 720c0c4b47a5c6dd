//! Shared test utilities: an in-memory exchange and a loopback server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use rust_decimal::Decimal;
use tempfile::TempDir;
use tradebot::exchange::MarketDataProvider;
use tradebot::hub::{Hub, HubHandle};
use tradebot::models::{ExchangeBalance, MarketSummary};
use tradebot::publisher::StatePublisher;
use tradebot::socket::PumpConfig;
use tradebot::socket::server::Server;
use tradebot::store::Store;
use tungstenite::Message;

/// How long a test waits for a frame before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Exchange double with fixed balances and a scripted sequence of last
/// prices. The final price repeats once the script runs out.
pub struct MockExchange {
    balances: Vec<ExchangeBalance>,
    prices: Mutex<Vec<Decimal>>,
    summary_calls: AtomicUsize,
}

impl MockExchange {
    pub fn new(balances: &[(&str, Decimal)]) -> Self {
        Self {
            balances: balances
                .iter()
                .map(|(currency, amount)| ExchangeBalance {
                    currency: currency.to_string(),
                    available: Some(*amount),
                    balance: Some(*amount),
                })
                .collect(),
            prices: Mutex::new(Vec::new()),
            summary_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_prices(self, prices: &[Decimal]) -> Self {
        let mut scripted = prices.to_vec();
        scripted.reverse();
        *self.prices.lock().unwrap() = scripted;
        self
    }

    pub fn summary_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for MockExchange {
    async fn get_balances(&self) -> tradebot::Result<Vec<ExchangeBalance>> {
        Ok(self.balances.clone())
    }

    async fn get_market_summary(&self, pair: &str) -> tradebot::Result<MarketSummary> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        let mut prices = self.prices.lock().unwrap();
        let last = if prices.len() > 1 {
            prices.pop()
        } else {
            prices.last().copied()
        };
        Ok(MarketSummary {
            market: pair.to_string(),
            last,
            bid: last,
            ask: last,
            ..MarketSummary::default()
        })
    }
}

/// A websocket server on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: HubHandle,
    pub publisher: Arc<StatePublisher>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start(exchange: MockExchange) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Store::open(dir.path().join("state.json"))
            .await
            .expect("Failed to open store");
        let hub = Hub::spawn();
        let publisher = Arc::new(StatePublisher::new(
            Arc::new(exchange),
            Arc::new(store),
            hub.clone(),
        ));
        publisher
            .refresh_balances()
            .await
            .expect("Failed initial refresh");

        let server = Server::bind("127.0.0.1:0".parse().unwrap(), PumpConfig::default())
            .await
            .expect("Failed to bind server");
        let addr = server.local_addr().expect("Failed to read local addr");
        tokio::spawn(server.run(hub.clone(), publisher.clone()));

        Self {
            addr,
            hub,
            publisher,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Polls the hub until it reports `expected` live connections.
    pub async fn wait_for_connections(&self, expected: usize) {
        let poll = async {
            loop {
                let live = self
                    .hub
                    .connection_count()
                    .await
                    .expect("Hub closed");
                if live == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(RECV_TIMEOUT, poll)
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {expected} connections"));
    }
}

/// Returns the next text frame, skipping control frames.
pub async fn next_text<S>(ws: &mut S) -> String
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("Timed out waiting for message")
            .expect("Connection closed")
            .expect("Read failed");
        if let Message::Text(text) = frame {
            return text.to_string();
        }
    }
}
