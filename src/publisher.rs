//! Turns balance refreshes and session progress into hub broadcasts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::Result;
use crate::exchange::MarketDataProvider;
use crate::hub::HubHandle;
use crate::models::{self, Balance, Payload, SessionRecord, balance};
use crate::store::Store;

/// Keeps the store and every connected client in step with the exchange.
pub struct StatePublisher {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<Store>,
    hub: HubHandle,
}

impl StatePublisher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, store: Arc<Store>, hub: HubHandle) -> Self {
        Self {
            provider,
            store,
            hub,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetches balances, persists them and broadcasts a `Balance` message.
    ///
    /// # Errors
    ///
    /// Upstream and persistence errors are returned before anything is
    /// broadcast; the stored snapshot is left as it was when the fetch
    /// fails.
    pub async fn refresh_balances(&self) -> Result<Vec<Balance>> {
        let balances = balance::normalize(self.provider.get_balances().await?);
        let payload = models::balance_message(&balances)?;

        self.store.update_balances(balances.clone()).await;
        self.store.flush().await?;
        self.hub.broadcast_retained(payload)?;

        debug!(currencies = balances.len(), "Balances refreshed");
        Ok(balances)
    }

    /// Encodes the stored balances as a `Balance` message for a new client.
    pub async fn balance_snapshot(&self) -> Result<Payload> {
        models::balance_message(&self.store.balances().await)
    }

    /// Persists `record` and broadcasts it as a `Session` message.
    pub async fn publish_session(&self, record: &SessionRecord) -> Result<()> {
        let payload = models::session_message(record)?;
        self.store.upsert_session(record.clone()).await;
        self.store.flush().await?;
        self.hub.broadcast(payload)
    }

    /// Publishes every record received on `updates` until the sender is
    /// dropped.
    pub async fn forward_sessions(&self, mut updates: mpsc::UnboundedReceiver<SessionRecord>) {
        while let Some(record) = updates.recv().await {
            if let Err(e) = self.publish_session(&record).await {
                warn!(session = record.id, "Failed to publish session update: {e}");
            }
        }
    }

    /// Refreshes balances every `period`.
    ///
    /// A failed refresh is logged and the previous snapshot kept until the
    /// next tick.
    pub async fn run_refresh_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The caller has already done the startup refresh.
        ticker.tick().await;

        info!(period_ms = period.as_millis() as u64, "Balance refresh loop started");
        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh_balances().await {
                warn!("Balance refresh failed, keeping previous snapshot: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TradeBotError;
    use crate::condition::Parameters;
    use crate::hub::Hub;
    use crate::models::{ExchangeBalance, MarketSummary, SessionState};
    use crate::socket::{self, PumpConfig};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Wallet {
        down: AtomicBool,
    }

    #[async_trait]
    impl MarketDataProvider for Wallet {
        async fn get_balances(&self) -> Result<Vec<ExchangeBalance>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(TradeBotError::Exchange("maintenance".into()));
            }
            Ok(vec![
                ExchangeBalance {
                    currency: "btc".into(),
                    available: Some(dec!(1.2)),
                    balance: Some(dec!(1.2)),
                },
                ExchangeBalance {
                    currency: "DOGE".into(),
                    available: Some(dec!(0)),
                    balance: Some(dec!(0)),
                },
            ])
        }

        async fn get_market_summary(&self, pair: &str) -> Result<MarketSummary> {
            Ok(MarketSummary {
                market: pair.to_string(),
                ..MarketSummary::default()
            })
        }
    }

    async fn publisher(wallet: Arc<Wallet>) -> (StatePublisher, mpsc::Receiver<Payload>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("state.json")).await.unwrap());
        let hub = Hub::spawn();
        let (pump, queue) = socket::channel(&PumpConfig::default());
        hub.register(pump).unwrap();
        (StatePublisher::new(wallet, store, hub), queue, dir)
    }

    #[tokio::test]
    async fn refresh_persists_and_broadcasts() {
        let (publisher, mut queue, _dir) = publisher(Arc::default()).await;

        let balances = publisher.refresh_balances().await.unwrap();
        assert_eq!(balances, vec![Balance::new("BTC", dec!(1.2), dec!(1.2))]);
        assert_eq!(publisher.store().balances().await, balances);

        let message = queue.recv().await.unwrap();
        assert_eq!(
            message.as_str(),
            r#"{"type":"Balance","payload":[{"Currency":"BTC","Available":1.2,"Total":1.2}]}"#
        );
        assert_eq!(publisher.balance_snapshot().await.unwrap(), message);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let wallet = Arc::new(Wallet::default());
        let (publisher, mut queue, _dir) = publisher(wallet.clone()).await;
        publisher.refresh_balances().await.unwrap();
        queue.recv().await.unwrap();

        wallet.down.store(true, Ordering::SeqCst);
        assert!(publisher.refresh_balances().await.is_err());
        assert_eq!(publisher.store().balances().await.len(), 1);
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_updates_are_stored_and_broadcast() {
        let (publisher, mut queue, _dir) = publisher(Arc::default()).await;
        let record = SessionRecord {
            id: 7,
            command: "stop-loss".into(),
            currency: "LTC".into(),
            state: SessionState::Evaluating,
            parameters: Parameters::default(),
            order_id: None,
            error: None,
            updated_at: 1,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(record.clone()).unwrap();
        drop(tx);
        publisher.forward_sessions(rx).await;

        assert_eq!(publisher.store().sessions().await, vec![record]);
        let message = queue.recv().await.unwrap();
        assert!(message.as_str().starts_with(r#"{"type":"Session","payload":{"Id":7"#));
    }

    #[tokio::test]
    async fn late_client_gets_refreshed_balances_not_session_updates() {
        let (publisher, _queue, _dir) = publisher(Arc::default()).await;
        publisher.refresh_balances().await.unwrap();
        let record = SessionRecord {
            id: 1,
            command: "limit-sell".into(),
            currency: "BTC".into(),
            state: SessionState::Executed,
            parameters: Parameters::default(),
            order_id: None,
            error: None,
            updated_at: 2,
        };
        publisher.publish_session(&record).await.unwrap();

        let (late, mut late_queue) = socket::channel(&PumpConfig::default());
        publisher
            .hub
            .register_with_snapshot(late, Some("fallback".into()))
            .unwrap();

        let first = late_queue.recv().await.unwrap();
        assert_eq!(first, publisher.balance_snapshot().await.unwrap());
        assert!(late_queue.try_recv().is_err());
    }
}
