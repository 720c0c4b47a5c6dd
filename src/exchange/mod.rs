//! Exchange collaborators.
//!
//! The rest of the crate only talks to the exchange through the
//! [`MarketDataProvider`] and [`OrderPlacer`] traits; [`bittrex`] is the
//! production implementation of both.

pub mod bittrex;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::Result;
use crate::models::{ExchangeBalance, MarketSummary, OrderRequest};

pub use bittrex::BittrexClient;

/// Read access to account balances and market prices.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Returns every balance on the account, including empty ones.
    async fn get_balances(&self) -> Result<Vec<ExchangeBalance>>;

    /// Returns the current summary for `pair`, e.g. `BTC-LTC`.
    async fn get_market_summary(&self, pair: &str) -> Result<MarketSummary>;
}

/// Places the order produced by a condition's execute step.
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    /// Submits `order` and returns the exchange-assigned order id.
    async fn place_order(&self, order: &OrderRequest) -> Result<String>;
}

/// Order placer that logs orders instead of submitting them.
#[derive(Debug, Default)]
pub struct DryRunOrders {
    placed: AtomicU64,
}

impl DryRunOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders "placed" so far.
    pub fn placed(&self) -> u64 {
        self.placed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderPlacer for DryRunOrders {
    async fn place_order(&self, order: &OrderRequest) -> Result<String> {
        let n = self.placed.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            market = %order.market,
            side = %order.side,
            quantity = %order.quantity,
            rate = %order.rate,
            "Dry run: order not submitted"
        );
        Ok(format!("dry-run-{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn dry_run_assigns_sequential_ids() {
        let orders = DryRunOrders::new();
        let order = OrderRequest::sell_limit("BTC-LTC", dec!(1), dec!(0.01));

        assert_eq!(orders.place_order(&order).await.unwrap(), "dry-run-1");
        assert_eq!(orders.place_order(&order).await.unwrap(), "dry-run-2");
        assert_eq!(orders.placed(), 2);
    }
}
