//! Order placement models.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("buy"),
            Self::Sell => f.write_str("sell"),
        }
    }
}

/// A limit order produced by a condition's execute step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderRequest {
    /// Exchange pair, e.g. `BTC-LTC`.
    pub market: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub rate: Decimal,
}

impl OrderRequest {
    pub fn sell_limit(market: &str, quantity: Decimal, rate: Decimal) -> Self {
        Self {
            market: market.to_string(),
            side: OrderSide::Sell,
            quantity,
            rate,
        }
    }
}
