use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market summary for one trading pair, e.g. `BTC-LTC`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketSummary {
    #[serde(default, alias = "MarketName")]
    pub market: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub high: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub low: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub last: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub volume: Option<Decimal>,
}

/// Exchange pair name for `currency` priced in `base` (`BTC-LTC`).
pub fn pair(base: &str, currency: &str) -> String {
    format!("{}-{}", base.to_uppercase(), currency.to_uppercase())
}
