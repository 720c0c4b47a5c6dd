//! Balance models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance snapshot for one currency, taken at a single refresh tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Balance {
    /// Uppercased exchange symbol (e.g. "BTC").
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub available: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

impl Balance {
    pub fn new(currency: &str, available: Decimal, total: Decimal) -> Self {
        Self {
            currency: currency.to_uppercase(),
            available,
            total,
        }
    }

    /// A zero balance, used when the account holds none of `currency`.
    pub fn empty(currency: &str) -> Self {
        Self::new(currency, Decimal::ZERO, Decimal::ZERO)
    }
}

/// Balance entry as returned by the exchange's `getbalances` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeBalance {
    pub currency: String,
    #[serde(default)]
    pub available: Option<Decimal>,
    /// Total balance, including amounts reserved by open orders.
    #[serde(default)]
    pub balance: Option<Decimal>,
}

/// Converts raw exchange balances into [`Balance`] snapshots.
///
/// Entries with a zero (or missing) total are dropped and currency codes
/// are uppercased.
pub fn normalize(raw: Vec<ExchangeBalance>) -> Vec<Balance> {
    raw.into_iter()
        .filter_map(|b| {
            let total = b.balance.unwrap_or_default();
            if total <= Decimal::ZERO {
                return None;
            }
            Some(Balance::new(
                &b.currency,
                b.available.unwrap_or_default(),
                total,
            ))
        })
        .collect()
}

/// Finds the balance for `currency`, if the account holds any.
pub fn find<'a>(balances: &'a [Balance], currency: &str) -> Option<&'a Balance> {
    balances
        .iter()
        .find(|b| b.currency.eq_ignore_ascii_case(currency))
}
