//! Trading assistant for the Bittrex exchange.
//!
//! Keeps account balances in sync with the exchange, pushes every change to
//! websocket clients through a broadcast [`hub`], and runs watch sessions
//! that place an order once a [`condition`] holds.

pub mod condition;
pub mod config;
pub mod error;
pub mod exchange;
pub mod hub;
pub mod models;
pub mod publisher;
pub mod socket;
pub mod store;

pub use error::{Result, TradeBotError};
