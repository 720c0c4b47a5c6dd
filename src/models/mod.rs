//! Wire and storage models.
//!
//! Everything pushed to websocket clients travels inside an [`Envelope`]
//! so clients can dispatch on the `type` tag:
//!
//! ```json
//! {"type":"Balance","payload":[{"Currency":"BTC","Available":1.2,"Total":1.2}]}
//! ```

pub mod balance;
pub mod market;
pub mod order;
pub mod session;

use serde::{Deserialize, Serialize};

pub use balance::{Balance, ExchangeBalance};
pub use market::MarketSummary;
pub use order::{OrderRequest, OrderSide};
pub use session::{SessionRecord, SessionState};

/// An already-serialized message, shared by every connection it is sent to.
///
/// Cloning is a reference-count bump, so one broadcast never copies the
/// payload per connection.
pub type Payload = tungstenite::Utf8Bytes;

/// Tag identifying the payload carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// The full set of non-zero balances.
    Balance,
    /// Progress of one watch session.
    Session,
}

/// The `{"type": ..., "payload": ...}` wrapper used for every client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(kind: MessageKind, payload: T) -> Self {
        Self { kind, payload }
    }

    /// Serializes the envelope into a broadcast-ready payload.
    pub fn encode(&self) -> crate::Result<Payload> {
        Ok(serde_json::to_string(self)?.into())
    }
}

/// Builds the `Balance` message for a balance snapshot.
pub fn balance_message(balances: &[Balance]) -> crate::Result<Payload> {
    Envelope::new(MessageKind::Balance, balances).encode()
}

/// Builds the `Session` message for one session record.
pub fn session_message(record: &SessionRecord) -> crate::Result<Payload> {
    Envelope::new(MessageKind::Session, record).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn balance_message_matches_wire_format() {
        let balances = vec![Balance::new("BTC", dec!(2.5), dec!(2.5))];
        let payload = balance_message(&balances).unwrap();
        assert_eq!(
            payload.as_str(),
            r#"{"type":"Balance","payload":[{"Currency":"BTC","Available":2.5,"Total":2.5}]}"#
        );
    }

    #[test]
    fn empty_balance_message() {
        let payload = balance_message(&[]).unwrap();
        assert_eq!(payload.as_str(), r#"{"type":"Balance","payload":[]}"#);
    }

    #[test]
    fn envelope_tag_round_trips() {
        let value: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"type":"Session","payload":{"Id":3}}"#).unwrap();
        assert_eq!(value.kind, MessageKind::Session);
        assert_eq!(value.payload["Id"], 3);
    }
}
