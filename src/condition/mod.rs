//! Watch conditions: declarative definitions, the registry that names
//! them, and the engine that drives a session to its terminal action.
//!
//! - [`expr`] - the boolean expression language conditions are written in
//! - [`builtin`] - the `limit-sell`, `stop-loss` and `high-low` commands
//! - [`engine`] - the evaluate/update/execute state machine

pub mod builtin;
pub mod engine;
pub mod expr;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::OrderRequest;
use expr::ExpressionError;

pub use engine::{ConditionEngine, ExecutionReport, SessionContext, WatchSession};
pub use expr::Expression;

/// A single parameter value: either a number produced by an update step or
/// raw operator input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    // Text goes first: the float codec also accepts numeric strings.
    Text(String),
    Number(#[serde(with = "rust_decimal::serde::float")] Decimal),
}

impl Value {
    /// Returns the value as a decimal, parsing text if necessary.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => Decimal::from_str(text.trim()).ok(),
        }
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The named values a condition expression is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Looks up `key` as a decimal.
    ///
    /// # Errors
    ///
    /// [`ExpressionError::MissingParameter`] if absent,
    /// [`ExpressionError::NotNumeric`] if the value is not a number.
    pub fn decimal(&self, key: &str) -> Result<Decimal, ExpressionError> {
        let value = self
            .get(key)
            .ok_or_else(|| ExpressionError::MissingParameter(key.to_string()))?;
        value.as_decimal().ok_or_else(|| ExpressionError::NotNumeric {
            name: key.to_string(),
            value: match value {
                Value::Text(text) => text.clone(),
                Value::Number(number) => number.to_string(),
            },
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One value the operator must supply before a session can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPrompt {
    pub key: &'static str,
    pub prompt: &'static str,
}

/// Refreshes derived parameters from the latest market state.
pub type UpdateFn = fn(&SessionContext, &mut Parameters) -> crate::Result<()>;

/// Builds the order placed once the condition holds.
pub type ExecuteFn = fn(&SessionContext, &Parameters) -> crate::Result<OrderRequest>;

/// A named watch-trigger template.
#[derive(Debug, Clone)]
pub struct ConditionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    /// Source text in the [`expr`] language.
    pub expression: &'static str,
    pub inputs: &'static [InputPrompt],
    pub update: UpdateFn,
    pub execute: ExecuteFn,
}

/// Read-only lookup from command name to [`ConditionDefinition`].
///
/// Built once at startup and shared by reference; nothing mutates it
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct ConditionRegistry {
    definitions: BTreeMap<&'static str, Arc<ConditionDefinition>>,
}

impl ConditionRegistry {
    pub fn new(definitions: impl IntoIterator<Item = ConditionDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.name, Arc::new(d)))
                .collect(),
        }
    }

    /// Registry containing the built-in commands.
    pub fn builtin() -> Self {
        Self::new(builtin::definitions())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ConditionDefinition>> {
        self.definitions.get(name).cloned()
    }

    /// Like [`lookup`](Self::lookup) but reports unknown names as an error.
    pub fn require(&self, name: &str) -> crate::Result<Arc<ConditionDefinition>> {
        self.lookup(name)
            .ok_or_else(|| crate::TradeBotError::UnknownCommand(name.to_string()))
    }

    /// All definitions, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &ConditionDefinition> {
        self.definitions.values().map(|d| d.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.definitions.keys().copied().collect()
    }
}
