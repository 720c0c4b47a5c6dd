//! Watch session state machine.
//!
//! ```text
//! Initializing -> Updating -> Evaluating -(false)-> Updating -> sleep -> Evaluating ...
//!                                   |-(true)--> Executed
//!                                   `-(error)-> Failed
//! ```
//!
//! The first evaluation only happens after one unconditional update, so
//! derived parameters exist even for conditions that are true from the
//! start.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ConditionDefinition, Expression, Parameters};
use crate::config::WatchConfig;
use crate::exchange::{MarketDataProvider, OrderPlacer};
use crate::models::balance::{self, Balance};
use crate::models::market::{self, MarketSummary};
use crate::models::{OrderRequest, SessionRecord, SessionState};
use crate::{Result, TradeBotError};

/// Market state visible to a condition's update and execute steps.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub currency: String,
    /// Exchange pair the currency trades on, e.g. `BTC-LTC`.
    pub market: String,
    pub target: Balance,
    pub base: Balance,
    pub quote: Balance,
    pub summary: MarketSummary,
}

impl SessionContext {
    /// Replaces the balance snapshots with entries from a fresh refresh.
    ///
    /// Currencies missing from `balances` are treated as empty.
    fn refresh_balances(&mut self, balances: &[Balance]) {
        let lookup = |currency: &str| {
            balance::find(balances, currency)
                .cloned()
                .unwrap_or_else(|| Balance::empty(currency))
        };
        self.target = lookup(&self.target.currency);
        self.base = lookup(&self.base.currency);
        self.quote = lookup(&self.quote.currency);
    }
}

/// One live instantiation of a [`ConditionDefinition`].
#[derive(Debug)]
pub struct WatchSession {
    id: u64,
    definition: Arc<ConditionDefinition>,
    context: SessionContext,
    params: Parameters,
    state: SessionState,
    order_id: Option<String>,
    error: Option<String>,
}

impl WatchSession {
    /// Creates a session watching `currency`.
    ///
    /// # Errors
    ///
    /// Returns [`TradeBotError::Session`] if the account holds none of
    /// `currency` or an input required by the definition is missing.
    pub fn new(
        id: u64,
        definition: Arc<ConditionDefinition>,
        currency: &str,
        balances: &[Balance],
        inputs: Parameters,
        watch: &WatchConfig,
    ) -> Result<Self> {
        let currency = currency.to_uppercase();
        let target = balance::find(balances, &currency)
            .cloned()
            .ok_or_else(|| TradeBotError::Session(format!("currency {currency} not available")))?;

        for input in definition.inputs {
            if !inputs.contains(input.key) {
                return Err(TradeBotError::Session(format!(
                    "{} requires input {} ({})",
                    definition.name, input.key, input.prompt
                )));
            }
        }

        let market = market::pair(&watch.base_currency, &currency);
        let context = SessionContext {
            base: balance::find(balances, &watch.base_currency)
                .cloned()
                .unwrap_or_else(|| Balance::empty(&watch.base_currency)),
            quote: balance::find(balances, &watch.quote_currency)
                .cloned()
                .unwrap_or_else(|| Balance::empty(&watch.quote_currency)),
            summary: MarketSummary {
                market: market.clone(),
                ..MarketSummary::default()
            },
            currency,
            market,
            target,
        };

        Ok(Self {
            id,
            definition,
            context,
            params: inputs,
            state: SessionState::Initializing,
            order_id: None,
            error: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn definition(&self) -> &ConditionDefinition {
        &self.definition
    }

    /// Snapshot suitable for persisting and broadcasting.
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            command: self.definition.name.to_string(),
            currency: self.context.currency.clone(),
            state: self.state,
            parameters: self.params.clone(),
            order_id: self.order_id.clone(),
            error: self.error.clone(),
            updated_at: unix_millis(),
        }
    }
}

/// Result of a session that reached `Executed`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub order: OrderRequest,
    pub order_id: String,
    /// Parameters as they were when the condition held.
    pub parameters: Parameters,
}

/// Drives watch sessions against a market data provider.
pub struct ConditionEngine {
    provider: Arc<dyn MarketDataProvider>,
    orders: Arc<dyn OrderPlacer>,
    refresh_interval: Duration,
    updates: Option<mpsc::UnboundedSender<SessionRecord>>,
}

impl ConditionEngine {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        orders: Arc<dyn OrderPlacer>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            provider,
            orders,
            refresh_interval,
            updates: None,
        }
    }

    /// Sends a [`SessionRecord`] on every state change.
    #[must_use]
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<SessionRecord>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Runs `session` until its condition holds or an error occurs.
    ///
    /// The execute step runs at most once per session; calling `run` on a
    /// finished session returns an error without touching it.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the session to `Failed`: an expression
    /// error, an upstream data error from an update, or an order placement
    /// failure.
    pub async fn run(&self, session: &mut WatchSession) -> Result<ExecutionReport> {
        if session.state.is_terminal() {
            return Err(TradeBotError::Session(format!(
                "session {} already finished ({:?})",
                session.id, session.state
            )));
        }

        info!(
            session = session.id,
            command = session.definition.name,
            currency = %session.context.currency,
            "Watch session started"
        );

        match self.drive(session).await {
            Ok(report) => {
                session.order_id = Some(report.order_id.clone());
                self.transition(session, SessionState::Executed);
                info!(
                    session = session.id,
                    order_id = %report.order_id,
                    "Watch session executed"
                );
                Ok(report)
            }
            Err(e) => {
                session.error = Some(e.to_string());
                self.transition(session, SessionState::Failed);
                warn!(session = session.id, error = %e, "Watch session failed");
                Err(e)
            }
        }
    }

    async fn drive(&self, session: &mut WatchSession) -> Result<ExecutionReport> {
        self.update(session).await?;
        let expression = Expression::parse(session.definition.expression)?;

        loop {
            self.transition(session, SessionState::Evaluating);
            let met = expression.evaluate(&session.params)?;
            debug!(session = session.id, met, "Condition evaluated");

            if met {
                return self.execute(session).await;
            }

            self.update(session).await?;
            tokio::time::sleep(self.refresh_interval).await;
        }
    }

    /// Refreshes balances and the market summary, then runs the update step.
    async fn update(&self, session: &mut WatchSession) -> Result<()> {
        self.transition(session, SessionState::Updating);

        let balances = balance::normalize(self.provider.get_balances().await?);
        let summary = self
            .provider
            .get_market_summary(&session.context.market)
            .await?;

        session.context.refresh_balances(&balances);
        session.context.summary = summary;
        (session.definition.update)(&session.context, &mut session.params)
    }

    async fn execute(&self, session: &mut WatchSession) -> Result<ExecutionReport> {
        let order = (session.definition.execute)(&session.context, &session.params)?;
        let order_id = self.orders.place_order(&order).await?;

        Ok(ExecutionReport {
            order,
            order_id,
            parameters: session.params.clone(),
        })
    }

    fn transition(&self, session: &mut WatchSession, state: SessionState) {
        session.state = state;
        if let Some(updates) = &self.updates {
            // A dropped receiver only means nobody is watching progress.
            let _ = updates.send(session.record());
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
