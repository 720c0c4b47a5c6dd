//! Built-in watch commands.
//!
//! | command      | fires when                               | action                       |
//! |--------------|------------------------------------------|------------------------------|
//! | `limit-sell` | available balance reaches `SellLimit`    | sell `SellLimit` at `SellPrice` |
//! | `stop-loss`  | last price falls to `StopPrice`          | sell `Quantity` at the bid   |
//! | `high-low`   | last price leaves `LowPrice..HighPrice`  | sell `Quantity` at the bid   |

use rust_decimal::Decimal;
use tracing::debug;

use super::{ConditionDefinition, InputPrompt, Parameters, SessionContext};
use crate::TradeBotError;
use crate::models::OrderRequest;

pub fn definitions() -> Vec<ConditionDefinition> {
    vec![LIMIT_SELL, STOP_LOSS, HIGH_LOW]
}

pub const LIMIT_SELL: ConditionDefinition = ConditionDefinition {
    name: "limit-sell",
    description: "place a limit sell once the available balance covers the sell amount",
    expression: "Current >= Target",
    inputs: &[
        InputPrompt {
            key: "SellLimit",
            prompt: "Sell Limit (in coin units)",
        },
        InputPrompt {
            key: "SellPrice",
            prompt: "Sell Price (in base currency)",
        },
    ],
    update: limit_sell_update,
    execute: limit_sell_execute,
};

pub const STOP_LOSS: ConditionDefinition = ConditionDefinition {
    name: "stop-loss",
    description: "sell at the bid once the last price drops to the stop price",
    expression: "Current <= Target",
    inputs: &[
        InputPrompt {
            key: "StopPrice",
            prompt: "Stop Price (in base currency)",
        },
        InputPrompt {
            key: "Quantity",
            prompt: "Quantity to sell",
        },
    ],
    update: stop_loss_update,
    execute: sell_quantity_at_bid,
};

pub const HIGH_LOW: ConditionDefinition = ConditionDefinition {
    name: "high-low",
    description: "stop-loss and take-profit together, whichever bound is reached first",
    expression: "Current >= HighPrice || Current <= LowPrice",
    inputs: &[
        InputPrompt {
            key: "HighPrice",
            prompt: "High Price (in base currency)",
        },
        InputPrompt {
            key: "LowPrice",
            prompt: "Low Price (in base currency)",
        },
        InputPrompt {
            key: "Quantity",
            prompt: "Quantity to sell",
        },
    ],
    update: last_price_update,
    execute: sell_quantity_at_bid,
};

fn limit_sell_update(ctx: &SessionContext, params: &mut Parameters) -> crate::Result<()> {
    let target = params.decimal("SellLimit")?;
    params.set("Current", ctx.target.available);
    params.set("Target", target);
    debug!(
        currency = %ctx.currency,
        available = %ctx.target.available,
        target = %target,
        "limit-sell updated"
    );
    Ok(())
}

fn limit_sell_execute(ctx: &SessionContext, params: &Parameters) -> crate::Result<OrderRequest> {
    Ok(OrderRequest::sell_limit(
        &ctx.market,
        params.decimal("SellLimit")?,
        params.decimal("SellPrice")?,
    ))
}

fn stop_loss_update(ctx: &SessionContext, params: &mut Parameters) -> crate::Result<()> {
    let stop = params.decimal("StopPrice")?;
    last_price_update(ctx, params)?;
    params.set("Target", stop);
    Ok(())
}

fn last_price_update(ctx: &SessionContext, params: &mut Parameters) -> crate::Result<()> {
    let last = ctx.summary.last.ok_or_else(|| {
        TradeBotError::Exchange(format!("market {} has no last price", ctx.market))
    })?;
    params.set("Current", last);
    debug!(market = %ctx.market, last = %last, "last price updated");
    Ok(())
}

fn sell_quantity_at_bid(ctx: &SessionContext, params: &Parameters) -> crate::Result<OrderRequest> {
    let quantity = params.decimal("Quantity")?;
    let rate = ctx
        .summary
        .bid
        .or(ctx.summary.last)
        .filter(|rate| *rate > Decimal::ZERO)
        .ok_or_else(|| {
            TradeBotError::Exchange(format!("market {} has no bid to sell into", ctx.market))
        })?;
    Ok(OrderRequest::sell_limit(&ctx.market, quantity, rate))
}
