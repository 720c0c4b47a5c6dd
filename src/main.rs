use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tradebot::condition::{ConditionEngine, ConditionRegistry, Parameters, WatchSession};
use tradebot::config::{AppConfig, fetch_config};
use tradebot::exchange::{BittrexClient, DryRunOrders, OrderPlacer};
use tradebot::hub::{Hub, HubHandle};
use tradebot::publisher::StatePublisher;
use tradebot::socket::server::Server;
use tradebot::store::Store;
use tradebot::Result;

#[derive(Parser)]
#[command(name = "tradebot")]
#[command(about = "Bittrex balance broadcaster and conditional order watcher")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve balance updates to websocket clients
    Serve,
    /// Watch a currency and place an order once a condition holds
    Watch {
        /// Condition to run, see `commands`
        command: String,
        /// Currency to watch, e.g. LTC
        currency: String,
        /// Condition input as KEY=VALUE (repeatable)
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,
        /// Log the order instead of submitting it
        #[arg(long)]
        dry_run: bool,
    },
    /// List the available conditions and their inputs
    Commands,
    /// Fetch and print current balances
    Balances,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args.command).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<()> {
    let registry = ConditionRegistry::builtin();
    if let Command::Commands = command {
        print_commands(&registry);
        return Ok(());
    }

    let config = fetch_config()?;
    let client = Arc::new(BittrexClient::new(&config.exchange)?);
    let store = Arc::new(Store::open(&config.store_path).await?);
    let hub = Hub::spawn();
    let publisher = Arc::new(StatePublisher::new(client.clone(), store, hub.clone()));

    let balances = publisher.refresh_balances().await?;
    info!(currencies = balances.len(), "Initial balances loaded");

    match command {
        Command::Balances => {
            for balance in &balances {
                println!(
                    "{:<8} available {:>18} total {:>18}",
                    balance.currency, balance.available, balance.total
                );
            }
            Ok(())
        }
        Command::Serve => {
            start_background(&config, hub, publisher).await?;
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            Ok(())
        }
        Command::Watch {
            command,
            currency,
            inputs,
            dry_run,
        } => {
            let definition = registry.require(&command)?;
            let orders: Arc<dyn OrderPlacer> = if dry_run {
                Arc::new(DryRunOrders::new())
            } else {
                client.clone()
            };

            start_background(&config, hub, publisher.clone()).await?;

            let id = publisher.store().next_session_id().await;
            let inputs: Parameters = inputs
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect();
            let mut session =
                WatchSession::new(id, definition, &currency, &balances, inputs, &config.watch)?;
            publisher.publish_session(&session.record()).await?;

            let (updates_tx, updates_rx) = mpsc::unbounded_channel();
            let engine = ConditionEngine::new(client, orders, config.watch.refresh_interval)
                .with_updates(updates_tx);
            let forwarder = {
                let publisher = publisher.clone();
                tokio::spawn(async move { publisher.forward_sessions(updates_rx).await })
            };

            let result = tokio::select! {
                result = engine.run(&mut session) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!(session = id, "Interrupted");
                    return Ok(());
                }
            };
            drop(engine);
            let _ = forwarder.await;

            let report = result?;
            println!(
                "{} {} {} @ {} placed as {}",
                report.order.side,
                report.order.quantity,
                report.order.market,
                report.order.rate,
                report.order_id
            );
            Ok(())
        }
        Command::Commands => Ok(()),
    }
}

/// Starts the websocket server and the periodic balance refresh.
async fn start_background(
    config: &AppConfig,
    hub: HubHandle,
    publisher: Arc<StatePublisher>,
) -> Result<()> {
    let server = Server::bind(config.server.listen_addr, config.server.pump.clone()).await?;
    info!(addr = %server.local_addr()?, "Websocket server bound");
    tokio::spawn(server.run(hub, publisher.clone()));
    tokio::spawn(publisher.run_refresh_loop(config.watch.refresh_interval));
    Ok(())
}

fn print_commands(registry: &ConditionRegistry) {
    for definition in registry.iter() {
        println!("{:<12} {}", definition.name, definition.description);
        println!("{:<12} when {}", "", definition.expression);
        for input in definition.inputs {
            println!("{:<12} -i {}=<{}>", "", input.key, input.prompt);
        }
    }
}

fn parse_input(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
