//! Broadcast hub.
//!
//! The [`Hub`] owns the set of live connections and is the only task that
//! touches it. Everything else talks to it through a cloneable
//! [`HubHandle`], which sends commands into an unbounded queue processed
//! strictly in order.
//!
//! The hub also retains the latest balance snapshot. A newly registered
//! connection gets it as its first message, queued by the actor itself, so
//! no broadcast can overtake it.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::models::Payload;
use crate::socket::{ConnectionId, Delivery, PumpHandle};
use crate::{Result, TradeBotError};

enum HubCommand {
    Register {
        pump: PumpHandle,
        /// Sent first when nothing has been retained yet.
        greeting: Option<Payload>,
    },
    Unregister(ConnectionId),
    Broadcast {
        payload: Payload,
        retain: bool,
    },
    ConnectionCount(oneshot::Sender<usize>),
}

/// Cloneable entry point to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Adds a connection to the live set.
    ///
    /// A broadcast issued after this call reaches the connection.
    pub fn register(&self, pump: PumpHandle) -> Result<()> {
        self.submit(HubCommand::Register {
            pump,
            greeting: None,
        })
    }

    /// Adds a connection and queues the retained snapshot for it, or
    /// `fallback` if nothing has been retained yet.
    pub fn register_with_snapshot(
        &self,
        pump: PumpHandle,
        fallback: Option<Payload>,
    ) -> Result<()> {
        self.submit(HubCommand::Register {
            pump,
            greeting: fallback,
        })
    }

    /// Removes a connection and closes its queue. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) -> Result<()> {
        self.submit(HubCommand::Unregister(id))
    }

    /// Sends `payload` to every connection live when the command is processed.
    pub fn broadcast(&self, payload: Payload) -> Result<()> {
        self.submit(HubCommand::Broadcast {
            payload,
            retain: false,
        })
    }

    /// Like [`broadcast`](Self::broadcast), and keeps `payload` as the
    /// snapshot for connections registered later.
    pub fn broadcast_retained(&self, payload: Payload) -> Result<()> {
        self.submit(HubCommand::Broadcast {
            payload,
            retain: true,
        })
    }

    /// Number of live connections once every earlier command has been handled.
    pub async fn connection_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubCommand::ConnectionCount(tx))?;
        rx.await.map_err(|_| TradeBotError::HubClosed)
    }

    fn submit(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TradeBotError::HubClosed)
    }
}

/// Actor owning the live connection set.
pub struct Hub {
    pumps: BTreeMap<ConnectionId, PumpHandle>,
    retained: Option<Payload>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            pumps: BTreeMap::new(),
            retained: None,
            commands: rx,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Starts the actor on the current runtime.
    pub fn spawn() -> HubHandle {
        let (hub, handle) = Self::new();
        tokio::spawn(hub.run());
        handle
    }

    /// Processes commands until every [`HubHandle`] is dropped, then closes
    /// all remaining connections.
    pub async fn run(mut self) {
        info!("Broadcast hub started");

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { pump, greeting } => {
                    let id = pump.id();
                    if let Some(first) = self.retained.clone().or(greeting)
                        && pump.send(first).await != Delivery::Queued
                    {
                        debug!(connection = %id, "Connection closed before snapshot");
                        continue;
                    }
                    if self.pumps.insert(id, pump).is_some() {
                        warn!(connection = %id, "Connection registered twice");
                    }
                    debug!(connection = %id, live = self.pumps.len(), "Registered connection");
                }
                HubCommand::Unregister(id) => self.remove(id).await,
                HubCommand::Broadcast { payload, retain } => {
                    if retain {
                        self.retained = Some(payload.clone());
                    }
                    self.broadcast(payload).await;
                }
                HubCommand::ConnectionCount(reply) => {
                    let _ = reply.send(self.pumps.len());
                }
            }
        }

        for pump in std::mem::take(&mut self.pumps).into_values() {
            pump.close().await;
        }
        info!("Broadcast hub stopped");
    }

    async fn broadcast(&mut self, payload: Payload) {
        let mut dropped = Vec::new();

        for (id, pump) in &self.pumps {
            match pump.send(payload.clone()).await {
                Delivery::Queued => {}
                Delivery::Full => {
                    warn!(connection = %id, "Outbound queue full, disconnecting");
                    dropped.push(*id);
                }
                Delivery::Closed => dropped.push(*id),
            }
        }

        for id in dropped {
            self.remove(id).await;
        }
        debug!(live = self.pumps.len(), "Broadcast delivered");
    }

    async fn remove(&mut self, id: ConnectionId) {
        if let Some(pump) = self.pumps.remove(&id) {
            pump.close().await;
            debug!(connection = %id, live = self.pumps.len(), "Unregistered connection");
        }
    }
}
