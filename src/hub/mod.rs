//! Broadcast hub: subscriber registry, per-mint rooms, cross-process fan-out

use crate::core::{PriceSnapshot, PulseError, PulseResult, PRICE_UPDATE_CHANNEL};
use crate::pricing::PricingEngine;
use crate::scheduler::Scheduler;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wrap an event name and payload into one outbound frame
pub fn frame(event: &str, data: serde_json::Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

fn room_name(mint: &str) -> String {
    format!("token:{}", mint)
}

struct ConnectionState {
    tx: mpsc::UnboundedSender<String>,
    subscriptions: HashSet<String>,
}

/// Pure registry state: connections, their subscription sets, and rooms.
///
/// Each (connection, mint) pair appears at most once; room membership is
/// kept in lockstep with the subscription sets.
#[derive(Default)]
struct Registry {
    connections: HashMap<Uuid, ConnectionState>,
    rooms: HashMap<String, HashSet<Uuid>>,
}

enum SubscribeOutcome {
    Added { total: usize },
    AlreadySubscribed,
    UnknownConnection,
}

impl Registry {
    fn register(&mut self, id: Uuid, tx: mpsc::UnboundedSender<String>) {
        self.connections.insert(
            id,
            ConnectionState {
                tx,
                subscriptions: HashSet::new(),
            },
        );
    }

    /// Drop the connection record and leave every room it was in
    fn unregister(&mut self, id: Uuid) -> usize {
        let Some(state) = self.connections.remove(&id) else {
            return 0;
        };
        for mint in &state.subscriptions {
            let room = room_name(mint);
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
        state.subscriptions.len()
    }

    fn subscribe(&mut self, id: Uuid, mint: &str) -> SubscribeOutcome {
        let Some(state) = self.connections.get_mut(&id) else {
            return SubscribeOutcome::UnknownConnection;
        };
        if !state.subscriptions.insert(mint.to_string()) {
            return SubscribeOutcome::AlreadySubscribed;
        }
        self.rooms.entry(room_name(mint)).or_default().insert(id);
        SubscribeOutcome::Added {
            total: state.subscriptions.len(),
        }
    }

    /// Idempotent removal; returns the remaining subscription count
    fn unsubscribe(&mut self, id: Uuid, mint: &str) -> usize {
        let Some(state) = self.connections.get_mut(&id) else {
            return 0;
        };
        if state.subscriptions.remove(mint) {
            let room = room_name(mint);
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
        state.subscriptions.len()
    }

    /// Sender handles for every member of a mint's room
    fn room_senders(&self, mint: &str) -> Vec<mpsc::UnboundedSender<String>> {
        self.rooms
            .get(&room_name(mint))
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| self.connections.get(id))
                    .map(|state| state.tx.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sender(&self, id: Uuid) -> Option<mpsc::UnboundedSender<String>> {
        self.connections.get(&id).map(|state| state.tx.clone())
    }

    fn total_subscriptions(&self) -> usize {
        self.connections
            .values()
            .map(|state| state.subscriptions.len())
            .sum()
    }
}

pub struct BroadcastHub {
    registry: RwLock<Registry>,
    engine: Arc<PricingEngine>,
    scheduler: Arc<Scheduler>,
}

impl BroadcastHub {
    pub fn new(engine: Arc<PricingEngine>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            engine,
            scheduler,
        }
    }

    /// Attach the hub to the price_update channel.
    ///
    /// One subscription per process: every received snapshot fans out to the
    /// members of its mint's room and nobody else.
    pub fn start(self: Arc<Self>, cache: &crate::cache::RedisCache) {
        let mut rx = cache.subscribe(PRICE_UPDATE_CHANNEL);
        let hub = self;

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let snapshot: PriceSnapshot = match serde_json::from_str(&payload) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(error = %e, "undecodable price_update payload");
                        continue;
                    }
                };
                hub.fan_out(&snapshot).await;
            }
            info!("price_update listener ended");
        });
    }

    async fn fan_out(&self, snapshot: &PriceSnapshot) {
        let senders = {
            let registry = self.registry.read().await;
            registry.room_senders(&snapshot.mint)
        };
        if senders.is_empty() {
            return;
        }

        let message = frame(
            "price_update",
            serde_json::to_value(snapshot).unwrap_or_default(),
        );
        for tx in senders {
            // Closed receivers are cleaned up by their socket task.
            let _ = tx.send(message.clone());
        }
    }

    /// Register a new connection and emit the hello frame
    pub async fn register(&self, id: Uuid, tx: mpsc::UnboundedSender<String>) {
        let hello = frame(
            "connected",
            json!({
                "socketId": id.to_string(),
                "message": "connected to price stream",
                "usage": "send \"<mint>,subscribe\" or \"<mint>,unsubscribe\"",
            }),
        );
        let _ = tx.send(hello);

        let mut registry = self.registry.write().await;
        registry.register(id, tx);
        crate::metrics::global()
            .connected_clients
            .set(registry.connections.len() as i64);
    }

    /// Tear down a connection, releasing all its (connection, mint) pairs
    pub async fn disconnect(&self, id: Uuid) {
        let mut registry = self.registry.write().await;
        let released = registry.unregister(id);
        crate::metrics::global()
            .connected_clients
            .set(registry.connections.len() as i64);
        crate::metrics::global()
            .subscriptions
            .set(registry.total_subscriptions() as i64);
        debug!(connection = %id, released, "connection closed");
    }

    async fn send_to(&self, id: Uuid, message: String) {
        let sender = {
            let registry = self.registry.read().await;
            registry.sender(id)
        };
        if let Some(tx) = sender {
            let _ = tx.send(message);
        }
    }

    /// Handle `"<mint>,subscribe"` for one connection
    pub async fn subscribe(&self, id: Uuid, mint: &str) {
        match self.admit(mint).await {
            Ok(()) => {}
            Err(PulseError::InvalidMint { reason }) => {
                self.send_to(
                    id,
                    frame(
                        "subscription_error",
                        json!({
                            "mint": mint,
                            "message": reason,
                            "code": "INVALID_TOKEN_MINT",
                        }),
                    ),
                )
                .await;
                return;
            }
            Err(e) => {
                self.send_to(id, frame("error", json!({ "message": e.to_string() })))
                    .await;
                return;
            }
        }

        let outcome = {
            let mut registry = self.registry.write().await;
            let outcome = registry.subscribe(id, mint);
            crate::metrics::global()
                .subscriptions
                .set(registry.total_subscriptions() as i64);
            outcome
        };

        let total = match outcome {
            SubscribeOutcome::UnknownConnection => return,
            SubscribeOutcome::AlreadySubscribed => {
                self.send_to(
                    id,
                    frame(
                        "subscription_status",
                        json!({ "mint": mint, "status": "already_subscribed" }),
                    ),
                )
                .await;
                return;
            }
            SubscribeOutcome::Added { total } => total,
        };

        // Unknown mints get one synchronous refresh so the subscriber sees a
        // snapshot right away; polling continues through the scheduler.
        let mut latest = self.engine.current_of(mint).await.unwrap_or(None);
        if latest.is_none() {
            match self.engine.update_mint(mint).await {
                Ok(snapshot) => latest = Some(snapshot),
                Err(e) => debug!(mint, error = %e, "initial update failed"),
            }
        }

        if let Err(e) = self.scheduler.enrol(mint).await {
            debug!(mint, error = %e, "enrol on subscribe failed");
        }

        if let Some(snapshot) = latest {
            self.send_to(
                id,
                frame(
                    "price_update",
                    serde_json::to_value(&snapshot).unwrap_or_default(),
                ),
            )
            .await;
        }
        self.send_to(
            id,
            frame(
                "subscription_success",
                json!({ "mint": mint, "totalSubscriptions": total }),
            ),
        )
        .await;
    }

    /// Validation gate for subscriptions: the ban list wins, then the
    /// ordinary validator pipeline.
    async fn admit(&self, mint: &str) -> PulseResult<()> {
        if self.scheduler.is_banned(mint).await {
            return Err(PulseError::invalid_mint("mint is banned"));
        }
        self.engine.validator().validate(mint).await
    }

    /// Handle `"<mint>,unsubscribe"` for one connection
    pub async fn unsubscribe(&self, id: Uuid, mint: &str) {
        let total = {
            let mut registry = self.registry.write().await;
            let total = registry.unsubscribe(id, mint);
            crate::metrics::global()
                .subscriptions
                .set(registry.total_subscriptions() as i64);
            total
        };

        self.send_to(
            id,
            frame(
                "unsubscription_success",
                json!({ "mint": mint, "totalSubscriptions": total }),
            ),
        )
        .await;
    }

    /// Malformed inbound frames get an error without disturbing the
    /// connection's other subscriptions
    pub async fn reject_message(&self, id: Uuid, detail: &str) {
        self.send_to(id, frame("error", json!({ "message": detail })))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn subscribe_joins_room_once() {
        let mut registry = Registry::default();
        let id = Uuid::new_v4();
        let (tx, _rx) = channel();
        registry.register(id, tx);

        assert!(matches!(
            registry.subscribe(id, "m1"),
            SubscribeOutcome::Added { total: 1 }
        ));
        assert!(matches!(
            registry.subscribe(id, "m1"),
            SubscribeOutcome::AlreadySubscribed
        ));
        assert_eq!(registry.room_senders("m1").len(), 1);
    }

    #[test]
    fn fan_out_is_isolated_per_room() {
        let mut registry = Registry::default();
        let (c1, c2, c3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (tx3, mut rx3) = channel();
        registry.register(c1, tx1);
        registry.register(c2, tx2);
        registry.register(c3, tx3);

        registry.subscribe(c1, "m1");
        registry.subscribe(c2, "m1");
        registry.subscribe(c3, "m2");

        for tx in registry.room_senders("m1") {
            tx.send("snapshot".to_string()).unwrap();
        }

        assert_eq!(rx1.try_recv().unwrap(), "snapshot");
        assert_eq!(rx2.try_recv().unwrap(), "snapshot");
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_leaves_room() {
        let mut registry = Registry::default();
        let id = Uuid::new_v4();
        let (tx, _rx) = channel();
        registry.register(id, tx);

        registry.subscribe(id, "m1");
        registry.subscribe(id, "m2");
        assert_eq!(registry.unsubscribe(id, "m1"), 1);
        assert_eq!(registry.unsubscribe(id, "m1"), 1);
        assert!(registry.room_senders("m1").is_empty());
        assert_eq!(registry.room_senders("m2").len(), 1);
    }

    #[test]
    fn disconnect_releases_all_pairs() {
        let mut registry = Registry::default();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.register(c1, tx1);
        registry.register(c2, tx2);

        registry.subscribe(c1, "m1");
        registry.subscribe(c1, "m2");
        registry.subscribe(c2, "m1");

        assert_eq!(registry.unregister(c1), 2);
        assert_eq!(registry.room_senders("m1").len(), 1);
        assert!(registry.room_senders("m2").is_empty());
        assert_eq!(registry.total_subscriptions(), 1);
    }

    #[test]
    fn frames_carry_event_envelope() {
        let message = frame("subscription_success", json!({ "mint": "m1" }));
        let parsed: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["event"], "subscription_success");
        assert_eq!(parsed["data"]["mint"], "m1");
    }
}
