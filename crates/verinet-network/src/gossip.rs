//! In-process flood gossip.
//!
//! [`GossipNetwork`] owns one bounded `mpsc` inbox per joined peer. A
//! [`GossipSender`] signs a payload once and queues it on every other
//! inbox with `try_send`; a [`GossipPeer`] drains its inbox, authenticates
//! and deduplicates, and re-queues fresh envelopes for everyone except
//! itself and the origin.

use std::collections::HashMap;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use verinet_types::{ConsensusMessage, NetworkConfig, Result, ValidatorId, VerinetError, crypto};

use crate::envelope::MessageEnvelope;
use crate::keys::KeyDirectory;
use crate::seen::SeenCache;

/// Outcome of one fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Peers the envelope was queued for.
    pub sent: usize,
    /// Peers whose inbox was full or closed.
    pub failed: usize,
    /// Deliveries discarded by the configured loss rate.
    pub dropped: usize,
}

// =============================================================================
// Network hub
// =============================================================================

/// Registry of peer inboxes.
pub struct GossipNetwork {
    config: NetworkConfig,
    peers: RwLock<HashMap<ValidatorId, mpsc::Sender<MessageEnvelope>>>,
    keys: Arc<dyn KeyDirectory>,
}

impl GossipNetwork {
    #[must_use]
    pub fn new(config: NetworkConfig, keys: Arc<dyn KeyDirectory>) -> Arc<Self> {
        Arc::new(Self {
            config,
            peers: RwLock::new(HashMap::new()),
            keys,
        })
    }

    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Connect the holder of `key`. Rejoining replaces the previous inbox,
    /// which then closes.
    ///
    /// # Errors
    /// [`VerinetError::IdentityRejected`] if the key directory does not
    /// know the identity.
    pub fn join(self: &Arc<Self>, key: SigningKey) -> Result<GossipPeer> {
        let id = crypto::validator_id(&key);
        if self.keys.public_key(&id).is_none() {
            return Err(VerinetError::IdentityRejected {
                reason: format!("{id} is not a known network identity"),
            });
        }
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        if self.peers.write().insert(id, tx).is_some() {
            debug!(peer = %id, "Peer rejoined, previous inbox closed");
        }
        debug!(peer = %id, "Peer joined gossip network");
        Ok(GossipPeer {
            id,
            sender: GossipSender {
                network: Arc::clone(self),
                key,
                id,
            },
            inbox: rx,
            seen: SeenCache::new(self.config.seen_cache_size),
        })
    }

    /// Disconnect a peer. Its inbox closes once already-queued envelopes
    /// are drained.
    pub fn leave(&self, id: &ValidatorId) -> bool {
        let removed = self.peers.write().remove(id).is_some();
        if removed {
            debug!(peer = %id, "Peer left gossip network");
        }
        removed
    }

    #[must_use]
    pub fn is_member(&self, id: &ValidatorId) -> bool {
        self.peers.read().contains_key(id)
    }

    /// Connected peers, in no particular order.
    #[must_use]
    pub fn peers(&self) -> Vec<ValidatorId> {
        self.peers.read().keys().copied().collect()
    }

    /// Queue an envelope on a single peer's inbox, bypassing fan-out.
    /// Used for partial topologies and fault injection.
    ///
    /// # Errors
    /// - [`VerinetError::PeerNotFound`] if `to` is not connected.
    /// - [`VerinetError::ChannelClosed`] if its inbox is full or closed.
    pub fn send_raw(&self, to: &ValidatorId, envelope: MessageEnvelope) -> Result<()> {
        let tx = self
            .peers
            .read()
            .get(to)
            .cloned()
            .ok_or(VerinetError::PeerNotFound(*to))?;
        tx.try_send(envelope).map_err(|_| VerinetError::ChannelClosed)
    }

    fn fan_out(&self, envelope: &MessageEnvelope, exclude: &[ValidatorId]) -> BroadcastResult {
        // Clone the senders so no lock is held while queueing.
        let targets: Vec<(ValidatorId, mpsc::Sender<MessageEnvelope>)> = self
            .peers
            .read()
            .iter()
            .filter(|(id, _)| !exclude.contains(id))
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut result = BroadcastResult::default();
        let mut rng = rand::thread_rng();
        for (peer, tx) in targets {
            if self.config.loss_rate > 0.0 && rng.gen_bool(self.config.loss_rate) {
                result.dropped += 1;
                continue;
            }
            match tx.try_send(envelope.clone()) {
                Ok(()) => result.sent += 1,
                Err(err) => {
                    debug!(%peer, message = %envelope.id, error = %err, "Gossip delivery failed");
                    result.failed += 1;
                }
            }
        }
        result
    }
}

// =============================================================================
// Sender
// =============================================================================

/// Signs and broadcasts on behalf of one peer. Cheap to clone.
#[derive(Clone)]
pub struct GossipSender {
    network: Arc<GossipNetwork>,
    key: SigningKey,
    id: ValidatorId,
}

impl GossipSender {
    #[must_use]
    pub fn id(&self) -> ValidatorId {
        self.id
    }

    /// Sign `payload` and queue it for every other connected peer.
    ///
    /// # Errors
    /// - [`VerinetError::PeerNotFound`] if this peer has left the network.
    /// - [`VerinetError::Serialization`] if the payload cannot be signed.
    pub fn broadcast(&self, payload: ConsensusMessage) -> Result<BroadcastResult> {
        if !self.network.is_member(&self.id) {
            return Err(VerinetError::PeerNotFound(self.id));
        }
        let kind = payload.kind();
        let envelope = MessageEnvelope::sign(&self.key, payload)?;
        let result = self.network.fan_out(&envelope, &[self.id]);
        trace!(
            peer = %self.id,
            message = %envelope.id,
            kind,
            sent = result.sent,
            failed = result.failed,
            dropped = result.dropped,
            "Broadcast"
        );
        Ok(result)
    }
}

// =============================================================================
// Peer
// =============================================================================

/// One peer's end of the network: its inbox plus deduplication state.
pub struct GossipPeer {
    id: ValidatorId,
    sender: GossipSender,
    inbox: mpsc::Receiver<MessageEnvelope>,
    seen: SeenCache,
}

impl std::fmt::Debug for GossipPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipPeer")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl GossipPeer {
    #[must_use]
    pub fn id(&self) -> ValidatorId {
        self.id
    }

    #[must_use]
    pub fn sender(&self) -> GossipSender {
        self.sender.clone()
    }

    /// See [`GossipSender::broadcast`].
    pub fn broadcast(&self, payload: ConsensusMessage) -> Result<BroadcastResult> {
        self.sender.broadcast(payload)
    }

    /// Next authenticated, previously unseen message with its origin.
    /// Returns `None` once the peer has left and its inbox is drained.
    pub async fn recv(&mut self) -> Option<(ValidatorId, ConsensusMessage)> {
        loop {
            let envelope = self.inbox.recv().await?;
            if let Some(accepted) = self.accept(envelope) {
                return Some(accepted);
            }
        }
    }

    /// Deliver every received message to `handler` on a background task
    /// until the inbox closes.
    pub fn on_receive<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(ValidatorId, ConsensusMessage) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some((from, message)) = self.recv().await {
                handler(from, message);
            }
        })
    }

    fn accept(&mut self, envelope: MessageEnvelope) -> Option<(ValidatorId, ConsensusMessage)> {
        let network = &self.sender.network;
        let hop_limit = network.config.hop_limit;

        if envelope.origin == self.id {
            return None;
        }
        if envelope.hops >= hop_limit {
            debug!(peer = %self.id, message = %envelope.id, hops = envelope.hops, "Hop limit exceeded, dropping");
            return None;
        }
        let Some(public_key) = network.keys.public_key(&envelope.origin) else {
            warn!(peer = %self.id, origin = %envelope.origin, message = %envelope.id, "Unknown origin, dropping");
            return None;
        };
        if !envelope.verify(&public_key) {
            warn!(peer = %self.id, origin = %envelope.origin, message = %envelope.id, "Bad envelope signature, dropping");
            return None;
        }
        if !self.seen.insert(envelope.id) {
            return None;
        }

        if envelope.hops.saturating_add(1) < hop_limit {
            network.fan_out(&envelope.forwarded(), &[self.id, envelope.origin]);
        }
        Some((envelope.origin, envelope.payload))
    }
}
