//! A whole network in one process: registry, gossip mesh, one
//! verification node and any number of validator agents.

use std::collections::HashMap;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::info;
use verinet_consensus::{ConsensusEngine, ProposalEvaluator, evaluator_for};
use verinet_evidence::TrustedSources;
use verinet_network::{GossipNetwork, GossipPeer, TrustedKeys};
use verinet_registry::{SharedRegistry, ValidatorRegistry};
use verinet_types::{Category, NodeConfig, PartyId, Result, Validator, ValidatorId, crypto};

use crate::agent::ValidatorAgent;
use crate::node::{NodeServices, VerificationNode};
use crate::shutdown::ShutdownController;

/// Who a validator is and what it puts at stake.
#[derive(Clone)]
pub struct ValidatorSpec {
    pub key: SigningKey,
    pub operator: PartyId,
    pub category: Category,
    pub stake: Decimal,
    pub reputation: Decimal,
}

impl ValidatorSpec {
    /// Starts at full reputation.
    #[must_use]
    pub fn new(key: SigningKey, operator: PartyId, category: Category, stake: Decimal) -> Self {
        Self {
            key,
            operator,
            category,
            stake,
            reputation: Decimal::ONE,
        }
    }

    #[must_use]
    pub fn id(&self) -> ValidatorId {
        crypto::validator_id(&self.key)
    }
}

pub struct LocalNetwork {
    node: VerificationNode,
    registry: SharedRegistry,
    keys: Arc<TrustedKeys>,
    network: Arc<GossipNetwork>,
    agents: HashMap<ValidatorId, JoinHandle<()>>,
    shutdown: ShutdownController,
}

impl LocalNetwork {
    /// Empty registry and mesh with the node already joined.
    ///
    /// # Errors
    /// Whatever [`VerificationNode::start`] refuses.
    pub fn start(
        config: NodeConfig,
        node_key: SigningKey,
        sources: TrustedSources,
        services: NodeServices,
    ) -> Result<Self> {
        let registry = ValidatorRegistry::shared(config.registry.clone());
        let keys = Arc::new(TrustedKeys::new(registry.clone()));
        keys.trust_node(crypto::validator_id(&node_key));
        let network = GossipNetwork::new(config.network.clone(), keys.clone());
        let node = VerificationNode::start(config, node_key, registry.clone(), &network, sources, services)?;
        Ok(Self {
            node,
            registry,
            keys,
            network,
            agents: HashMap::new(),
            shutdown: ShutdownController::new(),
        })
    }

    #[must_use]
    pub fn node(&self) -> &VerificationNode {
        &self.node
    }

    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    #[must_use]
    pub fn network(&self) -> &Arc<GossipNetwork> {
        &self.network
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<TrustedKeys> {
        &self.keys
    }

    /// Admit a validator through the node and run it as an agent that
    /// votes with the checks of its category.
    ///
    /// # Errors
    /// As [`VerificationNode::register_validator`], or a gossip join error.
    pub async fn add_validator(&mut self, spec: ValidatorSpec) -> Result<ValidatorId> {
        let evaluator = evaluator_for(spec.category, self.node.evidence_screen());
        self.add_validator_with(spec, evaluator).await
    }

    /// As [`LocalNetwork::add_validator`], voting with `evaluator`.
    ///
    /// # Errors
    /// As [`LocalNetwork::add_validator`].
    pub async fn add_validator_with(
        &mut self,
        spec: ValidatorSpec,
        evaluator: Arc<dyn ProposalEvaluator>,
    ) -> Result<ValidatorId> {
        let key = spec.key.clone();
        let peer = self.admit(spec).await?;
        let engine = ConsensusEngine::validator(
            self.node.config().consensus.clone(),
            self.registry.clone(),
            key,
            evaluator,
        )
        .with_submitters([self.node.id()]);
        let agent = ValidatorAgent::new(
            engine,
            peer,
            self.node.subscribe_to_ejections(),
            self.shutdown.subscribe(),
        );
        let id = agent.id();
        self.agents.insert(id, agent.spawn());
        Ok(id)
    }

    /// Admit a validator without an agent and hand its mesh endpoint to
    /// the caller, who speaks for it.
    ///
    /// # Errors
    /// As [`LocalNetwork::add_validator`].
    pub async fn add_external_validator(&mut self, spec: ValidatorSpec) -> Result<GossipPeer> {
        self.admit(spec).await
    }

    async fn admit(&self, spec: ValidatorSpec) -> Result<GossipPeer> {
        let validator = Validator::new(spec.id(), spec.operator, spec.category, spec.stake, spec.reputation);
        self.node.register_validator(validator).await?;
        self.network.join(spec.key)
    }

    /// Kill a validator's agent and take it off the mesh, as a crash would.
    pub fn crash(&mut self, id: &ValidatorId) -> bool {
        let Some(agent) = self.agents.remove(id) else {
            return false;
        };
        agent.abort();
        self.network.leave(id);
        info!(validator = %id, "Validator crashed");
        true
    }

    #[must_use]
    pub fn running_agents(&self) -> usize {
        self.agents.len()
    }

    /// Stop every agent, then the node.
    pub async fn shutdown(self) {
        self.shutdown.shutdown();
        for (_, agent) in self.agents {
            let _ = agent.await;
        }
        self.node.shutdown().await;
    }
}
