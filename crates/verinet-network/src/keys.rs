//! Which identities may speak on the gossip network.

use std::collections::HashSet;

use parking_lot::RwLock;
use verinet_registry::SharedRegistry;
use verinet_types::ValidatorId;

/// Resolves a message origin to the key its envelopes must verify under.
pub trait KeyDirectory: Send + Sync {
    /// `None` if the origin is not allowed on the network.
    fn public_key(&self, origin: &ValidatorId) -> Option<[u8; 32]>;
}

/// Registered validators (ejected ones included, so votes they already
/// cast still propagate) plus explicitly trusted non-voting nodes such as
/// submission gateways.
pub struct TrustedKeys {
    registry: SharedRegistry,
    nodes: RwLock<HashSet<ValidatorId>>,
}

impl TrustedKeys {
    #[must_use]
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            nodes: RwLock::new(HashSet::new()),
        }
    }

    /// Admit a non-voting node.
    pub fn trust_node(&self, id: ValidatorId) {
        self.nodes.write().insert(id);
    }

    pub fn distrust_node(&self, id: &ValidatorId) {
        self.nodes.write().remove(id);
    }
}

impl KeyDirectory for TrustedKeys {
    fn public_key(&self, origin: &ValidatorId) -> Option<[u8; 32]> {
        if self.nodes.read().contains(origin) {
            return Some(*origin.as_bytes());
        }
        self.registry.read().public_key(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use verinet_registry::ValidatorRegistry;
    use verinet_types::{Category, PartyId, RegistryConfig, Validator};

    #[test]
    fn registered_and_trusted_nodes_resolve() {
        let registry = ValidatorRegistry::shared(RegistryConfig::default());
        let validator = ValidatorId([1; 32]);
        registry
            .write()
            .register(Validator::new(
                validator,
                PartyId::new("ministry"),
                Category::Government,
                Decimal::from(10_000),
                Decimal::ONE,
            ))
            .unwrap();
        let keys = TrustedKeys::new(registry.clone());
        assert_eq!(keys.public_key(&validator), Some([1; 32]));

        let gateway = ValidatorId([2; 32]);
        assert!(keys.public_key(&gateway).is_none());
        keys.trust_node(gateway);
        assert_eq!(keys.public_key(&gateway), Some([2; 32]));
        keys.distrust_node(&gateway);
        assert!(keys.public_key(&gateway).is_none());

        registry.write().eject(&validator).unwrap();
        assert!(keys.public_key(&validator).is_some());
    }
}
