//! Deterministic proposer selection.
//!
//! The proposer for an (event, view) pair is a pure function of the round's
//! voting power snapshot, so every validator agrees on it without talking
//! and no single party can steer the choice.

use rust_decimal::Decimal;
use verinet_registry::VotingPower;
use verinet_types::{EventId, ProposerSelection, ValidatorId, crypto};

/// Select the proposer for `view`. `None` only if nobody is eligible.
#[must_use]
pub fn select_proposer(
    selection: ProposerSelection,
    power: &VotingPower,
    event_id: EventId,
    view: u32,
) -> Option<ValidatorId> {
    let members: Vec<ValidatorId> = power.ids().copied().collect();
    if members.is_empty() {
        return None;
    }
    match selection {
        ProposerSelection::RoundRobin => {
            let offset = seed(b"verinet:proposer_rr:v1:", event_id, 0);
            let len = members.len() as u64;
            let index = (offset % len + u64::from(view)) % len;
            usize::try_from(index).ok().map(|i| members[i])
        }
        ProposerSelection::StakeWeighted => {
            let total = power.total();
            if total <= Decimal::ZERO {
                return members.first().copied();
            }
            let draw = seed(b"verinet:proposer_sw:v1:", event_id, view);
            let point = total * Decimal::from(draw) / Decimal::from(u64::MAX);
            let mut cumulative = Decimal::ZERO;
            for id in &members {
                cumulative += power.power(id);
                if point < cumulative {
                    return Some(*id);
                }
            }
            members.last().copied()
        }
    }
}

fn seed(domain: &[u8], event_id: EventId, view: u32) -> u64 {
    let hash = crypto::digest(domain, &[event_id.0.as_bytes(), &view.to_le_bytes()]);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use verinet_types::{Category, PartyId, RegistryConfig, Validator};

    fn power(n: u8) -> VotingPower {
        let validators: Vec<Validator> = (1..=n)
            .map(|i| {
                let category = if i % 2 == 0 { Category::Government } else { Category::Academic };
                Validator::new(
                    ValidatorId([i; 32]),
                    PartyId::new(format!("op-{i}")),
                    category,
                    Decimal::from(10_000),
                    Decimal::ONE,
                )
            })
            .collect();
        VotingPower::from_validators(&RegistryConfig::default(), &validators)
    }

    #[test]
    fn selection_is_deterministic() {
        let vp = power(7);
        let event = EventId::from_bytes([3; 16]);
        for selection in [ProposerSelection::RoundRobin, ProposerSelection::StakeWeighted] {
            assert_eq!(
                select_proposer(selection, &vp, event, 2),
                select_proposer(selection, &vp, event, 2)
            );
        }
    }

    #[test]
    fn round_robin_rotates_through_every_member() {
        let vp = power(5);
        let event = EventId::from_bytes([9; 16]);
        let chosen: std::collections::BTreeSet<ValidatorId> = (0..5)
            .filter_map(|view| select_proposer(ProposerSelection::RoundRobin, &vp, event, view))
            .collect();
        assert_eq!(chosen.len(), 5);
    }

    #[test]
    fn consecutive_views_pick_different_proposers() {
        let vp = power(4);
        let event = EventId::from_bytes([1; 16]);
        let a = select_proposer(ProposerSelection::RoundRobin, &vp, event, 0);
        let b = select_proposer(ProposerSelection::RoundRobin, &vp, event, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn stake_weighted_favours_heavier_validators() {
        // Two government members hold 0.40 between them, two academic 0.10.
        let vp = power(4);
        let mut counts: BTreeMap<ValidatorId, u32> = BTreeMap::new();
        for i in 0..400u32 {
            let mut bytes = [0u8; 16];
            bytes[..4].copy_from_slice(&i.to_le_bytes());
            let id = select_proposer(ProposerSelection::StakeWeighted, &vp, EventId::from_bytes(bytes), 0)
                .unwrap();
            *counts.entry(id).or_default() += 1;
        }
        let government: u32 = [2u8, 4]
            .iter()
            .map(|i| counts.get(&ValidatorId([*i; 32])).copied().unwrap_or(0))
            .sum();
        assert!(government > 250, "government picked {government} of 400");
    }

    #[test]
    fn empty_set_has_no_proposer() {
        let vp = VotingPower::default();
        assert!(select_proposer(ProposerSelection::RoundRobin, &vp, EventId::new(), 0).is_none());
    }
}
