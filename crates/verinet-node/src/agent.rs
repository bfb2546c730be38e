//! A validator running as its own task.
//!
//! The agent is the only owner of its [`ConsensusEngine`]. It wakes on a
//! gossip message, on the earliest phase deadline of its open rounds, on
//! an ejection notice, or on shutdown, and turns engine actions into
//! broadcasts.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verinet_consensus::{Action, ConsensusEngine};
use verinet_network::GossipPeer;
use verinet_types::{Outcome, ValidatorId};

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
        None => std::future::pending().await,
    }
}

pub struct ValidatorAgent {
    engine: ConsensusEngine,
    peer: GossipPeer,
    ejections: broadcast::Receiver<ValidatorId>,
    shutdown: broadcast::Receiver<()>,
}

impl ValidatorAgent {
    /// `peer` must have joined the gossip network under the engine's key.
    #[must_use]
    pub fn new(
        engine: ConsensusEngine,
        peer: GossipPeer,
        ejections: broadcast::Receiver<ValidatorId>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            engine,
            peer,
            ejections,
            shutdown,
        }
    }

    #[must_use]
    pub fn id(&self) -> ValidatorId {
        self.engine.local_id()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let id = self.id();
        info!(validator = %id, "Validator agent started");
        loop {
            let deadline = self.engine.next_deadline();
            let actions = tokio::select! {
                biased;
                _ = self.shutdown.recv() => break,
                ejected = self.ejections.recv() => match ejected {
                    Ok(ejected) => self.engine.on_ejected(ejected, Utc::now()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(validator = %id, missed, "Ejection notices lagged");
                        Vec::new()
                    }
                    Err(RecvError::Closed) => break,
                },
                received = self.peer.recv() => match received {
                    Some((from, message)) => {
                        let kind = message.kind();
                        self.engine.handle(from, message, Utc::now()).unwrap_or_else(|err| {
                            debug!(validator = %id, %from, kind, error = %err, "Message refused");
                            Vec::new()
                        })
                    }
                    None => break,
                },
                () = until(deadline) => self.engine.tick(Utc::now()),
            };
            self.execute(actions);
            for offense in self.engine.take_offenses() {
                debug!(validator = %id, offender = %offense.validator, offense = %offense.offense, "Offense observed");
            }
        }
        info!(validator = %id, open_rounds = self.engine.open_rounds(), "Validator agent stopped");
    }

    fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(message) => {
                    let kind = message.kind();
                    if let Err(err) = self.peer.broadcast(message) {
                        warn!(validator = %self.id(), kind, error = %err, "Broadcast failed");
                    }
                }
                Action::Notify(outcome) => log_outcome(self.id(), &outcome),
            }
        }
    }
}

fn log_outcome(id: ValidatorId, outcome: &Outcome) {
    match outcome {
        Outcome::Committed { event_id, view } => debug!(validator = %id, %event_id, view, "Round committed locally"),
        Outcome::Rejected { event_id, reason, .. } => debug!(validator = %id, %event_id, %reason, "Round rejected locally"),
        Outcome::TimedOut { event_id, view } => debug!(validator = %id, %event_id, view, "View timed out locally"),
        Outcome::SettlementCompleted { .. } | Outcome::SettlementReversed { .. } => {}
    }
}
