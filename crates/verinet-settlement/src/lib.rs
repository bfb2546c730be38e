//! # verinet-settlement
//!
//! Exchanges a payment leg for a custody leg once an event has committed.
//!
//! The [`SettlementCoordinator`] runs each settlement as a saga:
//!
//! ```text
//! preconditions ─→ lock payment ─→ lock custody ─→ [authorize] ─→ transfer custody ─→ release payment
//!                        │               │               │                │                  │
//!                        └───────────────┴───────────────┴────────────────┴──────────────────┘
//!                                                        ▼
//!                                       compensate in reverse order
//! ```
//!
//! The whole pipeline runs under one deadline. When it fires, the state of
//! whatever step was in flight is read back from the collaborators before
//! compensating, so a transfer that landed without an acknowledgement is
//! still undone (or, if both legs landed, kept).
//!
//! - [`locks`]: process-local exclusive locks on accounts and assets
//! - [`book`]: every attempt by event; one settlement per committed event
//! - [`rails`]: in-memory payment rail and custody registry
//! - [`supply`]: fund conservation check used by the in-memory rail

pub mod authorizer;
pub mod book;
pub mod coordinator;
pub mod locks;
pub mod rails;
pub mod supply;

pub use authorizer::HighValueAuthorizer;
pub use book::SettlementBook;
pub use coordinator::{SettlementCoordinator, settlement_outcome};
pub use locks::{Resource, ResourceGuard, ResourceLocks};
pub use rails::{CustodyOp, InMemoryCustodyRegistry, InMemoryPaymentRail, PaymentOp};
pub use supply::SupplyConservation;
