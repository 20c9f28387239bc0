//! # guardian-core
//!
//! The trust boundary of the Guardian gateway.
//!
//! This crate provides:
//! - The collaborator traits (`PolicyCheck`, `TokenAuthority`,
//!   `ActionValidator`, `AuditTrail`, key/counter/redactor/kill-switch)
//! - `GuardianGateway`, which wires them together in the correct trust order
//! - `AuditQueue`, the ordered background audit writer
//! - Injectable `Clock` and `KillSwitch` implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guardian_core::{GuardianGateway, AuditQueue, clock::SystemClock};
//!
//! let gateway = GuardianGateway::new(tokens, engine, AuditQueue::spawn(trail), Arc::new(SystemClock));
//! let decision = gateway.handle(&token_bytes, action).await;
//! ```

pub mod audit_queue;
pub mod clock;
pub mod gateway;
pub mod kill_switch;
pub mod traits;

pub use audit_queue::{AuditQueue, RetryPolicy};
pub use gateway::GuardianGateway;
