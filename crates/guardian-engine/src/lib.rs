//! # guardian-engine
//!
//! A breaker-guarded, fail-closed policy validation engine for the Guardian
//! gateway.
//!
//! ## Overview
//!
//! [`GuardianEngine`] implements the
//! [`ActionValidator`](guardian_core::traits::ActionValidator) trait. Each
//! registered [`PolicyCheck`](guardian_core::traits::PolicyCheck) sits behind
//! its own [`CircuitBreaker`]; checks run concurrently under a per-check
//! timeout, and their risk scores are aggregated worst-check-wins.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use guardian_engine::{EngineConfig, GuardianEngine};
//!
//! let config = EngineConfig::from_file(Path::new("policies/guardian.toml"))?;
//! let engine = GuardianEngine::builder(config)
//!     .check(Arc::new(ConsentCheck::new()))
//!     .kill_switch(kill_switch.clone())
//!     .build()?;
//! ```

pub mod breaker;
pub mod config;
pub mod engine;

pub use breaker::{BreakerPermit, CircuitBreaker};
pub use config::{BreakerSettings, CheckOverrides, EnforcementPolicy, EngineConfig};
pub use engine::{GuardianEngine, GuardianEngineBuilder, REASON_ENFORCEMENT_DISABLED, REASON_KILL_SWITCH};

// ── Tests ─────────────────────────────────────────────────────────────────────
