//! # guardian-token
//!
//! Attenuable capability tokens for the Guardian gateway.
//!
//! ## Overview
//!
//! A root token is minted by the issuer under the current signing-key epoch.
//! Any holder may derive narrower children (fewer scopes, lower tier, more
//! caveats) offline, by MACing the child's restriction set with the parent's
//! signature. [`TokenChain::verify`] recomputes the chain from the root key,
//! rejects any lineage step that widens rights, then evaluates every caveat
//! in array order. [`TokenChain::consume`] then spends one presentation
//! against the lineage's `max_uses` and `rate_limit` counters.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let chain = TokenChain::new(Arc::new(keys), CaveatVerifier::new(usage, rate));
//! let root = chain.mint_root("agent-7", Tier::Elevated, scopes, vec![])?;
//! let child = chain.restrict(&root, vec![Caveat::Expiry { not_after }])?;
//! chain.verify(&child, &VerifyContext { resource, now })?;
//! chain.consume(&child, now)?;
//! ```

pub mod caveat;
pub mod chain;
pub mod counters;
pub mod keys;

pub use caveat::{glob_matches, CaveatVerifier, CustomCaveatFn};
pub use chain::TokenChain;
pub use counters::{InMemoryUsageCounter, SlidingWindowRateLimiter};
pub use keys::{RotatingKeyProvider, StaticKeyProvider};

// ── Tests ─────────────────────────────────────────────────────────────────────
