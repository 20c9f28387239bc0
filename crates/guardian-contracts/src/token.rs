//! Capability token data model.
//!
//! A `CapabilityToken` is a bearer credential in the macaroon style: it can be
//! narrowed by any holder (fewer scopes, lower tier, more caveats) without
//! contacting the issuer, and its signature is a MAC chain that any party
//! holding the root key can recompute. The types here are pure data; minting
//! and verification live in `guardian-token`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TokenInvalid;

/// Ordered privilege level carried by a token.
///
/// The derive order is the privilege order: `Public` is the lowest and
/// `System` the highest. Attenuation may only move down this ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Public,
    Authenticated,
    Elevated,
    Privileged,
    Admin,
    System,
}

/// A restriction predicate attached to a token.
///
/// Caveats form a conjunction and are evaluated in array order. A caveat kind
/// this build does not understand deserializes to `Unrecognized` and is never
/// satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Caveat {
    /// The token is unusable after `not_after`.
    Expiry { not_after: DateTime<Utc> },

    /// The request resource must match `pattern` (`*` and `?` wildcards).
    ResourceGlob { pattern: String },

    /// The token lineage may be presented at most `limit` times.
    MaxUses { limit: u64 },

    /// At most `max_calls` presentations inside any `window_secs` window.
    RateLimit { max_calls: u32, window_secs: u64 },

    /// A named predicate resolved by the verifier's registry.
    Custom { name: String, value: String },

    /// Any caveat kind unknown to this build.
    #[serde(other)]
    Unrecognized,
}

impl Caveat {
    /// Stable kind label used in violation reports and audit reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Caveat::Expiry { .. } => "expiry",
            Caveat::ResourceGlob { .. } => "resource_glob",
            Caveat::MaxUses { .. } => "max_uses",
            Caveat::RateLimit { .. } => "rate_limit",
            Caveat::Custom { .. } => "custom",
            Caveat::Unrecognized => "unrecognized",
        }
    }
}

/// The restriction set of one token in an attenuation lineage.
///
/// Every link is an input to the MAC chain, so altering any ancestor's
/// scopes, tier, or caveats invalidates the descendant's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLink {
    pub token_id: String,
    pub tier: Tier,
    pub scopes: BTreeSet<String>,
    pub caveats: Vec<Caveat>,
}

/// A delegated, attenuable capability credential.
///
/// Tokens are immutable once minted and are shared freely across threads.
/// `lineage` lists every ancestor's restriction set, root first; it is empty
/// for a root token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// Opaque unique identifier.
    pub token_id: String,
    /// The principal this token speaks for. Fixed across the lineage.
    pub subject: String,
    pub tier: Tier,
    pub scopes: BTreeSet<String>,
    /// Accumulated caveats: every ancestor caveat plus any added here.
    pub caveats: Vec<Caveat>,
    pub parent_token_id: Option<String>,
    /// Signing-key epoch the root of this lineage was minted under.
    pub key_epoch: u64,
    pub lineage: Vec<TokenLink>,
    /// Lowercase hex HMAC-SHA256 tag over the whole lineage.
    pub signature: String,
}

impl CapabilityToken {
    /// This token's own restriction set as a chain link.
    pub fn link(&self) -> TokenLink {
        TokenLink {
            token_id: self.token_id.clone(),
            tier: self.tier,
            scopes: self.scopes.clone(),
            caveats: self.caveats.clone(),
        }
    }

    /// Identifier of the root token this lineage descends from.
    pub fn root_token_id(&self) -> &str {
        self.lineage
            .first()
            .map(|link| link.token_id.as_str())
            .unwrap_or(self.token_id.as_str())
    }

    /// Return true if the token grants `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Encode the token as the JSON bytes presented at the gateway.
    ///
    /// # Panics
    ///
    /// Panics if the token cannot be serialized to JSON, which cannot happen
    /// for this plain-data type.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CapabilityToken must always be serializable to JSON")
    }

    /// Decode token bytes. Undecodable input is `TokenInvalid::Malformed`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenInvalid> {
        serde_json::from_slice(bytes).map_err(|e| TokenInvalid::Malformed {
            reason: format!("failed to decode capability token: {}", e),
        })
    }
}
