//! Token minting, attenuation, and lineage verification.
//!
//! The signature is an HMAC-SHA256 chain over every link of the lineage,
//! root first:
//!
//! ```text
//! sig_0 = HMAC(root_key[epoch], link_bytes(root))
//! sig_i = HMAC(sig_{i-1},       link_bytes(link_i))
//! token.signature = sig_n
//! ```
//!
//! `link_bytes` is the canonical JSON of `(subject, key_epoch, link)`, so the
//! subject and epoch are bound into every step. Any holder can derive a child
//! from the parent's signature without the root key; nobody can remove a
//! link or widen one without it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use guardian_contracts::{
    error::TokenInvalid,
    token::{CapabilityToken, Caveat, Tier, TokenLink},
};
use guardian_core::traits::{SigningKeyProvider, TokenAuthority, VerifyContext};

use crate::caveat::CaveatVerifier;

type HmacSha256 = Hmac<Sha256>;

/// Canonical MAC input for one lineage link.
#[derive(Serialize)]
struct LinkBinding<'a> {
    subject: &'a str,
    key_epoch: u64,
    link: &'a TokenLink,
}

/// Issues, attenuates, and verifies capability tokens.
pub struct TokenChain {
    keys: Arc<dyn SigningKeyProvider>,
    caveats: CaveatVerifier,
}

impl TokenChain {
    pub fn new(keys: Arc<dyn SigningKeyProvider>, caveats: CaveatVerifier) -> Self {
        Self { keys, caveats }
    }

    /// Mint a root token under the provider's current epoch.
    ///
    /// Returns `SignatureInvalid` if the provider has no key for its own
    /// current epoch.
    pub fn mint_root(
        &self,
        subject: impl Into<String>,
        tier: Tier,
        scopes: BTreeSet<String>,
        caveats: Vec<Caveat>,
    ) -> Result<CapabilityToken, TokenInvalid> {
        let key_epoch = self.keys.current_epoch();
        let key = self.keys.key_for(key_epoch).ok_or_else(|| TokenInvalid::SignatureInvalid {
            reason: format!("no signing key for current epoch {}", key_epoch),
        })?;

        let mut token = CapabilityToken {
            token_id: uuid::Uuid::new_v4().to_string(),
            subject: subject.into(),
            tier,
            scopes,
            caveats,
            parent_token_id: None,
            key_epoch,
            lineage: Vec::new(),
            signature: String::new(),
        };
        let sig = mac(key.as_bytes(), &link_bytes(&token.subject, key_epoch, &token.link()));
        token.signature = hex::encode(sig);

        debug!(
            token_id = %token.token_id,
            subject = %token.subject,
            tier = ?token.tier,
            key_epoch,
            "root token minted"
        );
        Ok(token)
    }

    /// Derive a child with the parent's tier, `new_scopes`, and
    /// `new_caveats`.
    ///
    /// `new_caveats` is the child's full caveat list and must contain every
    /// parent caveat. Fails with `ScopeWidening` otherwise, or when
    /// `new_scopes` is not a subset of the parent's scopes.
    pub fn attenuate(
        &self,
        parent: &CapabilityToken,
        new_scopes: BTreeSet<String>,
        new_caveats: Vec<Caveat>,
    ) -> Result<CapabilityToken, TokenInvalid> {
        self.attenuate_to_tier(parent, parent.tier, new_scopes, new_caveats)
    }

    /// Derive a child that keeps the parent's scopes and appends `extra`
    /// caveats after the parent's.
    pub fn restrict(
        &self,
        parent: &CapabilityToken,
        extra: Vec<Caveat>,
    ) -> Result<CapabilityToken, TokenInvalid> {
        let mut caveats = parent.caveats.clone();
        caveats.extend(extra);
        self.attenuate(parent, parent.scopes.clone(), caveats)
    }

    /// Derive a child at `tier`, which must not exceed the parent's.
    pub fn attenuate_to_tier(
        &self,
        parent: &CapabilityToken,
        tier: Tier,
        new_scopes: BTreeSet<String>,
        new_caveats: Vec<Caveat>,
    ) -> Result<CapabilityToken, TokenInvalid> {
        let parent_link = parent.link();
        let mut child = CapabilityToken {
            token_id: uuid::Uuid::new_v4().to_string(),
            subject: parent.subject.clone(),
            tier,
            scopes: new_scopes,
            caveats: new_caveats,
            parent_token_id: Some(parent.token_id.clone()),
            key_epoch: parent.key_epoch,
            lineage: Vec::new(),
            signature: String::new(),
        };
        check_narrowing(&parent_link, &child.link())?;

        let parent_sig = hex::decode(&parent.signature).map_err(|e| TokenInvalid::Malformed {
            reason: format!("parent signature is not hex: {}", e),
        })?;

        child.lineage = parent.lineage.clone();
        child.lineage.push(parent_link);
        let sig = mac(&parent_sig, &link_bytes(&child.subject, child.key_epoch, &child.link()));
        child.signature = hex::encode(sig);

        debug!(
            token_id = %child.token_id,
            parent_token_id = %parent.token_id,
            depth = child.lineage.len(),
            "token attenuated"
        );
        Ok(child)
    }

    /// Verify a token for one presentation.
    ///
    /// 1. Recompute the MAC chain from the epoch's root key
    ///    (`SignatureInvalid` on mismatch or retired epoch).
    /// 2. Check every lineage step narrows its parent (`ScopeWidening`).
    /// 3. Evaluate caveats in array order (`CaveatViolation` on the first
    ///    unsatisfied one).
    pub fn verify(&self, token: &CapabilityToken, ctx: &VerifyContext) -> Result<(), TokenInvalid> {
        let result = self.verify_inner(token, ctx);
        if let Err(e) = &result {
            warn!(
                token_id = %token.token_id,
                subject = %token.subject,
                kind = e.kind(),
                error = %e,
                "token verification failed"
            );
        }
        result
    }

    /// Spend one presentation of a verified token.
    ///
    /// `verify` only reads the lineage's `max_uses` and `rate_limit`
    /// counters. This charges them atomically, so concurrent presentations
    /// cannot overspend a limit that each of them saw as open.
    pub fn consume(&self, token: &CapabilityToken, now: DateTime<Utc>) -> Result<(), TokenInvalid> {
        let result = self.caveats.consume(&token.caveats, token.root_token_id(), now);
        if let Err(e) = &result {
            warn!(
                token_id = %token.token_id,
                subject = %token.subject,
                error = %e,
                "token presentation refused"
            );
        }
        result
    }

    fn verify_inner(&self, token: &CapabilityToken, ctx: &VerifyContext) -> Result<(), TokenInvalid> {
        // ── Step 1: signature chain ──────────────────────────────────────────
        let key = self.keys.key_for(token.key_epoch).ok_or_else(|| TokenInvalid::SignatureInvalid {
            reason: format!("signing key epoch {} is retired or unknown", token.key_epoch),
        })?;

        let presented = hex::decode(&token.signature).map_err(|_| TokenInvalid::SignatureInvalid {
            reason: "signature is not valid hex".to_string(),
        })?;

        let own_link = token.link();
        let links: Vec<&TokenLink> = token.lineage.iter().chain(std::iter::once(&own_link)).collect();

        let mut sig = key.as_bytes().to_vec();
        for link in &links {
            sig = mac(&sig, &link_bytes(&token.subject, token.key_epoch, link));
        }

        let matches = presented.len() == sig.len()
            && bool::from(presented.as_slice().ct_eq(sig.as_slice()));
        if !matches {
            return Err(TokenInvalid::SignatureInvalid {
                reason: "MAC chain does not match".to_string(),
            });
        }

        let expected_parent = token.lineage.last().map(|l| l.token_id.as_str());
        if token.parent_token_id.as_deref() != expected_parent {
            return Err(TokenInvalid::SignatureInvalid {
                reason: "parent_token_id does not match lineage".to_string(),
            });
        }

        // ── Step 2: lineage monotonicity ─────────────────────────────────────
        for pair in links.windows(2) {
            check_narrowing(pair[0], pair[1])?;
        }

        // ── Step 3: caveats, in array order ──────────────────────────────────
        let lineage_id = token.root_token_id();
        for (index, caveat) in token.caveats.iter().enumerate() {
            if !self.caveats.verify(caveat, ctx, lineage_id) {
                return Err(TokenInvalid::CaveatViolation {
                    which: caveat.kind().to_string(),
                    index,
                });
            }
        }

        Ok(())
    }
}

impl TokenAuthority for TokenChain {
    fn verify(&self, token: &CapabilityToken, ctx: &VerifyContext) -> Result<(), TokenInvalid> {
        TokenChain::verify(self, token, ctx)
    }

    fn consume(&self, token: &CapabilityToken, now: DateTime<Utc>) -> Result<(), TokenInvalid> {
        TokenChain::consume(self, token, now)
    }
}

/// Fail with `ScopeWidening` unless `child` is at most as powerful as `parent`.
fn check_narrowing(parent: &TokenLink, child: &TokenLink) -> Result<(), TokenInvalid> {
    if !child.scopes.is_subset(&parent.scopes) {
        let extra: Vec<&String> = child.scopes.difference(&parent.scopes).collect();
        return Err(TokenInvalid::ScopeWidening {
            reason: format!("scopes {:?} not held by parent '{}'", extra, parent.token_id),
        });
    }
    if child.tier > parent.tier {
        return Err(TokenInvalid::ScopeWidening {
            reason: format!(
                "tier {:?} exceeds parent '{}' tier {:?}",
                child.tier, parent.token_id, parent.tier
            ),
        });
    }
    if let Some(dropped) = parent.caveats.iter().find(|c| !child.caveats.contains(c)) {
        return Err(TokenInvalid::ScopeWidening {
            reason: format!(
                "drops parent '{}' caveat '{}'",
                parent.token_id,
                dropped.kind()
            ),
        });
    }
    Ok(())
}

/// # Panics
///
/// Panics if the binding cannot be serialized to JSON, which cannot happen
/// for these plain-data types.
fn link_bytes(subject: &str, key_epoch: u64, link: &TokenLink) -> Vec<u8> {
    serde_json::to_vec(&LinkBinding { subject, key_epoch, link })
        .expect("token link must always be serializable to JSON")
}

fn mac(key: &[u8], payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Build a child signed over an arbitrary link, skipping the narrowing check.
///
/// Lets tests forge correctly-MACed but widened tokens to prove `verify`
/// rejects them on monotonicity alone.
#[cfg(test)]
pub(crate) fn forge_child(parent: &CapabilityToken, child_link: TokenLink) -> CapabilityToken {
    let parent_sig = hex::decode(&parent.signature).unwrap();
    let mut lineage = parent.lineage.clone();
    lineage.push(parent.link());
    let sig = mac(&parent_sig, &link_bytes(&parent.subject, parent.key_epoch, &child_link));
    CapabilityToken {
        token_id: child_link.token_id,
        subject: parent.subject.clone(),
        tier: child_link.tier,
        scopes: child_link.scopes,
        caveats: child_link.caveats,
        parent_token_id: Some(parent.token_id.clone()),
        key_epoch: parent.key_epoch,
        lineage,
        signature: hex::encode(sig),
    }
}
