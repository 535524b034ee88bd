/*
    auth.rs - Federation auth assertions

    Short-lived Ed25519-signed assertions attached to outbound
    federation calls when the trust level demands bearer proof.
    FullTrust partners skip the token entirely; LimitedTrust and
    VerifyAlways get `{iss, sub, aud, jti, iat, exp}` signed by the
    sending broker, valid for five minutes.

    Full credential issuance and DID resolution live outside the core;
    this module covers the assertion shape, its signature, and the
    CredentialVerifier seam through which presented credentials reach
    that external machinery.
*/

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::core_context::model::types::{BrokerId, Timestamp};
use crate::core_federation::error::FederationResult;
use crate::core_federation::types::TrustLevel;

/// Assertion lifetime in seconds
pub const ASSERTION_TTL_SECS: u64 = 300;

/// Claims carried by a federation assertion. Serialization order is the
/// signing order; both sides must agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer: the sending broker
    pub iss: String,
    /// Subject: the sending broker asserts about itself
    pub sub: String,
    /// Audience: the partner the call targets
    pub aud: String,
    /// Random token id, unique per assertion
    pub jti: String,
    /// Issued-at, epoch seconds
    pub iat: u64,
    /// Expiry, epoch seconds
    pub exp: u64,
}

/// A signed assertion ready to attach to an outbound request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAssertion {
    pub claims: AssertionClaims,
    /// Hex-encoded Ed25519 signature over the serialized claims
    pub signature: String,
}

impl SignedAssertion {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.as_secs() >= self.claims.exp
    }

    /// Check the signature against the issuer's verifying key
    pub fn verify(&self, verifying_key: &[u8]) -> bool {
        if verifying_key.len() != 32 {
            return false;
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(verifying_key);
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        let Ok(message) = serde_json::to_vec(&self.claims) else {
            return false;
        };
        key.verify(&message, &signature).is_ok()
    }
}

/// Signs federation assertions on behalf of one broker
pub struct AssertionSigner {
    broker: BrokerId,
    signing_key: SigningKey,
}

impl AssertionSigner {
    /// Generate a fresh signing key for this broker instance
    pub fn generate(broker: BrokerId) -> Self {
        let seed: [u8; 32] = rand::random();
        AssertionSigner {
            broker,
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_seed(broker: BrokerId, seed: [u8; 32]) -> Self {
        AssertionSigner {
            broker,
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn broker(&self) -> &BrokerId {
        &self.broker
    }

    /// Public half, distributable through the broker registry
    pub fn verifying_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    /// Build and sign a five-minute assertion addressed to `audience`
    pub fn assert_for(&self, audience: &BrokerId) -> FederationResult<SignedAssertion> {
        let iat = Timestamp::now().as_secs();
        let claims = AssertionClaims {
            iss: self.broker.to_string(),
            sub: self.broker.to_string(),
            aud: audience.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        let message = serde_json::to_vec(&claims)?;
        let signature = self.signing_key.sign(&message);
        Ok(SignedAssertion {
            claims,
            signature: hex::encode(signature.to_bytes()),
        })
    }

    /// Whether calls at this trust level carry an assertion at all
    pub fn required_for(level: TrustLevel) -> bool {
        !matches!(level, TrustLevel::FullTrust)
    }
}

impl fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSigner")
            .field("broker", &self.broker)
            .field("verifying_key", &hex::encode(self.verifying_key()))
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Outcome of checking a presented credential
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialVerdict {
    pub valid: bool,
    /// Claims the credential carried; Null when invalid or absent
    pub claims: Value,
}

impl CredentialVerdict {
    pub fn accept(claims: Value) -> Self {
        CredentialVerdict { valid: true, claims }
    }

    pub fn reject() -> Self {
        CredentialVerdict {
            valid: false,
            claims: Value::Null,
        }
    }
}

/// Boundary to the external credential machinery. Inbound trust
/// requests presenting a credential pass through here before the
/// mirror relationship is established.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, presenter: &BrokerId, credential: &Value) -> CredentialVerdict;
}

/// Verifier for deployments without credential checking: everything
/// presented passes, with no claims extracted.
#[derive(Debug, Default)]
pub struct AcceptAllCredentials;

#[async_trait]
impl CredentialVerifier for AcceptAllCredentials {
    async fn verify(&self, _presenter: &BrokerId, _credential: &Value) -> CredentialVerdict {
        CredentialVerdict::accept(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(id: &str) -> BrokerId {
        BrokerId::new(id.to_string())
    }

    #[test]
    fn assertion_signs_and_verifies() {
        let signer = AssertionSigner::generate(broker("did:panmesh:a"));
        let assertion = signer.assert_for(&broker("did:panmesh:b")).unwrap();

        assert_eq!(assertion.claims.iss, "did:panmesh:a");
        assert_eq!(assertion.claims.sub, "did:panmesh:a");
        assert_eq!(assertion.claims.aud, "did:panmesh:b");
        assert_eq!(assertion.claims.exp, assertion.claims.iat + ASSERTION_TTL_SECS);
        assert!(assertion.verify(&signer.verifying_key()));
    }

    #[test]
    fn tampered_assertion_fails_verification() {
        let signer = AssertionSigner::generate(broker("did:panmesh:a"));
        let mut assertion = signer.assert_for(&broker("did:panmesh:b")).unwrap();
        assertion.claims.aud = "did:panmesh:mallory".to_string();
        assert!(!assertion.verify(&signer.verifying_key()));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = AssertionSigner::generate(broker("did:panmesh:a"));
        let other = AssertionSigner::generate(broker("did:panmesh:x"));
        let assertion = signer.assert_for(&broker("did:panmesh:b")).unwrap();
        assert!(!assertion.verify(&other.verifying_key()));
    }

    #[test]
    fn each_assertion_gets_a_fresh_jti() {
        let signer = AssertionSigner::generate(broker("did:panmesh:a"));
        let first = signer.assert_for(&broker("did:panmesh:b")).unwrap();
        let second = signer.assert_for(&broker("did:panmesh:b")).unwrap();
        assert_ne!(first.claims.jti, second.claims.jti);
    }

    #[test]
    fn full_trust_skips_assertions() {
        assert!(!AssertionSigner::required_for(TrustLevel::FullTrust));
        assert!(AssertionSigner::required_for(TrustLevel::LimitedTrust));
        assert!(AssertionSigner::required_for(TrustLevel::VerifyAlways));
    }

    #[test]
    fn expiry_is_checked_in_seconds() {
        let signer = AssertionSigner::generate(broker("did:panmesh:a"));
        let assertion = signer.assert_for(&broker("did:panmesh:b")).unwrap();
        assert!(!assertion.is_expired(Timestamp::now()));
        let after = Timestamp::from_millis((assertion.claims.exp + 1) * 1000);
        assert!(assertion.is_expired(after));
    }

    #[test]
    fn debug_redacts_signing_key() {
        let signer = AssertionSigner::generate(broker("did:panmesh:a"));
        let debug = format!("{:?}", signer);
        assert!(debug.contains("<redacted>"));
    }
}
