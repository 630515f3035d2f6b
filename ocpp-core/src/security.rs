//! Signature handling for command envelopes.
//!
//! Implements:
//! - JCS canonicalization (RFC 8785)
//! - Pluggable signature policies (unsigned pass-through, Ed25519)
//! - The coordinator that verifies and signs envelopes under the active policy

use std::sync::Arc;

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{OcppError, OcppResult};
use crate::message::{Request, Response};

/// JCS (RFC 8785) JSON Canonicalization.
///
/// For signature computation, we need deterministic JSON serialization:
/// 1. Object keys sorted lexicographically
/// 2. No whitespace
/// 3. Numbers in shortest form
/// 4. Strings escaped per RFC 8785
pub fn canonicalize_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                format!("{}", f)
            } else {
                n.to_string()
            }
        }
        Value::String(_) => value.to_string(),
        Value::Array(arr) => {
            let elements: Vec<String> = arr.iter().map(canonicalize_json).collect();
            format!("[{}]", elements.join(","))
        }
        Value::Object(obj) => {
            let mut keys: Vec<_> = obj.keys().collect();
            keys.sort();
            let pairs: Vec<String> = keys
                .iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String((*k).clone()),
                        canonicalize_json(&obj[*k])
                    )
                })
                .collect();
            format!("{{{}}}", pairs.join(","))
        }
    }
}

/// Canonical form of an envelope: its JSON value without the `signature`
/// field, canonicalized.
pub fn canonical_form<T: Serialize>(envelope: &T) -> OcppResult<String> {
    let mut value = serde_json::to_value(envelope)?;
    if let Value::Object(ref mut map) = value {
        map.remove("signature");
    }
    Ok(canonicalize_json(&value))
}

/// A named signing/verification scheme.
pub trait SignaturePolicy: Send + Sync {
    /// Policy name; also reported as the signing method of signed meter data.
    fn name(&self) -> &str;

    /// Sign a canonical form. `None` means the policy attaches no signature.
    fn sign(&self, canonical: &str) -> OcppResult<Option<String>>;

    /// Verify a signature over a canonical form.
    fn verify(&self, canonical: &str, signature: Option<&str>) -> OcppResult<()>;

    /// Encoded public key of the local signer, if any.
    fn public_key(&self) -> String {
        String::new()
    }
}

/// Pass-through policy: signs nothing, accepts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsignedPolicy;

impl SignaturePolicy for UnsignedPolicy {
    fn name(&self) -> &str {
        "Unsigned"
    }

    fn sign(&self, _canonical: &str) -> OcppResult<Option<String>> {
        Ok(None)
    }

    fn verify(&self, _canonical: &str, _signature: Option<&str>) -> OcppResult<()> {
        Ok(())
    }
}

/// Ed25519 policy: signs with the local key, verifies with the peer's key.
/// Signatures are standard base64.
pub struct Ed25519Policy {
    signing_key: SigningKey,
    peer_key: VerifyingKey,
}

impl Ed25519Policy {
    pub fn new(signing_key: SigningKey, peer_key: VerifyingKey) -> Self {
        Self {
            signing_key,
            peer_key,
        }
    }

    /// Build from base64-encoded 32-byte secret and public keys.
    pub fn from_base64(signing_key: &str, peer_key: &str) -> OcppResult<Self> {
        let secret = decode_key(signing_key)?;
        let public = decode_key(peer_key)?;
        let peer_key = VerifyingKey::from_bytes(&public)
            .map_err(|e| OcppError::Crypto(format!("Invalid peer key: {}", e)))?;
        Ok(Self::new(SigningKey::from_bytes(&secret), peer_key))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

fn decode_key(encoded: &str) -> OcppResult<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| OcppError::Crypto(format!("Invalid base64: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| OcppError::Crypto("Key must be 32 bytes".to_string()))
}

impl SignaturePolicy for Ed25519Policy {
    fn name(&self) -> &str {
        "Ed25519"
    }

    fn sign(&self, canonical: &str) -> OcppResult<Option<String>> {
        let signature: Signature = self.signing_key.sign(canonical.as_bytes());
        Ok(Some(
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
        ))
    }

    fn verify(&self, canonical: &str, signature: Option<&str>) -> OcppResult<()> {
        let signature_b64 =
            signature.ok_or_else(|| OcppError::Crypto("No signature present".to_string()))?;

        let signature_bytes = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| OcppError::Crypto(format!("Invalid base64: {}", e)))?;

        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|e| OcppError::Crypto(format!("Invalid signature format: {}", e)))?;

        self.peer_key
            .verify(canonical.as_bytes(), &signature)
            .map_err(|_| OcppError::SignatureInvalid)
    }

    fn public_key(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.verifying_key().to_bytes())
    }
}

/// Result of a verify or sign attempt. Never an error: callers decide
/// whether a failed check is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCheck {
    pub ok: bool,
    pub detail: String,
    /// Signature produced by a sign attempt.
    pub signature: Option<String>,
}

impl SignatureCheck {
    fn passed(signature: Option<String>) -> Self {
        Self {
            ok: true,
            detail: String::new(),
            signature,
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            signature: None,
        }
    }
}

/// Ordered set of signature policies; the first inserted is active.
pub struct SignatureCoordinator {
    policies: Vec<Arc<dyn SignaturePolicy>>,
    fallback: Arc<dyn SignaturePolicy>,
}

impl Default for SignatureCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureCoordinator {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
            fallback: Arc::new(UnsignedPolicy),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn SignaturePolicy>) -> Self {
        self.insert(policy);
        self
    }

    /// Add a policy. Returns false if a policy of the same name exists.
    pub fn insert(&mut self, policy: Arc<dyn SignaturePolicy>) -> bool {
        if self.policies.iter().any(|p| p.name() == policy.name()) {
            return false;
        }
        self.policies.push(policy);
        true
    }

    /// The active policy, or the unsigned pass-through if none was inserted.
    pub fn active(&self) -> &Arc<dyn SignaturePolicy> {
        self.policies.first().unwrap_or(&self.fallback)
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    /// Verify a signature over a canonical form.
    pub fn verify(&self, canonical: &str, signature: Option<&str>) -> SignatureCheck {
        match self.active().verify(canonical, signature) {
            Ok(()) => SignatureCheck::passed(None),
            Err(e) => SignatureCheck::failed(e.to_string()),
        }
    }

    /// Sign a canonical form.
    pub fn sign(&self, canonical: &str) -> SignatureCheck {
        match self.active().sign(canonical) {
            Ok(signature) => SignatureCheck::passed(signature),
            Err(e) => SignatureCheck::failed(e.to_string()),
        }
    }

    pub fn verify_request(&self, request: &Request) -> SignatureCheck {
        match canonical_form(request) {
            Ok(canonical) => self.verify(&canonical, request.signature.as_deref()),
            Err(e) => SignatureCheck::failed(e.to_string()),
        }
    }

    pub fn verify_response(&self, response: &Response) -> SignatureCheck {
        match canonical_form(response) {
            Ok(canonical) => self.verify(&canonical, response.signature.as_deref()),
            Err(e) => SignatureCheck::failed(e.to_string()),
        }
    }

    /// Sign a request in place. On failure the request is left unsigned.
    pub fn sign_request(&self, request: &mut Request) -> SignatureCheck {
        request.signature = None;
        let check = match canonical_form(&*request) {
            Ok(canonical) => self.sign(&canonical),
            Err(e) => SignatureCheck::failed(e.to_string()),
        };
        request.signature = check.signature.clone();
        debug!(action = %request.action, ok = check.ok, "signed request");
        check
    }

    /// Sign a response in place. On failure the response is left unsigned.
    pub fn sign_response(&self, response: &mut Response) -> SignatureCheck {
        response.signature = None;
        let check = match canonical_form(&*response) {
            Ok(canonical) => self.sign(&canonical),
            Err(e) => SignatureCheck::failed(e.to_string()),
        };
        response.signature = check.signature.clone();
        check
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Action, Outcome};
    use chrono::Utc;
    use rand::rngs::OsRng;

    fn request() -> Request {
        Request::new(
            1,
            Action::Reset,
            "CS-1",
            serde_json::json!({"type": "Immediate"}),
            Utc::now(),
        )
    }

    #[test]
    fn jcs_canonicalization() {
        let json: Value = serde_json::json!({
            "z": 1,
            "a": "hello",
            "m": [3, 1, 2]
        });

        let canonical = canonicalize_json(&json);
        // Keys should be sorted: a, m, z
        assert!(canonical.starts_with("{\"a\":"));
        assert!(canonical.contains("\"m\":[3,1,2]"));
        assert!(canonical.ends_with("\"z\":1}"));
    }

    #[test]
    fn canonical_form_ignores_signature() {
        let mut req = request();
        let before = canonical_form(&req).unwrap();
        req.signature = Some("abc".to_string());
        assert_eq!(canonical_form(&req).unwrap(), before);
        assert!(!before.contains("signature"));
    }

    #[test]
    fn unsigned_default_accepts_anything() {
        let coordinator = SignatureCoordinator::new();
        assert_eq!(coordinator.active().name(), "Unsigned");

        let mut req = request();
        assert!(coordinator.sign_request(&mut req).ok);
        assert!(req.signature.is_none());

        req.signature = Some("garbage".to_string());
        assert!(coordinator.verify_request(&req).ok);
    }

    #[test]
    fn first_inserted_policy_is_active() {
        let key = SigningKey::generate(&mut OsRng);
        let peer = key.verifying_key();
        let mut coordinator = SignatureCoordinator::new()
            .with_policy(Arc::new(Ed25519Policy::new(key, peer)));
        assert!(coordinator.insert(Arc::new(UnsignedPolicy)));
        assert!(!coordinator.insert(Arc::new(UnsignedPolicy)));

        assert_eq!(coordinator.active().name(), "Ed25519");
        assert_eq!(coordinator.policy_names(), vec!["Ed25519", "Unsigned"]);
    }

    #[test]
    fn ed25519_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let peer = key.verifying_key();
        let coordinator =
            SignatureCoordinator::new().with_policy(Arc::new(Ed25519Policy::new(key, peer)));

        let mut req = request();
        let check = coordinator.sign_request(&mut req);
        assert!(check.ok);
        assert!(req.signature.is_some());
        assert!(coordinator.verify_request(&req).ok);

        req.payload = serde_json::json!({"type": "OnIdle"});
        let tampered = coordinator.verify_request(&req);
        assert!(!tampered.ok);
        assert!(tampered.detail.contains("signature"));
    }

    #[test]
    fn ed25519_rejects_missing_signature() {
        let key = SigningKey::generate(&mut OsRng);
        let peer = SigningKey::generate(&mut OsRng).verifying_key();
        let coordinator =
            SignatureCoordinator::new().with_policy(Arc::new(Ed25519Policy::new(key, peer)));

        let check = coordinator.verify_request(&request());
        assert!(!check.ok);
        assert!(check.detail.contains("No signature present"));
    }

    #[test]
    fn response_signing() {
        let key = SigningKey::generate(&mut OsRng);
        let peer = key.verifying_key();
        let coordinator =
            SignatureCoordinator::new().with_policy(Arc::new(Ed25519Policy::new(key, peer)));

        let req = request();
        let mut resp = Response::to_request(
            &req,
            "CS-1",
            Outcome::Completed(serde_json::json!({"status": "Accepted"})),
            Utc::now(),
        );
        assert!(coordinator.sign_response(&mut resp).ok);
        assert!(coordinator.verify_response(&resp).ok);
    }

    #[test]
    fn keys_from_base64() {
        let key = SigningKey::generate(&mut OsRng);
        let engine = base64::engine::general_purpose::STANDARD;
        let secret = engine.encode(key.to_bytes());
        let public = engine.encode(key.verifying_key().to_bytes());

        let policy = Ed25519Policy::from_base64(&secret, &public).unwrap();
        assert_eq!(policy.public_key(), public);
        assert!(Ed25519Policy::from_base64("short", &public).is_err());
    }
}
