//! Wallet: the agent's seed-derived signing identity plus local claim
//! storage for holder-prover roles.
//!
//! The keypair is ed25519, derived deterministically from the configured
//! 32-byte seed, so an agent keeps its DID across restarts. The DID is the
//! hex form of the first 16 bytes of the SHA256 of the verification key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AgentError, AgentResult};
use crate::ledger::code;

#[derive(Debug)]
pub struct Wallet {
    profile: String,
    signing: SigningKey,
    did: String,
    verkey: String,
    open: bool,
    claims: Vec<Value>,
    claim_offers: Vec<Value>,
    master_secret: Option<String>,
}

impl Wallet {
    /// Derive a wallet from the configured seed. The seed must be exactly
    /// 32 bytes, as in the ledger SDK's wallet format.
    pub fn create(seed: &str, profile: &str) -> AgentResult<Self> {
        let seed_bytes: [u8; 32] = seed.as_bytes().try_into().map_err(|_| {
            AgentError::Wallet(format!(
                "seed for profile {profile} must be exactly 32 bytes, got {}",
                seed.len()
            ))
        })?;

        let signing = SigningKey::from_bytes(&seed_bytes);
        let verifying = signing.verifying_key();
        let verkey = hex::encode(verifying.as_bytes());
        let digest = Sha256::digest(verifying.as_bytes());
        let did = hex::encode(&digest[..16]);

        Ok(Self {
            profile: profile.to_string(),
            signing,
            did,
            verkey,
            open: false,
            claims: Vec::new(),
            claim_offers: Vec::new(),
            master_secret: None,
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn verkey(&self) -> &str {
        &self.verkey
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Sign arbitrary bytes, returning a base64 signature.
    pub fn sign(&self, data: &[u8]) -> String {
        BASE64.encode(self.signing.sign(data).to_bytes())
    }

    /// Verify a base64 signature against a hex verification key.
    pub fn verify(verkey_hex: &str, data: &[u8], signature_b64: &str) -> AgentResult<bool> {
        let key_bytes: [u8; 32] = hex::decode(verkey_hex)
            .map_err(|e| AgentError::bad_request(format!("bad verkey: {e}")))?
            .try_into()
            .map_err(|_| AgentError::bad_request("verkey must be 32 bytes"))?;
        let verifying = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| AgentError::bad_request(format!("bad verkey: {e}")))?;

        let sig_bytes: [u8; 64] = BASE64
            .decode(signature_b64)
            .map_err(|e| AgentError::bad_request(format!("bad signature: {e}")))?
            .try_into()
            .map_err(|_| AgentError::bad_request("signature must be 64 bytes"))?;
        let signature = Signature::from_bytes(&sig_bytes);

        Ok(verifying.verify(data, &signature).is_ok())
    }

    // ---- holder-prover state ----

    pub fn set_master_secret(&mut self, label: impl Into<String>) {
        self.master_secret = Some(label.into());
    }

    pub fn master_secret(&self) -> AgentResult<&str> {
        self.master_secret.as_deref().ok_or_else(|| {
            AgentError::sdk(code::WALLET_STATE, "no master secret set in wallet")
        })
    }

    pub fn store_claim_offer(&mut self, offer: Value) {
        self.claim_offers.push(offer);
    }

    pub fn store_claim(&mut self, claim: Value) {
        self.claims.push(claim);
    }

    pub fn claims(&self) -> &[Value] {
        &self.claims
    }

    /// Drop all stored claims and offers, as a wallet reset does.
    pub fn reset_claims(&mut self) {
        self.claims.clear();
        self.claim_offers.clear();
    }
}

/// Generate a random nonce (32 bytes, hex encoded).
pub fn generate_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}
