//! The agent handle: a role-bound capability bundle over one wallet and one
//! pool connection.
//!
//! `process_post` is the unified processing capability behind every POST
//! route: it validates the message against the protocol table, forwards it
//! to a peer agent when a foreign `proxy-did` is present, and otherwise
//! dispatches to the matching native operation, failing with the SDK's
//! not-capable code when the role lacks it.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::ledger::{code, LedgerStore, Pool, SchemaKey};
use crate::proto::{registry, MessageType, PROXY_DID};
use crate::roles::{AgentRole, Capabilities};
use crate::wallet::{self, Wallet};

#[derive(Debug)]
pub struct Agent {
    role: AgentRole,
    caps: Capabilities,
    wallet: Wallet,
    pool: Arc<Pool>,
    endpoint: String,
    http: reqwest::Client,
}

impl Agent {
    pub fn new(
        role: AgentRole,
        wallet: Wallet,
        pool: Arc<Pool>,
        endpoint: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            role,
            caps: role.capabilities(),
            wallet,
            pool,
            endpoint: endpoint.into(),
            http,
        }
    }

    /// Open the agent. The pool must already be open.
    pub fn open(&mut self) -> AgentResult<()> {
        self.pool.store()?;
        self.wallet.open();
        tracing::info!(role = %self.role, did = %self.wallet.did(), "agent open");
        Ok(())
    }

    pub fn close(&mut self) {
        if self.wallet.is_open() {
            self.wallet.close();
            tracing::info!(role = %self.role, "agent closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.wallet.is_open()
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn caps(&self) -> Capabilities {
        self.caps
    }

    pub fn did(&self) -> &str {
        self.wallet.did()
    }

    pub fn verkey(&self) -> &str {
        self.wallet.verkey()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn store(&self) -> AgentResult<Arc<dyn LedgerStore>> {
        if !self.wallet.is_open() {
            return Err(AgentError::sdk(
                code::CLOSED,
                format!("agent {} is closed", self.wallet.profile()),
            ));
        }
        self.pool.store()
    }

    fn require(&self, capable: bool, operation: &str) -> AgentResult<()> {
        if capable {
            Ok(())
        } else {
            Err(AgentError::sdk(
                code::NOT_CAPABLE,
                format!("{} agent does not natively implement {operation}", self.role),
            ))
        }
    }

    // ---- direct ledger operations, used by the boot sequence ----

    pub async fn get_nym(&self, did: &str) -> AgentResult<Value> {
        self.store()?.get_nym(did).await
    }

    pub async fn send_nym(&self, did: &str, verkey: &str) -> AgentResult<Value> {
        self.store()?
            .send_nym(did, verkey, self.wallet.profile())
            .await
    }

    pub async fn get_endpoint(&self, did: &str) -> AgentResult<Value> {
        self.store()?.get_endpoint(did).await
    }

    pub async fn send_endpoint(&self) -> AgentResult<Value> {
        self.store()?
            .send_endpoint(self.wallet.did(), &self.endpoint)
            .await
    }

    pub async fn get_claim_def(&self, schema_seq_no: u64) -> AgentResult<Value> {
        self.store()?
            .get_claim_def(schema_seq_no, self.wallet.did())
            .await
    }

    pub async fn send_claim_def(&self, schema_seq_no: u64) -> AgentResult<Value> {
        self.store()?
            .send_claim_def(schema_seq_no, self.wallet.did())
            .await
    }

    pub fn create_master_secret(&mut self, label: impl Into<String>) {
        self.wallet.set_master_secret(label);
    }

    // ---- request processing ----

    pub fn process_get_did(&self) -> Value {
        json!(self.wallet.did())
    }

    /// Ledger transaction by sequence number; `{}` when there is none.
    pub async fn process_get_txn(&self, seq_no: u64) -> AgentResult<Value> {
        self.store()?.get_txn(seq_no).await
    }

    /// Process one `{type, data}` protocol message.
    pub async fn process_post(&mut self, msg: &Value) -> AgentResult<Value> {
        let slug = msg
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::bad_request("message has no type"))?;
        let msg_type = MessageType::from_slug(slug)
            .ok_or_else(|| AgentError::bad_request(format!("unsupported message type {slug}")))?;

        registry().validate(self.role, msg_type, msg)?;

        let data = &msg["data"];
        if let Some(proxy_did) = data.get(PROXY_DID).and_then(Value::as_str) {
            if proxy_did != self.wallet.did() {
                return self.proxy_post(proxy_did, msg_type, msg).await;
            }
        }
        self.process_local(msg_type, data).await
    }

    /// Forward a message to the peer agent registered under `proxy_did`,
    /// with the forwarding DID stripped from the payload.
    async fn proxy_post(
        &self,
        proxy_did: &str,
        msg_type: MessageType,
        msg: &Value,
    ) -> AgentResult<Value> {
        let endpoint_val = self.store()?.get_endpoint(proxy_did).await?;
        let endpoint = endpoint_val
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AgentError::sdk(
                    code::ABSENT,
                    format!("no endpoint on ledger for proxy DID {proxy_did}"),
                )
            })?;

        let mut forwarded = msg.clone();
        if let Some(data) = forwarded.get_mut("data").and_then(Value::as_object_mut) {
            data.remove(PROXY_DID);
        }

        tracing::debug!(%msg_type, proxy_did, endpoint, "forwarding to peer agent");
        let resp = self
            .http
            .post(format!("{endpoint}/{}", msg_type.slug()))
            .json(&forwarded)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() {
            Ok(body)
        } else {
            // surface the peer's envelope so codes survive the hop
            let error_code = body.get("error-code").and_then(Value::as_i64).unwrap_or(400);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| {
                    format!("proxy hop to {proxy_did} failed with status {status}")
                });
            Err(AgentError::Sdk {
                code: error_code,
                message,
            })
        }
    }

    async fn process_local(&mut self, msg_type: MessageType, data: &Value) -> AgentResult<Value> {
        use MessageType::*;

        match msg_type {
            AgentNymLookup => {
                let did = str_at(data, "agent-nym", "did")?;
                self.store()?.get_nym(&did).await
            }
            AgentNymSend => {
                self.require(self.caps.register, "agent-nym-send")?;
                let did = str_at(data, "agent-nym", "did")?;
                let verkey = str_at(data, "agent-nym", "verkey")?;
                self.store()?
                    .send_nym(&did, &verkey, self.wallet.profile())
                    .await
            }
            AgentEndpointLookup => {
                let did = str_at(data, "agent-endpoint", "did")?;
                self.store()?.get_endpoint(&did).await
            }
            AgentEndpointSend => self.send_endpoint().await,
            SchemaLookup => {
                let key = SchemaKey::from_value(&data["schema"])?;
                self.store()?.get_schema(&key).await
            }
            SchemaSend => {
                self.require(self.caps.originate, "schema-send")?;
                let key = SchemaKey::from_value(&data["schema"])?;
                let attr_names: Vec<String> = data["attr-names"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                self.store()?.send_schema(&key, &attr_names).await
            }
            ClaimDefSend => {
                self.require(self.caps.issue, "claim-def-send")?;
                let key = SchemaKey::from_value(&data["schema"])?;
                let schema = self.store()?.get_schema(&key).await?;
                let seq_no = schema.get("seqNo").and_then(Value::as_u64).ok_or_else(|| {
                    AgentError::sdk(
                        code::ABSENT,
                        format!("schema {} {} not on ledger", key.name, key.version),
                    )
                })?;
                self.send_claim_def(seq_no).await
            }
            MasterSecretSet => {
                self.require(self.caps.hold_prove, "master-secret-set")?;
                let label = data
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                self.wallet.set_master_secret(label);
                Ok(json!({}))
            }
            ClaimOfferCreate => {
                self.require(self.caps.issue, "claim-offer-create")?;
                let key = SchemaKey::from_value(&data["schema"])?;
                let schema = self.store()?.get_schema(&key).await?;
                if schema.as_object().map(|o| o.is_empty()).unwrap_or(true) {
                    return Err(AgentError::sdk(
                        code::ABSENT,
                        format!("schema {} {} not on ledger", key.name, key.version),
                    ));
                }
                let holder_did = data
                    .get("holder-did")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(json!({
                    "origin-did": self.wallet.did(),
                    "schema": {
                        "origin-did": key.origin_did,
                        "name": key.name,
                        "version": key.version,
                    },
                    "holder-did": holder_did,
                    "nonce": wallet::generate_nonce(),
                }))
            }
            ClaimOfferStore => {
                self.require(self.caps.hold_prove, "claim-offer-store")?;
                self.wallet.master_secret()?;
                let offer = data["claim-offer"].clone();
                self.wallet.store_claim_offer(offer.clone());
                Ok(json!({
                    "claim-offer": offer,
                    "prover-did": self.wallet.did(),
                }))
            }
            ClaimCreate => {
                self.require(self.caps.issue, "claim-create")?;
                let claim_req = &data["claim-req"];
                let attrs = data["claim-attrs"].clone();
                let mut claim = json!({
                    "referent": Uuid::new_v4().to_string(),
                    "issued-at": chrono::Utc::now().to_rfc3339(),
                    "issuer-did": self.wallet.did(),
                    "schema": claim_req
                        .get("claim-offer")
                        .and_then(|o| o.get("schema"))
                        .cloned()
                        .unwrap_or(Value::Null),
                    "prover-did": claim_req.get("prover-did").cloned().unwrap_or(Value::Null),
                    "attrs": attrs,
                });
                let signature = self.wallet.sign(claim["attrs"].to_string().as_bytes());
                claim["signature"] = json!(signature);
                Ok(claim)
            }
            ClaimStore => {
                self.require(self.caps.hold_prove, "claim-store")?;
                self.wallet.store_claim(data["claim"].clone());
                Ok(json!({}))
            }
            ClaimRequest => {
                self.require(self.caps.hold_prove, "claim-request")?;
                Ok(json!({"claims": self.find_claims(data)}))
            }
            ProofRequest => {
                self.require(self.caps.hold_prove, "proof-request")?;
                let claims = self.find_claims(data);
                Ok(json!({"proof": self.build_proof(claims)}))
            }
            ProofRequestByReferent => {
                self.require(self.caps.hold_prove, "proof-request-by-referent")?;
                let referents: Vec<&str> = data["referents"]
                    .as_array()
                    .map(|a| a.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let claims: Vec<Value> = self
                    .wallet
                    .claims()
                    .iter()
                    .filter(|c| {
                        c.get("referent")
                            .and_then(Value::as_str)
                            .map(|r| referents.contains(&r))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                Ok(json!({"proof": self.build_proof(claims)}))
            }
            ClaimsReset => {
                self.require(self.caps.hold_prove, "claims-reset")?;
                self.wallet.reset_claims();
                Ok(json!({}))
            }
            VerificationRequest => {
                self.require(self.caps.verify, "verification-request")?;
                self.verify_proof(&data["proof"]).await
            }
        }
    }

    /// Stored claims matching the request's schemata and attribute filter.
    /// An empty filter matches everything; a claim passes a non-empty
    /// attr-match list when any entry's pairs are all present in the claim.
    fn find_claims(&self, data: &Value) -> Vec<Value> {
        let schemata: Vec<SchemaKey> = data["schemata"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| SchemaKey::from_value(v).ok()).collect())
            .unwrap_or_default();
        let empty = Vec::new();
        let attr_match = data["claim-filter"]["attr-match"]
            .as_array()
            .unwrap_or(&empty);

        self.wallet
            .claims()
            .iter()
            .filter(|claim| {
                let schema_ok = schemata.is_empty()
                    || SchemaKey::from_value(&claim["schema"])
                        .map(|k| schemata.contains(&k))
                        .unwrap_or(false);
                let attrs_ok = attr_match.is_empty()
                    || attr_match.iter().any(|entry| {
                        entry.as_object().map_or(false, |pairs| {
                            pairs.iter().all(|(k, v)| claim["attrs"].get(k) == Some(v))
                        })
                    });
                schema_ok && attrs_ok
            })
            .cloned()
            .collect()
    }

    fn build_proof(&self, claims: Vec<Value>) -> Value {
        let body = Value::Array(claims);
        let signature = self.wallet.sign(body.to_string().as_bytes());
        json!({
            "prover-did": self.wallet.did(),
            "claims": body,
            "signature": signature,
        })
    }

    /// Check a proof's signature against the prover's ledger-registered
    /// verification key.
    async fn verify_proof(&self, proof: &Value) -> AgentResult<Value> {
        let prover_did = proof
            .get("prover-did")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::bad_request("proof has no prover-did"))?;
        let nym = self.store()?.get_nym(prover_did).await?;
        let verkey = nym.get("verkey").and_then(Value::as_str).ok_or_else(|| {
            AgentError::sdk(
                code::ABSENT,
                format!("prover nym {prover_did} not on ledger"),
            )
        })?;
        let signature = proof
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::bad_request("proof has no signature"))?;

        let canonical = proof["claims"].to_string();
        let valid = Wallet::verify(verkey, canonical.as_bytes(), signature)?;
        Ok(json!(valid))
    }
}

/// Read a required nested string the protocol table has already validated.
fn str_at(data: &Value, outer: &str, inner: &str) -> AgentResult<String> {
    data.get(outer)
        .and_then(|o| o.get(inner))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AgentError::bad_request(format!("data.{outer} has no {inner}")))
}
