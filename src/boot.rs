//! One-shot boot sequence: opens the pool, establishes the agent's ledger
//! identity, and originates configured schemata before the HTTP layer is
//! allowed to serve. Any failure here is fatal.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::agent::Agent;
use crate::config::Config;
use crate::error::{AgentError, AgentResult};
use crate::ledger::{LedgerStore, Pool};
use crate::proto::{fill, registry, MessageType, Templates};
use crate::roles::AgentRole;
use crate::wallet::Wallet;

/// Run the boot sequence to completion, returning the open pool and the
/// ready agent handle.
pub async fn run(
    cfg: &Config,
    store: Arc<dyn LedgerStore>,
    http: reqwest::Client,
) -> AgentResult<(Arc<Pool>, Agent)> {
    // build the protocol table now: a gap fails boot, not a request
    let _ = registry();

    let role = AgentRole::from_config(&cfg.agent.role).ok_or_else(|| {
        AgentError::UnsupportedRole {
            profile: cfg.profile.clone(),
            role: cfg.agent.role.clone(),
        }
    })?;
    tracing::debug!(profile = %cfg.profile, %role, "starting boot sequence");

    let pool = Arc::new(Pool::new(
        format!("pool.{}", cfg.profile),
        &cfg.pool.genesis_txn_path,
        store,
    ));
    pool.open().await?;
    if !pool.is_open() {
        return Err(AgentError::Pool("pool reports no handle after open".into()));
    }

    let wallet = Wallet::create(&cfg.agent.seed, &cfg.profile)?;
    let mut agent = Agent::new(
        role,
        wallet,
        Arc::clone(&pool),
        cfg.agent_endpoint(),
        http.clone(),
    );
    agent.open()?;
    if agent.did().is_empty() {
        return Err(AgentError::Wallet("agent has no DID after open".into()));
    }

    let templates = Templates::new(&cfg.proto_dir);

    match role {
        AgentRole::TrustAnchor => {
            if is_empty(&agent.get_nym(agent.did()).await?) {
                let (did, verkey) = (agent.did().to_owned(), agent.verkey().to_owned());
                agent.send_nym(&did, &verkey).await?;
                tracing::info!(did = %did, "registered own nym");
            }
            if is_empty(&agent.get_endpoint(agent.did()).await?) {
                agent.send_endpoint().await?;
            }
            originate(&mut agent, cfg, &templates).await?;
        }
        AgentRole::Sri | AgentRole::OrgBook | AgentRole::BcRegistrar => {
            if is_empty(&agent.get_nym(agent.did()).await?) {
                register_via_trust_anchor(&agent, cfg, &http, &templates).await?;
            }
            if is_empty(&agent.get_endpoint(agent.did()).await?) {
                agent.send_endpoint().await?;
            }

            if matches!(role, AgentRole::Sri | AgentRole::BcRegistrar) {
                originate(&mut agent, cfg, &templates).await?;
            }

            if role == AgentRole::OrgBook {
                // the SDK state is shared across sibling processes and
                // forbids re-registering a label until all of them exit, so
                // each process salts the configured label with its pid
                let label = cfg.agent.master_secret.clone().ok_or_else(|| {
                    AgentError::BadConfig(format!(
                        "profile {} has no master_secret configured",
                        cfg.profile
                    ))
                })?;
                agent.create_master_secret(format!("{label}.{}", std::process::id()));
            }
        }
    }

    Ok((pool, agent))
}

/// Register this agent's nym through the configured trust-anchor peer:
/// GET its DID, then POST an agent-nym-send message to it. Any failure is
/// fatal for boot.
async fn register_via_trust_anchor(
    agent: &Agent,
    cfg: &Config,
    http: &reqwest::Client,
    templates: &Templates,
) -> AgentResult<()> {
    let base = cfg.trust_anchor_url();
    let unavailable = |detail: String| {
        tracing::error!(
            profile = %cfg.profile,
            detail = %detail,
            "agent nym is not on the ledger, but trust anchor is not responding"
        );
        AgentError::TrustAnchorUnavailable(cfg.profile.clone())
    };

    let resp = http
        .get(format!("{base}/did"))
        .send()
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(unavailable(format!("GET did returned {}", resp.status())));
    }
    let anchor_did: String = resp.json().await.map_err(|e| unavailable(e.to_string()))?;
    if anchor_did.is_empty() {
        return Err(unavailable("trust anchor returned an empty DID".into()));
    }
    tracing::debug!(profile = %cfg.profile, anchor_did = %anchor_did, "registering nym via trust anchor");

    let template = templates.load(MessageType::AgentNymSend)?;
    let msg = fill(
        &template,
        &[
            ("did", json!(agent.did())),
            ("verkey", json!(agent.verkey())),
        ],
    );
    let resp = http
        .post(format!("{base}/agent-nym-send"))
        .json(&msg)
        .send()
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(unavailable(format!(
            "agent-nym-send returned {}",
            resp.status()
        )));
    }
    Ok(())
}

/// Send the schemata configuration assigns to this agent, looking each one
/// up first so origination is idempotent across restarts; issuer-capable
/// roles also ensure a claim definition exists per schema.
pub async fn originate(agent: &mut Agent, cfg: &Config, templates: &Templates) -> AgentResult<()> {
    for (schema_name, versions) in &cfg.origin {
        for version in versions.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let lookup = fill(
                &templates.load(MessageType::SchemaLookup)?,
                &[
                    ("did", json!(agent.did())),
                    ("name", json!(schema_name)),
                    ("version", json!(version)),
                ],
            );
            let mut schema = agent.process_post(&lookup).await?;

            if is_empty(&schema) {
                let attr_names = templates.attr_names(schema_name, version)?;
                let send = fill(
                    &templates.load(MessageType::SchemaSend)?,
                    &[
                        ("did", json!(agent.did())),
                        ("name", json!(schema_name)),
                        ("version", json!(version)),
                        ("attr-names", json!(attr_names)),
                    ],
                );
                schema = agent.process_post(&send).await?;
                tracing::info!(schema = %schema_name, version, "originated schema");
            }
            if is_empty(&schema) {
                return Err(AgentError::Boot(format!(
                    "schema {schema_name} {version} absent after origination"
                )));
            }

            if agent.caps().issue {
                let seq_no = schema.get("seqNo").and_then(Value::as_u64).ok_or_else(|| {
                    AgentError::Boot(format!("schema {schema_name} {version} has no seqNo"))
                })?;
                if is_empty(&agent.get_claim_def(seq_no).await?) {
                    agent.send_claim_def(seq_no).await?;
                    tracing::info!(schema = %schema_name, version, "created claim definition on ledger");
                } else {
                    tracing::info!(schema = %schema_name, version, "using existing claim definition on ledger");
                }
            }
        }
    }
    Ok(())
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
