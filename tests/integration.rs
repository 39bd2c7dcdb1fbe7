//! Integration tests: real servers on ephemeral ports over a shared
//! in-process ledger.

use std::sync::Arc;

use serde_json::{json, Value};

use agent_conx::ledger::{LedgerStore, MemoryLedger};

mod helpers {
    use std::collections::BTreeMap;
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use agent_conx::config::{AgentCfg, Config, PeerCfg, PoolCfg};
    use agent_conx::ledger::{write_demo_genesis, LedgerStore};
    use agent_conx::state::AppContext;
    use agent_conx::{api, boot};

    pub fn proto_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("protocol")
    }

    pub async fn genesis_file(dir: &Path) -> PathBuf {
        let path = dir.join("genesis.txn");
        write_demo_genesis(&path).await.unwrap();
        path
    }

    pub struct TestAgent {
        pub addr: SocketAddr,
        pub base_url: String,
        pub ctx: Arc<AppContext>,
    }

    /// Boot one agent against `store` and serve it on an ephemeral port.
    /// The listener is bound first so the booted agent publishes an
    /// endpoint peers can actually reach.
    pub async fn spawn_agent(
        role: &str,
        profile: &str,
        seed: &str,
        origin: &[(&str, &str)],
        trust_anchor_port: u16,
        genesis: &Path,
        store: Arc<dyn LedgerStore>,
    ) -> TestAgent {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Config {
            profile: profile.to_string(),
            pool: PoolCfg {
                genesis_txn_path: genesis.to_path_buf(),
            },
            agent: AgentCfg {
                role: role.to_string(),
                host: "127.0.0.1".into(),
                port: addr.port(),
                seed: seed.to_string(),
                master_secret: Some("org-book-secret".into()),
            },
            trust_anchor: PeerCfg {
                host: "127.0.0.1".into(),
                port: trust_anchor_port,
            },
            origin: origin
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            proto_dir: proto_dir(),
        };

        let (pool, agent) = boot::run(&config, store, reqwest::Client::new())
            .await
            .expect("boot sequence failed");
        let ctx = AppContext::new(config, pool, agent);

        let app = api::create_router(Arc::clone(&ctx));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give server time to start
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        TestAgent {
            addr,
            base_url: format!("http://{}/api/v0", addr),
            ctx,
        }
    }
}

const TRUSTEE_SEED: &str = "000000000000000000000000Trustee1";
const SRI_SEED: &str = "00000000000000000000000SriAgent1";
const ORG_BOOK_SEED: &str = "000000000000000000000000OrgBook1";

fn shared_store() -> Arc<dyn LedgerStore> {
    Arc::new(MemoryLedger::new())
}

#[tokio::test]
async fn test_did_and_health() {
    let dir = tempfile::tempdir().unwrap();
    let genesis = helpers::genesis_file(dir.path()).await;
    let anchor = helpers::spawn_agent(
        "trust-anchor",
        "trust-anchor",
        TRUSTEE_SEED,
        &[],
        0,
        &genesis,
        shared_store(),
    )
    .await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/did", anchor.base_url))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let did: Value = resp.json().await.unwrap();
    assert!(!did.as_str().unwrap().is_empty());

    let resp = client
        .get(format!("http://{}/health", anchor.addr))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["role"], "trust-anchor");
    assert_eq!(body["did"], did);
}

#[tokio::test]
async fn test_unknown_txn_is_an_empty_success() {
    let dir = tempfile::tempdir().unwrap();
    let genesis = helpers::genesis_file(dir.path()).await;
    let anchor = helpers::spawn_agent(
        "trust-anchor",
        "trust-anchor",
        TRUSTEE_SEED,
        &[],
        0,
        &genesis,
        shared_store(),
    )
    .await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/txn/99999", anchor.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({}));

    // the trust anchor's own nym registration is transaction 1
    let resp = client
        .get(format!("{}/txn/1", anchor.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "nym");
}

#[tokio::test]
async fn test_routes_follow_role_capabilities() {
    let store = shared_store();
    let dir = tempfile::tempdir().unwrap();
    let genesis = helpers::genesis_file(dir.path()).await;

    let anchor = helpers::spawn_agent(
        "trust-anchor",
        "trust-anchor",
        TRUSTEE_SEED,
        &[],
        0,
        &genesis,
        Arc::clone(&store),
    )
    .await;
    let sri = helpers::spawn_agent(
        "sri",
        "sri",
        SRI_SEED,
        &[],
        anchor.addr.port(),
        &genesis,
        Arc::clone(&store),
    )
    .await;
    let org_book = helpers::spawn_agent(
        "org-book",
        "org-book",
        ORG_BOOK_SEED,
        &[],
        anchor.addr.port(),
        &genesis,
        store,
    )
    .await;

    let client = reqwest::Client::new();

    // wallet-only routes exist solely on holder-prover roles
    for base in [&anchor.base_url, &sri.base_url] {
        let resp = client
            .post(format!("{base}/master-secret-set"))
            .json(&json!({"type": "master-secret-set", "data": {"label": "x"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "{base}");
        let resp = client
            .post(format!("{base}/claims-reset"))
            .json(&json!({"type": "claims-reset", "data": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "{base}");
    }
    let resp = client
        .post(format!("{}/master-secret-set", org_book.base_url))
        .json(&json!({"type": "master-secret-set", "data": {"label": "fresh-label"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // the protocol document reflects the live proxy-did requirement
    let anchor_doc: Value = client
        .get(format!("{}/protocol", anchor.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        anchor_doc["agent-nym-send"]["data"]["proxy-did"]["required"],
        false
    );
    assert!(anchor_doc.get("master-secret-set").is_none());

    let sri_doc: Value = client
        .get(format!("{}/protocol", sri.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        sri_doc["agent-nym-send"]["data"]["proxy-did"]["required"],
        true
    );
    assert!(sri_doc.get("master-secret-set").is_none());
    assert!(sri_doc.get("claims-reset").is_none());
}

/// Boot a trust anchor and an issuer-capable role configured to originate
/// ("widgets", "1.0"), then look the schema up through both HTTP surfaces.
#[tokio::test]
async fn test_end_to_end_schema_origination() {
    let store = shared_store();
    let dir = tempfile::tempdir().unwrap();
    let genesis = helpers::genesis_file(dir.path()).await;

    let anchor = helpers::spawn_agent(
        "trust-anchor",
        "trust-anchor",
        TRUSTEE_SEED,
        &[],
        0,
        &genesis,
        Arc::clone(&store),
    )
    .await;
    let sri = helpers::spawn_agent(
        "sri",
        "sri",
        SRI_SEED,
        &[("widgets", "1.0")],
        anchor.addr.port(),
        &genesis,
        store,
    )
    .await;

    let client = reqwest::Client::new();
    let sri_did: Value = client
        .get(format!("{}/did", sri.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!sri_did.as_str().unwrap().is_empty());

    let lookup = json!({
        "type": "schema-lookup",
        "data": {
            "schema": {
                "origin-did": sri_did,
                "name": "widgets",
                "version": "1.0",
            }
        }
    });
    for base in [&sri.base_url, &anchor.base_url] {
        let resp = client
            .post(format!("{base}/schema-lookup"))
            .json(&lookup)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "{base}");
        let schema: Value = resp.json().await.unwrap();
        assert!(schema["seqNo"].as_u64().unwrap() > 0, "{base}");
        assert_eq!(schema["data"]["name"], "widgets");
    }
}

#[tokio::test]
async fn test_error_codes_cross_the_boundary() {
    let store = shared_store();
    let dir = tempfile::tempdir().unwrap();
    let genesis = helpers::genesis_file(dir.path()).await;

    let anchor = helpers::spawn_agent(
        "trust-anchor",
        "trust-anchor",
        TRUSTEE_SEED,
        &[],
        0,
        &genesis,
        Arc::clone(&store),
    )
    .await;
    let sri = helpers::spawn_agent(
        "sri",
        "sri",
        SRI_SEED,
        &[],
        anchor.addr.port(),
        &genesis,
        store,
    )
    .await;

    let client = reqwest::Client::new();

    // SDK failure: claim-def-send against a schema nobody originated
    let resp = client
        .post(format!("{}/claim-def-send", sri.base_url))
        .json(&json!({
            "type": "claim-def-send",
            "data": {"schema": {
                "origin-did": "nobody", "name": "ghosts", "version": "0.0",
            }}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error-code"], 212);
    assert!(body["message"].as_str().unwrap().contains("ghosts"));

    // malformed JSON body: generic client-error code
    let resp = client
        .post(format!("{}/schema-lookup", sri.base_url))
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error-code"], 400);

    // validation failure: a proxying role must supply proxy-did
    let resp = client
        .post(format!("{}/agent-nym-send", sri.base_url))
        .json(&json!({
            "type": "agent-nym-send",
            "data": {"agent-nym": {"did": "abc", "verkey": "def"}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error-code"], 400);
    assert!(body["message"].as_str().unwrap().contains("proxy-did"));
}

/// A role without registrar capability forwards agent-nym-send to the trust
/// anchor named by proxy-did, and the write lands on the shared ledger.
#[tokio::test]
async fn test_proxied_nym_send() {
    let store = shared_store();
    let dir = tempfile::tempdir().unwrap();
    let genesis = helpers::genesis_file(dir.path()).await;

    let anchor = helpers::spawn_agent(
        "trust-anchor",
        "trust-anchor",
        TRUSTEE_SEED,
        &[],
        0,
        &genesis,
        Arc::clone(&store),
    )
    .await;
    let sri = helpers::spawn_agent(
        "sri",
        "sri",
        SRI_SEED,
        &[],
        anchor.addr.port(),
        &genesis,
        Arc::clone(&store),
    )
    .await;

    let client = reqwest::Client::new();
    let anchor_did: Value = client
        .get(format!("{}/did", anchor.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/agent-nym-send", sri.base_url))
        .json(&json!({
            "type": "agent-nym-send",
            "data": {
                "proxy-did": anchor_did,
                "agent-nym": {"did": "new-agent-did", "verkey": "new-agent-verkey"},
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let nym = store.get_nym("new-agent-did").await.unwrap();
    assert_eq!(nym["verkey"], "new-agent-verkey");

    // and the lookup is serveable from either agent, unproxied
    let resp = client
        .post(format!("{}/agent-nym-lookup", sri.base_url))
        .json(&json!({
            "type": "agent-nym-lookup",
            "data": {"agent-nym": {"did": "new-agent-did"}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["verkey"], "new-agent-verkey");
}

/// Two concurrent wallet writes through the shared handle must both land:
/// the handle is lock-serialized, not last-write-wins.
#[tokio::test]
async fn test_concurrent_posts_do_not_lose_wallet_state() {
    let store = shared_store();
    let dir = tempfile::tempdir().unwrap();
    let genesis = helpers::genesis_file(dir.path()).await;

    let anchor = helpers::spawn_agent(
        "trust-anchor",
        "trust-anchor",
        TRUSTEE_SEED,
        &[],
        0,
        &genesis,
        Arc::clone(&store),
    )
    .await;
    let org_book = helpers::spawn_agent(
        "org-book",
        "org-book",
        ORG_BOOK_SEED,
        &[],
        anchor.addr.port(),
        &genesis,
        store,
    )
    .await;

    let client = reqwest::Client::new();
    let store_claim = |n: u64| {
        let client = client.clone();
        let url = format!("{}/claim-store", org_book.base_url);
        async move {
            let resp = client
                .post(url)
                .json(&json!({
                    "type": "claim-store",
                    "data": {"claim": {"referent": format!("claim-{n}"), "attrs": {}}}
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }
    };
    tokio::join!(
        store_claim(1),
        store_claim(2),
        store_claim(3),
        store_claim(4)
    );

    let resp = client
        .post(format!("{}/claim-request", org_book.base_url))
        .json(&json!({
            "type": "claim-request",
            "data": {"schemata": [], "claim-filter": {}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["claims"].as_array().unwrap().len(), 4);
}
