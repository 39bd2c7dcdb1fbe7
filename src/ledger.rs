//! Ledger access: the `LedgerStore` trait the agent consumes, the pool
//! handle opened from a genesis-transaction file, and an in-process
//! reference implementation used by demos and the integration tests.
//!
//! A production deployment implements `LedgerStore` against a real ledger
//! client; everything above this seam treats it as an opaque capability
//! provider.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};

use crate::error::{AgentError, AgentResult};

/// Native numeric codes carried by SDK failures, preserved verbatim in the
/// HTTP error envelope.
pub mod code {
    /// Wallet or pool state problem (e.g. no master secret set).
    pub const WALLET_STATE: i64 = 210;
    /// Referenced item is not on the ledger or in the wallet.
    pub const ABSENT: i64 = 212;
    /// Operation attempted through a closed pool or agent handle.
    pub const CLOSED: i64 = 300;
    /// Attempt to re-create an entity that already exists on the ledger.
    pub const DUPLICATE: i64 = 600;
    /// The agent's role does not implement the requested operation natively.
    pub const NOT_CAPABLE: i64 = 1003;
}

/// (origin DID, name, version): the unique identity of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaKey {
    pub origin_did: String,
    pub name: String,
    pub version: String,
}

impl SchemaKey {
    pub fn new(
        origin_did: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            origin_did: origin_did.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse from a message's `schema` production.
    pub fn from_value(value: &Value) -> AgentResult<Self> {
        let field = |name: &str| -> AgentResult<String> {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| AgentError::bad_request(format!("schema has no {name}")))
        };
        Ok(Self {
            origin_did: field("origin-did")?,
            name: field("name")?,
            version: field("version")?,
        })
    }
}

/// Ledger operations the agent consumes. Lookups return `{}` for absent
/// entities — absence is a valid outcome, not an error.
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    async fn get_nym(&self, did: &str) -> AgentResult<Value>;
    async fn send_nym(&self, did: &str, verkey: &str, alias: &str) -> AgentResult<Value>;

    async fn get_endpoint(&self, did: &str) -> AgentResult<Value>;
    async fn send_endpoint(&self, did: &str, endpoint: &str) -> AgentResult<Value>;

    async fn get_schema(&self, key: &SchemaKey) -> AgentResult<Value>;
    async fn send_schema(&self, key: &SchemaKey, attr_names: &[String]) -> AgentResult<Value>;

    async fn get_claim_def(&self, schema_seq_no: u64, issuer_did: &str) -> AgentResult<Value>;
    async fn send_claim_def(&self, schema_seq_no: u64, issuer_did: &str) -> AgentResult<Value>;

    async fn get_txn(&self, seq_no: u64) -> AgentResult<Value>;
}

/// Connection to the ledger network, opened once at boot from a
/// genesis-transaction file and closed on shutdown. Ledger operations fail
/// with a `CLOSED` code once the pool is closed.
#[derive(Debug)]
pub struct Pool {
    name: String,
    genesis_txn_path: PathBuf,
    store: Arc<dyn LedgerStore>,
    open: AtomicBool,
}

impl Pool {
    pub fn new(
        name: impl Into<String>,
        genesis_txn_path: impl Into<PathBuf>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            name: name.into(),
            genesis_txn_path: genesis_txn_path.into(),
            store,
            open: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the connection: the genesis file must exist and hold one JSON
    /// transaction per non-empty line.
    pub async fn open(&self) -> AgentResult<()> {
        let path = &self.genesis_txn_path;
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            AgentError::Pool(format!("cannot read genesis file {}: {e}", path.display()))
        })?;

        let mut txn_count = 0usize;
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            serde_json::from_str::<Value>(line).map_err(|e| {
                AgentError::Pool(format!(
                    "genesis file {} line {}: {e}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            txn_count += 1;
        }
        if txn_count == 0 {
            return Err(AgentError::Pool(format!(
                "genesis file {} holds no transactions",
                path.display()
            )));
        }

        self.open.store(true, Ordering::SeqCst);
        tracing::info!(pool = %self.name, genesis = %path.display(), txn_count, "pool open");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// The ledger store, available only while the pool is open.
    pub fn store(&self) -> AgentResult<Arc<dyn LedgerStore>> {
        if !self.is_open() {
            return Err(AgentError::sdk(
                code::CLOSED,
                format!("pool {} is closed", self.name),
            ));
        }
        Ok(Arc::clone(&self.store))
    }

    pub async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::info!(pool = %self.name, "pool closed");
        }
    }
}

/// In-process reference ledger. Every write allocates a transaction
/// sequence number; schema and claim-definition writes are
/// create-once (duplicates fail with the ledger's native code).
#[derive(Debug)]
pub struct MemoryLedger {
    nyms: DashMap<String, Value>,
    endpoints: DashMap<String, Value>,
    schemata: DashMap<SchemaKey, u64>,
    claim_defs: DashMap<(u64, String), u64>,
    txns: DashMap<u64, Value>,
    next_seq: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            nyms: DashMap::new(),
            endpoints: DashMap::new(),
            schemata: DashMap::new(),
            claim_defs: DashMap::new(),
            txns: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    fn record_txn(&self, txn_type: &str, data: Value) -> u64 {
        let seq_no = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.txns.insert(
            seq_no,
            json!({"seqNo": seq_no, "type": txn_type, "data": data}),
        );
        seq_no
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_nym(&self, did: &str) -> AgentResult<Value> {
        Ok(self
            .nyms
            .get(did)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| json!({})))
    }

    async fn send_nym(&self, did: &str, verkey: &str, alias: &str) -> AgentResult<Value> {
        let nym = json!({"did": did, "verkey": verkey, "alias": alias});
        self.record_txn("nym", nym.clone());
        self.nyms.insert(did.to_string(), nym.clone());
        Ok(nym)
    }

    async fn get_endpoint(&self, did: &str) -> AgentResult<Value> {
        Ok(self
            .endpoints
            .get(did)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| json!({})))
    }

    async fn send_endpoint(&self, did: &str, endpoint: &str) -> AgentResult<Value> {
        let attrib = json!({"did": did, "endpoint": endpoint});
        self.record_txn("attrib", attrib.clone());
        self.endpoints.insert(did.to_string(), attrib.clone());
        Ok(attrib)
    }

    async fn get_schema(&self, key: &SchemaKey) -> AgentResult<Value> {
        match self.schemata.get(key) {
            Some(seq_no) => self.get_txn(*seq_no.value()).await,
            None => Ok(json!({})),
        }
    }

    async fn send_schema(&self, key: &SchemaKey, attr_names: &[String]) -> AgentResult<Value> {
        if self.schemata.contains_key(key) {
            return Err(AgentError::sdk(
                code::DUPLICATE,
                format!("schema {} {} already on ledger", key.name, key.version),
            ));
        }
        let seq_no = self.record_txn(
            "schema",
            json!({
                "identifier": key.origin_did,
                "name": key.name,
                "version": key.version,
                "attr_names": attr_names,
            }),
        );
        self.schemata.insert(key.clone(), seq_no);
        self.get_txn(seq_no).await
    }

    async fn get_claim_def(&self, schema_seq_no: u64, issuer_did: &str) -> AgentResult<Value> {
        match self.claim_defs.get(&(schema_seq_no, issuer_did.to_string())) {
            Some(seq_no) => self.get_txn(*seq_no.value()).await,
            None => Ok(json!({})),
        }
    }

    async fn send_claim_def(&self, schema_seq_no: u64, issuer_did: &str) -> AgentResult<Value> {
        if !self.txns.contains_key(&schema_seq_no) {
            return Err(AgentError::sdk(
                code::ABSENT,
                format!("no schema at seqNo {schema_seq_no}"),
            ));
        }
        let key = (schema_seq_no, issuer_did.to_string());
        if self.claim_defs.contains_key(&key) {
            return Err(AgentError::sdk(
                code::DUPLICATE,
                format!("claim definition for schema {schema_seq_no} already on ledger"),
            ));
        }
        let seq_no = self.record_txn(
            "claim-def",
            json!({
                "ref": schema_seq_no,
                "origin": issuer_did,
                "signature_type": "CL",
            }),
        );
        self.claim_defs.insert(key, seq_no);
        self.get_txn(seq_no).await
    }

    async fn get_txn(&self, seq_no: u64) -> AgentResult<Value> {
        Ok(self
            .txns
            .get(&seq_no)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| json!({})))
    }
}

/// Write a minimal but well-formed genesis file for tests and local demos.
pub async fn write_demo_genesis(path: &Path) -> AgentResult<()> {
    let lines = (1..=4)
        .map(|n| {
            json!({
                "txn": {
                    "data": {
                        "data": {"alias": format!("Node{n}"), "node_ip": "127.0.0.1"},
                    },
                    "type": "0",
                },
                "txnMetadata": {"seqNo": n},
                "ver": "1",
            })
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, lines).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> MemoryLedger {
        MemoryLedger::new()
    }

    #[tokio::test]
    async fn absent_lookups_return_empty_productions() {
        let store = ledger();
        assert_eq!(store.get_nym("nobody").await.unwrap(), json!({}));
        assert_eq!(store.get_txn(99999).await.unwrap(), json!({}));
        let key = SchemaKey::new("did", "widgets", "1.0");
        assert_eq!(store.get_schema(&key).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn schema_is_create_once() {
        let store = ledger();
        let key = SchemaKey::new("did", "widgets", "1.0");
        let attrs = vec!["height".to_string()];

        let sent = store.send_schema(&key, &attrs).await.unwrap();
        let seq_no = sent["seqNo"].as_u64().unwrap();
        assert_eq!(store.get_schema(&key).await.unwrap()["seqNo"], seq_no);

        let err = store.send_schema(&key, &attrs).await.unwrap_err();
        assert_eq!(err.error_code(), code::DUPLICATE);
    }

    #[tokio::test]
    async fn claim_def_requires_existing_schema() {
        let store = ledger();
        let err = store.send_claim_def(42, "issuer").await.unwrap_err();
        assert_eq!(err.error_code(), code::ABSENT);

        let key = SchemaKey::new("issuer", "widgets", "1.0");
        let schema = store
            .send_schema(&key, &["height".to_string()])
            .await
            .unwrap();
        let seq_no = schema["seqNo"].as_u64().unwrap();

        store.send_claim_def(seq_no, "issuer").await.unwrap();
        let err = store.send_claim_def(seq_no, "issuer").await.unwrap_err();
        assert_eq!(err.error_code(), code::DUPLICATE);
    }

    #[tokio::test]
    async fn writes_record_retrievable_txns() {
        let store = ledger();
        let nym = store.send_nym("did-1", "vk-1", "did-1").await.unwrap();
        assert_eq!(nym["verkey"], "vk-1");
        assert_eq!(store.get_txn(1).await.unwrap()["type"], "nym");
    }

    #[tokio::test]
    async fn pool_validates_genesis_file() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn LedgerStore> = Arc::new(ledger());

        // missing file
        let pool = Pool::new("pool.test", dir.path().join("nope.txn"), Arc::clone(&store));
        assert!(matches!(pool.open().await, Err(AgentError::Pool(_))));

        // malformed line
        let bad = dir.path().join("bad.txn");
        std::fs::write(&bad, "{\"ok\":1}\nnot json\n").unwrap();
        let pool = Pool::new("pool.test", &bad, Arc::clone(&store));
        assert!(matches!(pool.open().await, Err(AgentError::Pool(_))));

        // valid demo genesis
        let good = dir.path().join("good.txn");
        write_demo_genesis(&good).await.unwrap();
        let pool = Pool::new("pool.test", &good, store);
        pool.open().await.unwrap();
        assert!(pool.is_open());
    }

    #[tokio::test]
    async fn closed_pool_refuses_operations() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = dir.path().join("genesis.txn");
        write_demo_genesis(&genesis).await.unwrap();

        let store: Arc<dyn LedgerStore> = Arc::new(ledger());
        let pool = Pool::new("pool.test", &genesis, store);
        assert_eq!(pool.store().unwrap_err().error_code(), code::CLOSED);

        pool.open().await.unwrap();
        assert!(pool.store().is_ok());

        pool.close().await;
        assert_eq!(pool.store().unwrap_err().error_code(), code::CLOSED);
    }
}
