use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use config::FileFormat;
use serde::Deserialize;

use crate::error::{AgentError, AgentResult};

/// Process-wide configuration, read once at boot from a base file plus a
/// per-profile overlay and immutable thereafter.
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent profile name; several profiles may share a role.
    pub profile: String,
    pub pool: PoolCfg,
    pub agent: AgentCfg,
    pub trust_anchor: PeerCfg,
    /// Schemata this agent originates: name to comma-separated versions.
    pub origin: BTreeMap<String, String>,
    /// Directory holding the message-template files.
    pub proto_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolCfg {
    pub genesis_txn_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentCfg {
    pub role: String,
    pub host: String,
    pub port: u16,
    pub seed: String,
    #[serde(default)]
    pub master_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerCfg {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    pool: PoolCfg,
    agent: AgentCfg,
    trust_anchor: PeerCfg,
    #[serde(default)]
    origin: BTreeMap<String, String>,
}

impl Config {
    /// Load from the environment: `AGENT_PROFILE` selects the overlay,
    /// `CONFIG_DIR` and `PROTO_DIR` relocate the file trees.
    pub fn load() -> AgentResult<Self> {
        let profile = env::var("AGENT_PROFILE")
            .unwrap_or_else(|_| "trust-anchor".into())
            .to_lowercase()
            .replace(' ', ""); // profile names a pool directory: spaces are evil
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());
        let proto_dir = env::var("PROTO_DIR").unwrap_or_else(|_| "protocol".into());
        Self::load_from(Path::new(&config_dir), Path::new(&proto_dir), &profile)
    }

    /// Load the base file and the profile overlay from `config_dir`.
    pub fn load_from(config_dir: &Path, proto_dir: &Path, profile: &str) -> AgentResult<Self> {
        let paths = [
            config_dir.join("config.ini"),
            config_dir
                .join("agent-profile")
                .join(format!("{profile}.ini")),
        ];
        if !paths.iter().all(|p| p.is_file()) {
            return Err(AgentError::MissingConfig(paths.to_vec()));
        }

        let mut builder = config::Config::builder();
        for path in &paths {
            let text = expand_env(&std::fs::read_to_string(path)?);
            builder = builder.add_source(config::File::from_str(&text, FileFormat::Ini));
        }
        let raw: RawConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AgentError::BadConfig(e.to_string()))?;

        Ok(Self {
            profile: profile.to_string(),
            pool: raw.pool,
            agent: raw.agent,
            trust_anchor: raw.trust_anchor,
            origin: raw.origin,
            proto_dir: proto_dir.to_path_buf(),
        })
    }

    /// The endpoint this agent publishes on the ledger.
    pub fn agent_endpoint(&self) -> String {
        format!("http://{}:{}/api/v0", self.agent.host, self.agent.port)
    }

    /// Base URL of the configured trust-anchor peer agent.
    pub fn trust_anchor_url(&self) -> String {
        format!(
            "http://{}:{}/api/v0",
            self.trust_anchor.host, self.trust_anchor.port
        )
    }
}

/// Expand `${VAR}` references from the process environment; unset variables
/// expand to the empty string, as the original configuration layer did.
fn expand_env(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let var = &rest[start + 2..start + 2 + end];
                out.push_str(&env::var(var).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
