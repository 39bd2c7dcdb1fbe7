//! Application context: the single-instance-per-process state built by the
//! boot sequence and shared with every request handler.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::agent::Agent;
use crate::config::Config;
use crate::ledger::Pool;
use crate::roles::AgentRole;

pub struct AppContext {
    pub config: Config,
    pub role: AgentRole,
    pub pool: Arc<Pool>,
    /// The one shared agent handle. Handlers hold this lock across their
    /// SDK awaits, so concurrent requests cannot interleave a
    /// read-modify-write of the handle.
    pub agent: Mutex<Agent>,
    /// Start time for uptime reporting.
    pub start_time: Instant,
}

impl AppContext {
    pub fn new(config: Config, pool: Arc<Pool>, agent: Agent) -> Arc<Self> {
        Arc::new(Self {
            config,
            role: agent.role(),
            pool,
            agent: Mutex::new(agent),
            start_time: Instant::now(),
        })
    }

    /// Ordered teardown: close the agent capability, then the pool. Both
    /// are best-effort and safe to call on an already-closed context.
    pub async fn close(&self) {
        self.agent.lock().await.close();
        self.pool.close().await;
    }
}
