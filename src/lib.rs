//! Agent connector: an HTTP JSON facade over identity/ledger agent
//! operations.
//!
//! ## Architecture
//!
//! - **Roles**: each process is one of four agent roles with a fixed
//!   capability set; what it serves natively versus proxies to a peer is a
//!   pure function of that set
//! - **Boot sequence**: one sequential pass that opens the pool,
//!   establishes the agent's ledger identity, and originates configured
//!   schemata before any request is accepted
//! - **Dispatch**: one shared agent handle behind a lock processes every
//!   protocol message, validating it against the static protocol table
//! - **Ledger**: consumed through the `LedgerStore` trait; an in-process
//!   reference implementation backs demos and tests

pub mod agent;
pub mod api;
pub mod boot;
pub mod config;
pub mod error;
pub mod ledger;
pub mod proto;
pub mod roles;
pub mod state;
pub mod wallet;

pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use state::AppContext;
