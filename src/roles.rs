//! Agent roles and the capability classifier.
//!
//! Each role resolves to a static capability record; whether a message type
//! is offered at all, and whether it must be proxied to a peer agent, are
//! pure functions over that record and the protocol table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::proto::{registry, MessageType};

/// The closed set of roles an agent process can be configured as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    TrustAnchor,
    Sri,
    OrgBook,
    BcRegistrar,
}

/// What a role can do natively on the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Can write agent nyms to the ledger on behalf of others.
    pub register: bool,
    /// Can originate schemata.
    pub originate: bool,
    /// Can create claim definitions, claim offers, and claims.
    pub issue: bool,
    /// Can store claims and respond to claim/proof requests.
    pub hold_prove: bool,
    /// Can verify proofs.
    pub verify: bool,
}

impl AgentRole {
    /// Parse the configured role string. The original configuration format
    /// allows mixed case and spaces; both are normalized away here.
    pub fn from_config(role: &str) -> Option<Self> {
        match role.to_lowercase().replace(' ', "").as_str() {
            "trust-anchor" => Some(Self::TrustAnchor),
            "sri" => Some(Self::Sri),
            "org-book" => Some(Self::OrgBook),
            "bc-registrar" => Some(Self::BcRegistrar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrustAnchor => "trust-anchor",
            Self::Sri => "sri",
            Self::OrgBook => "org-book",
            Self::BcRegistrar => "bc-registrar",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::TrustAnchor => Capabilities {
                register: true,
                originate: true,
                ..Capabilities::default()
            },
            Self::Sri => Capabilities {
                originate: true,
                issue: true,
                verify: true,
                ..Capabilities::default()
            },
            Self::OrgBook => Capabilities {
                hold_prove: true,
                ..Capabilities::default()
            },
            Self::BcRegistrar => Capabilities {
                originate: true,
                issue: true,
                ..Capabilities::default()
            },
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `role` must forward `msg_type` to a peer agent that natively
/// implements it. Universal ledger lookups never require proxying;
/// role-restricted writes require it exactly when the capability is absent.
pub fn requires_proxy(role: AgentRole, msg_type: MessageType) -> bool {
    use MessageType::*;

    let caps = role.capabilities();
    match msg_type {
        AgentNymLookup | AgentEndpointLookup | AgentEndpointSend | SchemaLookup => false,
        AgentNymSend => !caps.register,
        SchemaSend => !caps.originate,
        ClaimDefSend | ClaimOfferCreate | ClaimCreate => !caps.issue,
        ClaimOfferStore | ClaimRequest | ClaimStore | ProofRequest | ProofRequestByReferent
        | MasterSecretSet | ClaimsReset => !caps.hold_prove,
        VerificationRequest => !caps.verify,
    }
}

/// Whether `role` exposes `msg_type` at its HTTP boundary at all. Wallet-only
/// operations are offered solely to holder-prover roles; everything else is
/// offered whenever its payload shape admits a forwarding DID.
pub fn offers(role: AgentRole, msg_type: MessageType) -> bool {
    use MessageType::*;

    match msg_type {
        MasterSecretSet | ClaimsReset => role.capabilities().hold_prove,
        _ => registry().admits_proxy(msg_type),
    }
}

/// Offered and handled locally, without a forwarding hop.
pub fn is_native(role: AgentRole, msg_type: MessageType) -> bool {
    offers(role, msg_type) && !requires_proxy(role, msg_type)
}
