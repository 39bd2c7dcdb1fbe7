//! Protocol table: message types, their expected JSON shapes, and the
//! message-template files used to build protocol messages.
//!
//! The registry drives request validation inside the agent's unified
//! message processing and the per-role API description document. The
//! `proxy-did` field is special: its required-ness is not part of the static
//! shape but computed live from the capability classifier for the specific
//! (role, message-type) pair.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde_json::{json, Map, Value};

use crate::error::{AgentError, AgentResult};
use crate::roles::{self, AgentRole};

pub const PROXY_DID: &str = "proxy-did";

/// One of the protocol's message-type slugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    AgentNymLookup,
    AgentNymSend,
    AgentEndpointLookup,
    AgentEndpointSend,
    SchemaLookup,
    SchemaSend,
    ClaimDefSend,
    MasterSecretSet,
    ClaimOfferCreate,
    ClaimOfferStore,
    ClaimCreate,
    ClaimStore,
    ClaimRequest,
    ProofRequest,
    ProofRequestByReferent,
    ClaimsReset,
    VerificationRequest,
}

impl MessageType {
    pub const ALL: [MessageType; 17] = [
        Self::AgentNymLookup,
        Self::AgentNymSend,
        Self::AgentEndpointLookup,
        Self::AgentEndpointSend,
        Self::SchemaLookup,
        Self::SchemaSend,
        Self::ClaimDefSend,
        Self::MasterSecretSet,
        Self::ClaimOfferCreate,
        Self::ClaimOfferStore,
        Self::ClaimCreate,
        Self::ClaimStore,
        Self::ClaimRequest,
        Self::ProofRequest,
        Self::ProofRequestByReferent,
        Self::ClaimsReset,
        Self::VerificationRequest,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Self::AgentNymLookup => "agent-nym-lookup",
            Self::AgentNymSend => "agent-nym-send",
            Self::AgentEndpointLookup => "agent-endpoint-lookup",
            Self::AgentEndpointSend => "agent-endpoint-send",
            Self::SchemaLookup => "schema-lookup",
            Self::SchemaSend => "schema-send",
            Self::ClaimDefSend => "claim-def-send",
            Self::MasterSecretSet => "master-secret-set",
            Self::ClaimOfferCreate => "claim-offer-create",
            Self::ClaimOfferStore => "claim-offer-store",
            Self::ClaimCreate => "claim-create",
            Self::ClaimStore => "claim-store",
            Self::ClaimRequest => "claim-request",
            Self::ProofRequest => "proof-request",
            Self::ProofRequestByReferent => "proof-request-by-referent",
            Self::ClaimsReset => "claims-reset",
            Self::VerificationRequest => "verification-request",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mt| mt.slug() == slug)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Structural description of one JSON field.
#[derive(Debug, Clone)]
pub enum FieldSpec {
    Str,
    Int,
    /// Homogeneous array of the inner spec.
    Array(Box<FieldSpec>),
    /// Object with named, typed fields.
    Obj(ObjSpec),
    /// Free-form object; contents are opaque to the facade.
    Dict,
}

#[derive(Debug, Clone, Default)]
pub struct ObjSpec {
    fields: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct Field {
    name: &'static str,
    spec: FieldSpec,
    required: bool,
}

impl ObjSpec {
    fn new() -> Self {
        Self::default()
    }

    fn field(mut self, name: &'static str, spec: FieldSpec, required: bool) -> Self {
        self.fields.push(Field {
            name,
            spec,
            required,
        });
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// The static table of message types to expected `data` shapes.
pub struct ProtoRegistry {
    shapes: BTreeMap<MessageType, ObjSpec>,
}

/// Process-wide registry. Building it asserts that every message type has a
/// shape; a gap is a configuration error and fails here, not at request time.
pub fn registry() -> &'static ProtoRegistry {
    static REGISTRY: OnceLock<ProtoRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ProtoRegistry::build)
}

fn schema_key_spec() -> FieldSpec {
    FieldSpec::Obj(
        ObjSpec::new()
            .field("origin-did", FieldSpec::Str, true)
            .field("name", FieldSpec::Str, true)
            .field("version", FieldSpec::Str, true),
    )
}

fn claim_filter_spec() -> FieldSpec {
    FieldSpec::Obj(
        ObjSpec::new()
            .field("attr-match", FieldSpec::Array(Box::new(FieldSpec::Dict)), false)
            .field(
                "predicate-match",
                FieldSpec::Array(Box::new(FieldSpec::Dict)),
                false,
            ),
    )
}

fn requested_attrs_spec() -> FieldSpec {
    FieldSpec::Array(Box::new(FieldSpec::Obj(
        ObjSpec::new()
            .field("schema", schema_key_spec(), true)
            .field("names", FieldSpec::Array(Box::new(FieldSpec::Str)), true),
    )))
}

impl ProtoRegistry {
    fn build() -> Self {
        use MessageType::*;

        let mut shapes = BTreeMap::new();

        shapes.insert(
            AgentNymLookup,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field(
                    "agent-nym",
                    FieldSpec::Obj(ObjSpec::new().field("did", FieldSpec::Str, true)),
                    true,
                ),
        );
        shapes.insert(
            AgentNymSend,
            ObjSpec::new().field(PROXY_DID, FieldSpec::Str, false).field(
                "agent-nym",
                FieldSpec::Obj(
                    ObjSpec::new()
                        .field("did", FieldSpec::Str, true)
                        .field("verkey", FieldSpec::Str, true),
                ),
                true,
            ),
        );
        shapes.insert(
            AgentEndpointLookup,
            ObjSpec::new().field(PROXY_DID, FieldSpec::Str, false).field(
                "agent-endpoint",
                FieldSpec::Obj(ObjSpec::new().field("did", FieldSpec::Str, true)),
                true,
            ),
        );
        shapes.insert(
            AgentEndpointSend,
            ObjSpec::new().field(PROXY_DID, FieldSpec::Str, false),
        );
        shapes.insert(
            SchemaLookup,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("schema", schema_key_spec(), true),
        );
        shapes.insert(
            SchemaSend,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("schema", schema_key_spec(), true)
                .field("attr-names", FieldSpec::Array(Box::new(FieldSpec::Str)), true),
        );
        shapes.insert(
            ClaimDefSend,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("schema", schema_key_spec(), true),
        );
        shapes.insert(
            MasterSecretSet,
            ObjSpec::new().field("label", FieldSpec::Str, true),
        );
        shapes.insert(
            ClaimOfferCreate,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("schema", schema_key_spec(), true)
                .field("holder-did", FieldSpec::Str, true),
        );
        shapes.insert(
            ClaimOfferStore,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("claim-offer", FieldSpec::Dict, true),
        );
        shapes.insert(
            ClaimCreate,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("claim-req", FieldSpec::Dict, true)
                .field("claim-attrs", FieldSpec::Dict, true),
        );
        shapes.insert(
            ClaimStore,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("claim", FieldSpec::Dict, true),
        );
        shapes.insert(
            ClaimRequest,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("schemata", FieldSpec::Array(Box::new(schema_key_spec())), true)
                .field("claim-filter", claim_filter_spec(), true)
                .field("requested-attrs", requested_attrs_spec(), false),
        );
        shapes.insert(
            ProofRequest,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("schemata", FieldSpec::Array(Box::new(schema_key_spec())), true)
                .field("claim-filter", claim_filter_spec(), true)
                .field("requested-attrs", requested_attrs_spec(), false),
        );
        shapes.insert(
            ProofRequestByReferent,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("schemata", FieldSpec::Array(Box::new(schema_key_spec())), true)
                .field("referents", FieldSpec::Array(Box::new(FieldSpec::Str)), true)
                .field("requested-attrs", requested_attrs_spec(), false),
        );
        shapes.insert(ClaimsReset, ObjSpec::new());
        shapes.insert(
            VerificationRequest,
            ObjSpec::new()
                .field(PROXY_DID, FieldSpec::Str, false)
                .field("proof-req", FieldSpec::Dict, true)
                .field("proof", FieldSpec::Dict, true),
        );

        for msg_type in MessageType::ALL {
            assert!(
                shapes.contains_key(&msg_type),
                "protocol table has no shape for {msg_type}"
            );
        }

        Self { shapes }
    }

    pub fn shape(&self, msg_type: MessageType) -> &ObjSpec {
        &self.shapes[&msg_type]
    }

    /// Whether the data shape carries a forwarding-DID field.
    pub fn admits_proxy(&self, msg_type: MessageType) -> bool {
        self.shape(msg_type).has_field(PROXY_DID)
    }

    /// Validate an inbound `{type, data}` message against the table, with
    /// `proxy-did` required-ness computed live for this role.
    pub fn validate(&self, role: AgentRole, msg_type: MessageType, msg: &Value) -> AgentResult<()> {
        let obj = msg
            .as_object()
            .ok_or_else(|| AgentError::bad_request("message must be a JSON object"))?;

        match obj.get("type").and_then(Value::as_str) {
            Some(slug) if slug == msg_type.slug() => {}
            Some(slug) => {
                return Err(AgentError::bad_request(format!(
                    "message type {slug} does not match {msg_type}"
                )))
            }
            None => return Err(AgentError::bad_request("message has no type")),
        }

        let data = obj
            .get("data")
            .ok_or_else(|| AgentError::bad_request("message has no data"))?;
        self.validate_obj(role, msg_type, self.shape(msg_type), data, "data")
    }

    fn validate_obj(
        &self,
        role: AgentRole,
        msg_type: MessageType,
        spec: &ObjSpec,
        value: &Value,
        path: &str,
    ) -> AgentResult<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| AgentError::bad_request(format!("{path} must be a JSON object")))?;

        for field in &spec.fields {
            let required = if field.name == PROXY_DID {
                roles::requires_proxy(role, msg_type)
            } else {
                field.required
            };
            match obj.get(field.name) {
                Some(v) => {
                    self.validate_field(role, msg_type, &field.spec, v, &format!("{path}.{}", field.name))?
                }
                None if required => {
                    return Err(AgentError::bad_request(format!(
                        "{path} is missing required property {}",
                        field.name
                    )))
                }
                None => {}
            }
        }
        Ok(())
    }

    fn validate_field(
        &self,
        role: AgentRole,
        msg_type: MessageType,
        spec: &FieldSpec,
        value: &Value,
        path: &str,
    ) -> AgentResult<()> {
        match spec {
            FieldSpec::Str => value
                .as_str()
                .map(|_| ())
                .ok_or_else(|| AgentError::bad_request(format!("{path} must be a string"))),
            FieldSpec::Int => value
                .as_i64()
                .map(|_| ())
                .ok_or_else(|| AgentError::bad_request(format!("{path} must be an integer"))),
            FieldSpec::Dict => value
                .as_object()
                .map(|_| ())
                .ok_or_else(|| AgentError::bad_request(format!("{path} must be a JSON object"))),
            FieldSpec::Array(inner) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| AgentError::bad_request(format!("{path} must be an array")))?;
                for (i, item) in items.iter().enumerate() {
                    self.validate_field(role, msg_type, inner, item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            FieldSpec::Obj(obj_spec) => self.validate_obj(role, msg_type, obj_spec, value, path),
        }
    }

    /// Render the API-description model for one (role, message-type) pair.
    /// Arrays always carry exactly one synthesized sample item; `proxy-did`
    /// required-ness is taken from the classifier, not the static shape.
    pub fn model(&self, role: AgentRole, msg_type: MessageType) -> Value {
        json!({
            "type": {
                "type": "string",
                "required": true,
                "choices": [msg_type.slug()],
            },
            "data": self.render_obj(role, msg_type, self.shape(msg_type)),
        })
    }

    fn render_obj(&self, role: AgentRole, msg_type: MessageType, spec: &ObjSpec) -> Value {
        let mut props = Map::new();
        for field in &spec.fields {
            let required = if field.name == PROXY_DID {
                roles::requires_proxy(role, msg_type)
            } else {
                field.required
            };
            props.insert(
                field.name.to_string(),
                self.render_field(role, msg_type, &field.spec, required),
            );
        }
        Value::Object(props)
    }

    fn render_field(
        &self,
        role: AgentRole,
        msg_type: MessageType,
        spec: &FieldSpec,
        required: bool,
    ) -> Value {
        match spec {
            FieldSpec::Str => json!({"type": "string", "required": required}),
            FieldSpec::Int => json!({"type": "integer", "required": required}),
            FieldSpec::Dict => json!({"type": "object", "required": required}),
            FieldSpec::Obj(obj_spec) => json!({
                "type": "object",
                "required": required,
                "properties": self.render_obj(role, msg_type, obj_spec),
            }),
            FieldSpec::Array(inner) => json!({
                "type": "array",
                "required": required,
                // one sample item, never an empty list: downstream
                // schema-document consumers choke on empty item arrays
                "items": [self.render_field(role, msg_type, inner, true)],
            }),
        }
    }
}

// ---- message templates ----

/// Loader for the message-template JSON files shipped under `protocol/`.
pub struct Templates {
    dir: PathBuf,
}

impl Templates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load the template for one message type.
    pub fn load(&self, msg_type: MessageType) -> AgentResult<Value> {
        let path = self.dir.join(format!("{}.json", msg_type.slug()));
        let text = std::fs::read_to_string(&path).map_err(|e| {
            AgentError::BadConfig(format!("cannot read template {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load the attribute-name list for one (schema-name, version) pair.
    pub fn attr_names(&self, name: &str, version: &str) -> AgentResult<Vec<String>> {
        let path = self
            .dir
            .join("schema-send")
            .join(name)
            .join(version)
            .join("attr-names.json");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            AgentError::BadConfig(format!(
                "cannot read attribute names {}: {e}",
                path.display()
            ))
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Substitute `$name` placeholder strings in a template with the given
/// values. Placeholders occupy whole string positions, so a substitution may
/// insert any JSON value (attribute-name lists, nested objects).
pub fn fill(template: &Value, vars: &[(&str, Value)]) -> Value {
    match template {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                if let Some((_, v)) = vars.iter().find(|(k, _)| *k == name) {
                    return v.clone();
                }
            }
            template.clone()
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| fill(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), fill(v, vars)))
                .collect(),
        ),
        _ => template.clone(),
    }
}
