//! The version catalog: the immutable source of truth for which wire
//! protocol versions the host understands, what each permits, and how to
//! translate between them.

use crate::capabilities::{Capability, Implementation, VersionDescriptor};
use crate::envelope::RpcEnvelope;
use crate::error::ProtocolError;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    pub version: String,
    pub features: Vec<Capability>,
    pub is_backward_compatible: bool,
    pub is_deprecated: bool,
    pub details: String,
}

/// The result of `validateMessage`: never fatal on its own, a caller
/// decides what to do with warnings vs. errors.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn with_error(mut self, message: impl Into<String>) -> Self {
        self.ok = false;
        self.errors.push(message.into());
        self
    }

    fn with_warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }
}

/// A function that rewrites a message from one adjacent version's shape to
/// another. The catalog composes these along the path between two
/// versions in `upgrade_message`.
pub type MessageTransformer = fn(Value) -> Value;

/// An immutable, ordered (newest-first) table of known protocol versions.
///
/// Construction is the only place the table can change; every query
/// method borrows `&self`.
pub struct VersionCatalog {
    /// Newest to oldest.
    versions: Vec<VersionDescriptor>,
    /// Transformer from `versions[i].id` to `versions[i-1].id` (towards
    /// older) and back, keyed by `(from, to)`.
    transformers: HashMap<(String, String), MessageTransformer>,
}

impl VersionCatalog {
    pub fn new(versions: Vec<VersionDescriptor>) -> Self {
        Self {
            versions,
            transformers: HashMap::new(),
        }
    }

    /// The catalog this workspace ships by default: two protocol
    /// generations, the newer one backward-compatible with the older.
    pub fn default_catalog() -> Self {
        let newest = VersionDescriptor::new(
            "2025-03-26",
            [
                Capability::Tools,
                Capability::Resources,
                Capability::Prompts,
                Capability::Sampling,
                Capability::Roots,
                Capability::Notifications,
                Capability::Progress,
                Capability::Cancellation,
            ],
        )
        .with_backward_compatible(["2024-11-05"]);

        let previous = VersionDescriptor::new(
            "2024-11-05",
            [
                Capability::Tools,
                Capability::Resources,
                Capability::Prompts,
                Capability::Notifications,
            ],
        );

        let legacy = VersionDescriptor::new(
            "2024-09-24",
            [Capability::Tools, Capability::Resources],
        );

        Self::new(vec![newest, previous, legacy])
    }

    pub fn with_transformer(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        transformer: MessageTransformer,
    ) -> Self {
        self.transformers.insert((from.into(), to.into()), transformer);
        self
    }

    /// Newest first.
    pub fn supported_versions(&self) -> Vec<&str> {
        self.versions.iter().map(|v| v.id.as_str()).collect()
    }

    pub fn descriptor(&self, version: &str) -> Option<&VersionDescriptor> {
        self.versions.iter().find(|v| v.id == version)
    }

    pub fn capabilities_of(&self, version: &str) -> Result<Vec<Capability>, ProtocolError> {
        let descriptor = self
            .descriptor(version)
            .ok_or_else(|| ProtocolError::UnknownVersion(version.to_string()))?;
        Ok(descriptor.features.0.iter().copied().collect())
    }

    /// Select a mutual version from the peer-offered list. Preference
    /// order: exact mutual match starting from the host's newest; then
    /// backward-compatible matches in the same order.
    pub fn negotiate(&self, peer_versions: &[String]) -> Result<Negotiated, ProtocolError> {
        for descriptor in &self.versions {
            if peer_versions.iter().any(|p| p == &descriptor.id) {
                return Ok(Negotiated {
                    version: descriptor.id.clone(),
                    features: descriptor.features.0.iter().copied().collect(),
                    is_backward_compatible: false,
                    is_deprecated: false,
                    details: format!("exact match on {}", descriptor.id),
                });
            }
        }

        for descriptor in &self.versions {
            for older in &descriptor.backward_compatible {
                if peer_versions.iter().any(|p| p == older) {
                    return Ok(Negotiated {
                        version: descriptor.id.clone(),
                        features: descriptor.features.0.iter().copied().collect(),
                        is_backward_compatible: true,
                        is_deprecated: false,
                        details: format!(
                            "peer offered {older}, host {} declares it backward compatible",
                            descriptor.id
                        ),
                    });
                }
            }
        }

        Err(ProtocolError::NoCompatibleVersion {
            offered: peer_versions.to_vec(),
        })
    }

    /// Enforce JSON-RPC 2.0 shape and capability gating for a single
    /// outgoing or incoming envelope.
    pub fn validate_message(&self, envelope: &RpcEnvelope, version: &str) -> ValidationOutcome {
        let descriptor = match self.descriptor(version) {
            Some(d) => d,
            None => {
                return ValidationOutcome::ok()
                    .with_error(format!("unknown protocol version: {version}"))
            }
        };

        let mut outcome = ValidationOutcome::ok();

        let method = match envelope.method() {
            Some(m) => m,
            None => return outcome, // responses carry no method to gate
        };

        let category = method.split('/').next().unwrap_or(method);
        if let Some(capability) = Capability::for_category(category) {
            if !descriptor.supports(capability) {
                outcome = outcome.with_error(format!(
                    "method {method} requires capability {:?} not enabled by version {version}",
                    capability
                ));
            }
        }

        if method == "initialize" {
            if let RpcEnvelope::Request(req) = envelope {
                if let Some(params) = &req.params {
                    let declares_progress = params
                        .get("capabilities")
                        .and_then(|c| c.get("progress"))
                        .is_some();
                    if declares_progress && !descriptor.supports(Capability::Progress) {
                        outcome = outcome.with_warning(
                            "initialize declares progress capability unsupported by negotiated version",
                        );
                    }
                    let declares_cancellation = params
                        .get("capabilities")
                        .and_then(|c| c.get("cancellation"))
                        .is_some();
                    if declares_cancellation && !descriptor.supports(Capability::Cancellation) {
                        outcome = outcome.with_warning(
                            "initialize declares cancellation capability unsupported by negotiated version",
                        );
                    }
                }
            }
        }

        outcome
    }

    /// Compose adjacent transformers along the path derived from the
    /// ordered version list.
    pub fn upgrade_message(&self, msg: Value, from: &str, to: &str) -> Result<Value, ProtocolError> {
        if from == to {
            return Ok(msg);
        }

        let from_idx = self
            .versions
            .iter()
            .position(|v| v.id == from)
            .ok_or_else(|| ProtocolError::UnknownVersion(from.to_string()))?;
        let to_idx = self
            .versions
            .iter()
            .position(|v| v.id == to)
            .ok_or_else(|| ProtocolError::UnknownVersion(to.to_string()))?;

        let step: isize = if from_idx <= to_idx { 1 } else { -1 };
        let mut current = msg;
        let mut cursor = from_idx as isize;
        let target = to_idx as isize;
        while cursor != target {
            let next = cursor + step;
            let from_id = self.versions[cursor as usize].id.clone();
            let to_id = self.versions[next as usize].id.clone();
            let transformer = self
                .transformers
                .get(&(from_id, to_id))
                .ok_or_else(|| ProtocolError::NoUpgradePath {
                    from: from.to_string(),
                    to: to.to_string(),
                })?;
            current = transformer(current);
            cursor = next;
        }

        Ok(current)
    }

    /// Build the `initialize` request params consistent with a version's
    /// declared capabilities.
    pub fn build_initialize_params(&self, version: &str, client_info: &Implementation) -> Value {
        let descriptor = self.descriptor(version);
        let mut capabilities = serde_json::Map::new();
        if let Some(descriptor) = descriptor {
            for capability in [
                Capability::Tools,
                Capability::Resources,
                Capability::Prompts,
                Capability::Sampling,
                Capability::Roots,
            ] {
                if descriptor.supports(capability) {
                    capabilities.insert(capability.as_str().to_string(), json!({}));
                }
            }
        }

        json!({
            "protocolVersion": version,
            "capabilities": Value::Object(capabilities),
            "clientInfo": {
                "name": client_info.name,
                "version": client_info.version,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{JsonRpcRequest, RequestId};

    #[test]
    fn negotiate_exact_match_from_single_supported_version() {
        let catalog = VersionCatalog::default_catalog();
        let negotiated = catalog
            .negotiate(&["2024-11-05".to_string()])
            .expect("should negotiate");
        assert_eq!(negotiated.version, "2024-11-05");
        assert!(!negotiated.is_backward_compatible);
    }

    #[test]
    fn negotiate_empty_offer_fails() {
        let catalog = VersionCatalog::default_catalog();
        let err = catalog.negotiate(&[]).unwrap_err();
        assert!(matches!(err, ProtocolError::NoCompatibleVersion { .. }));
    }

    #[test]
    fn negotiate_falls_back_through_backward_compatible_set() {
        let catalog = VersionCatalog::default_catalog();
        // 2024-11-05 is in 2025-03-26's backward_compatible set.
        let negotiated = catalog
            .negotiate(&["2024-11-05".to_string()])
            .expect("exact match wins here since 2024-11-05 itself is listed");
        assert_eq!(negotiated.version, "2024-11-05");

        // An unknown id that some other host version declares compatible.
        let negotiated = catalog
            .negotiate(&["2099-01-01".to_string(), "2024-11-05".to_string()])
            .expect("should still negotiate on the known id");
        assert_eq!(negotiated.version, "2024-11-05");
    }

    #[test]
    fn validate_message_rejects_capability_outside_negotiated_version() {
        let catalog = VersionCatalog::default_catalog();
        let envelope = RpcEnvelope::Request(JsonRpcRequest::new(
            RequestId::Number(1),
            "prompts/get",
            None,
        ));
        let outcome = catalog.validate_message(&envelope, "2024-09-24");
        assert!(!outcome.ok);
        assert!(!outcome.errors.is_empty());
    }

    #[test]
    fn validate_message_allows_enabled_capability() {
        let catalog = VersionCatalog::default_catalog();
        let envelope = RpcEnvelope::Request(JsonRpcRequest::new(
            RequestId::Number(1),
            "tools/list",
            None,
        ));
        let outcome = catalog.validate_message(&envelope, "2024-09-24");
        assert!(outcome.ok);
    }

    #[test]
    fn build_initialize_params_includes_negotiated_capabilities_only() {
        let catalog = VersionCatalog::default_catalog();
        let client_info = Implementation::new("mcp-host", "0.1.0");
        let params = catalog.build_initialize_params("2024-09-24", &client_info);
        let capabilities = params.get("capabilities").unwrap().as_object().unwrap();
        assert!(capabilities.contains_key("tools"));
        assert!(!capabilities.contains_key("sampling"));
    }
}
