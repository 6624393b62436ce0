//! Capability flags and implementation metadata exchanged during the
//! `initialize` handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A single named capability. The Version Catalog gates operations by
/// checking whether a capability is present in the negotiated version's
/// feature set and, for the peer-declared side, in its `capabilities`
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Tools,
    Resources,
    Prompts,
    Sampling,
    Roots,
    Notifications,
    Progress,
    Cancellation,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Tools => "tools",
            Capability::Resources => "resources",
            Capability::Prompts => "prompts",
            Capability::Sampling => "sampling",
            Capability::Roots => "roots",
            Capability::Notifications => "notifications",
            Capability::Progress => "progress",
            Capability::Cancellation => "cancellation",
        }
    }

    /// Map a JSON-RPC method category (the prefix before the first `/`) to
    /// the capability that gates it, when one applies. Methods like
    /// `initialize` or `ping` have no gating capability.
    pub fn for_category(category: &str) -> Option<Capability> {
        match category {
            "tools" => Some(Capability::Tools),
            "resources" => Some(Capability::Resources),
            "prompts" => Some(Capability::Prompts),
            "sampling" => Some(Capability::Sampling),
            "notifications" => Some(Capability::Notifications),
            _ => None,
        }
    }
}

/// Information about an implementation (host or peer), sent in both
/// directions of the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
    #[serde(flatten, default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            metadata: HashMap::new(),
        }
    }
}

/// The peer-declared capabilities block as returned in an `initialize`
/// response. Modeled as an open record: unknown keys are preserved in
/// `extra` rather than causing a parse failure, since peers vary widely
/// in what they report here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
    #[serde(default)]
    pub sampling: Option<Value>,
    #[serde(default)]
    pub logging: Option<Value>,
    #[serde(default)]
    pub roots: Option<Value>,
    /// Some peers report the versions they can speak here instead of (or
    /// in addition to) a top-level `protocolVersion` field.
    #[serde(default, rename = "protocolVersions")]
    pub protocol_versions: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl PeerCapabilities {
    pub fn declares(&self, capability: Capability) -> bool {
        match capability {
            Capability::Tools => self.tools.is_some(),
            Capability::Resources => self.resources.is_some(),
            Capability::Prompts => self.prompts.is_some(),
            Capability::Sampling => self.sampling.is_some(),
            Capability::Roots => self.roots.is_some(),
            Capability::Notifications | Capability::Progress | Capability::Cancellation => true,
        }
    }
}

/// One entry in the Version Catalog's ordered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Date-like identifier, e.g. `"2024-11-05"`.
    pub id: String,
    /// The capability flags this version supports.
    pub features: BTreeCapabilitySet,
    /// Older ids this version can also speak to (used for fallback
    /// negotiation when a peer reports an id the host doesn't list).
    pub backward_compatible: Vec<String>,
}

impl VersionDescriptor {
    pub fn new(id: impl Into<String>, features: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id: id.into(),
            features: BTreeCapabilitySet::from_iter(features),
            backward_compatible: Vec::new(),
        }
    }

    pub fn with_backward_compatible(mut self, ids: impl IntoIterator<Item = &'static str>) -> Self {
        self.backward_compatible = ids.into_iter().map(str::to_string).collect();
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.features.0.contains(&capability)
    }
}

/// A small ordered set of capabilities, serialized as a JSON array of
/// their string names so the descriptor table reads naturally in a
/// config/test fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BTreeCapabilitySet(pub HashSet<Capability>);

impl FromIterator<Capability> for BTreeCapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for BTreeCapabilitySet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut names: Vec<&'static str> = self.0.iter().map(Capability::as_str).collect();
        names.sort_unstable();
        names.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BTreeCapabilitySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let names: Vec<String> = Vec::deserialize(deserializer)?;
        let mut set = HashSet::new();
        for name in names {
            let capability = match name.as_str() {
                "tools" => Capability::Tools,
                "resources" => Capability::Resources,
                "prompts" => Capability::Prompts,
                "sampling" => Capability::Sampling,
                "roots" => Capability::Roots,
                "notifications" => Capability::Notifications,
                "progress" => Capability::Progress,
                "cancellation" => Capability::Cancellation,
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "unknown capability: {other}"
                    )))
                }
            };
            set.insert(capability);
        }
        Ok(BTreeCapabilitySet(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_for_category_maps_known_prefixes() {
        assert_eq!(Capability::for_category("tools"), Some(Capability::Tools));
        assert_eq!(Capability::for_category("initialize"), None);
    }

    #[test]
    fn version_descriptor_supports_declared_features() {
        let desc = VersionDescriptor::new("2024-11-05", [Capability::Tools, Capability::Resources]);
        assert!(desc.supports(Capability::Tools));
        assert!(!desc.supports(Capability::Sampling));
    }

    #[test]
    fn peer_capabilities_open_record_preserves_unknown_fields() {
        let parsed: PeerCapabilities =
            serde_json::from_str(r#"{"tools":{},"weirdVendorExt":{"x":1}}"#).unwrap();
        assert!(parsed.declares(Capability::Tools));
        assert!(parsed.extra.contains_key("weirdVendorExt"));
    }
}
