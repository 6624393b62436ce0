//! Duck-typed peer-declared primitives: tools, resources, prompts.
//!
//! These mirror the open-record design the Version Catalog's
//! `PeerCapabilities` already uses in `mcp-core`: unknown/extra fields are
//! preserved rather than rejected, since peer implementations vary in
//! exactly which optional fields they populate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// The capability cache a Peer Session refreshes right after handshake and
/// re-consults before `callTool`/`getPrompt`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCache {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
}

impl CapabilityCache {
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn has_prompt(&self, name: &str) -> bool {
        self.prompts.iter().any(|p| p.name == name)
    }
}

fn parse_list<T: serde::de::DeserializeOwned>(result: Value, key: &str) -> Vec<T> {
    result
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_tools(result: Value) -> Vec<ToolDescriptor> {
    parse_list(result, "tools")
}

pub fn parse_resources(result: Value) -> Vec<ResourceDescriptor> {
    parse_list(result, "resources")
}

pub fn parse_prompts(result: Value) -> Vec<PromptDescriptor> {
    parse_list(result, "prompts")
}
