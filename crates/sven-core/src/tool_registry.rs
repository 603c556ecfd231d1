// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool Registry (C2): a named collection of tool descriptors plus their
//! runnable bodies. Lookup by name is the sole operation; the only other
//! thing the registry does is reject duplicate names at assembly time.

use std::collections::HashMap;
use std::sync::Arc;

use sven_model::content::ToolDescriptor;

use crate::tool_body::ToolBody;

#[derive(Debug, thiserror::Error)]
#[error("duplicate tool name registered: {0}")]
pub struct DuplicateToolName(pub String);

/// Assembled once at conversation construction from the harness's chosen
/// tool subset plus whatever [`sven_mcp_client`] surfaced, namespaced.
pub struct ToolTable {
    entries: HashMap<String, Arc<dyn ToolBody>>,
}

impl ToolTable {
    pub fn builder() -> ToolTableBuilder {
        ToolTableBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolBody>> {
        self.entries.get(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        names.into_iter().map(|n| self.entries[n].descriptor()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
pub struct ToolTableBuilder {
    entries: HashMap<String, Arc<dyn ToolBody>>,
}

impl ToolTableBuilder {
    pub fn add(mut self, body: Arc<dyn ToolBody>) -> Result<Self, DuplicateToolName> {
        let name = body.descriptor().name;
        if self.entries.contains_key(&name) {
            return Err(DuplicateToolName(name));
        }
        self.entries.insert(name, body);
        Ok(self)
    }

    pub fn extend(
        mut self,
        bodies: impl IntoIterator<Item = Arc<dyn ToolBody>>,
    ) -> Result<Self, DuplicateToolName> {
        for body in bodies {
            self = self.add(body)?;
        }
        Ok(self)
    }

    pub fn build(self) -> ToolTable {
        ToolTable { entries: self.entries }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool_body::ToolBodyOutcome;

    struct EchoBody;

    #[async_trait]
    impl ToolBody for EchoBody {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".into(),
                description: "echoes msg".into(),
                input_schema: json!({"type": "object"}),
                type_tag: None,
                ends_turn: false,
            }
        }
        async fn call(&self, input: serde_json::Value, _ctx: crate::tool_body::ToolCallContext) -> ToolBodyOutcome {
            ToolBodyOutcome::Text(input["msg"].as_str().unwrap_or_default().to_string())
        }
    }

    #[test]
    fn lookup_by_name_succeeds() {
        let table = ToolTable::builder().add(Arc::new(EchoBody)).unwrap().build();
        assert!(table.get("echo").is_some());
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn duplicate_names_rejected_at_assembly() {
        let err = ToolTable::builder()
            .add(Arc::new(EchoBody))
            .unwrap()
            .add(Arc::new(EchoBody));
        assert!(err.is_err());
    }

    #[test]
    fn descriptors_sorted_by_name() {
        let table = ToolTable::builder().add(Arc::new(EchoBody)).unwrap().build();
        let descs = table.descriptors();
        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].name, "echo");
    }
}
