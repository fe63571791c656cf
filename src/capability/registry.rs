//! Registry of capabilities and their deadlines
//!
//! Built once at startup and read-only afterwards.

use super::{Capability, ParameterSchema};
use crate::llm::ToolDefinition;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Deadline given to capabilities that do not ask for another one
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no capability named `{0}`")]
    NotFound(String),
}

/// A capability together with the deadline it runs under
#[derive(Clone)]
pub struct RegisteredCapability {
    capability: Arc<dyn Capability>,
    deadline: Duration,
}

impl RegisteredCapability {
    pub fn capability(&self) -> &Arc<dyn Capability> {
        &self.capability
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn parameters(&self) -> &ParameterSchema {
        self.capability.parameters()
    }
}

impl std::fmt::Debug for RegisteredCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredCapability")
            .field("name", &self.capability.name())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, RegisteredCapability>,
}

impl CapabilityRegistry {
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisteredCapability, RegistryError> {
        self.entries
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Tool definitions for the model, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .entries
            .values()
            .map(|entry| ToolDefinition {
                name: entry.capability.name().to_string(),
                description: entry.capability.description(),
                input_schema: entry.parameters().to_json_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    capabilities: Vec<(Arc<dyn Capability>, Option<Duration>)>,
    overrides: HashMap<String, Duration>,
}

impl CapabilityRegistryBuilder {
    /// Register under the capability's own default deadline.
    /// A later registration with the same name replaces an earlier one.
    #[must_use]
    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push((capability, None));
        self
    }

    #[must_use]
    pub fn register_with_deadline(
        mut self,
        capability: Arc<dyn Capability>,
        deadline: Duration,
    ) -> Self {
        self.capabilities.push((capability, Some(deadline)));
        self
    }

    /// Override the deadline of a capability by name. Applied at `build`.
    #[must_use]
    pub fn with_deadline(mut self, name: impl Into<String>, deadline: Duration) -> Self {
        self.overrides.insert(name.into(), deadline);
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        let mut entries = HashMap::with_capacity(self.capabilities.len());
        for (capability, deadline) in self.capabilities {
            let deadline = deadline.unwrap_or_else(|| capability.default_deadline());
            let name = capability.name().to_string();
            if entries.contains_key(&name) {
                tracing::warn!(capability = %name, "Replacing previously registered capability");
            }
            entries.insert(
                name,
                RegisteredCapability {
                    capability,
                    deadline,
                },
            );
        }

        for (name, deadline) in self.overrides {
            match entries.get_mut(&name) {
                Some(entry) => entry.deadline = deadline,
                None => {
                    tracing::warn!(capability = %name, "Deadline override for unregistered capability");
                }
            }
        }

        for entry in entries.values() {
            tracing::debug!(
                capability = %entry.capability.name(),
                deadline_ms = %entry.deadline.as_millis(),
                "Registered capability"
            );
        }

        CapabilityRegistry { entries }
    }
}
