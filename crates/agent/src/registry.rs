//! Engine registry: known variants are enumerated at startup, looked up by
//! name. No reflection, no dynamic loading.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::subprocess::{SubprocessAgent, SubprocessConfig};
use crate::traits::AgentEngine;

#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn AgentEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the default subprocess variant.
    pub fn with_default(config: SubprocessConfig) -> Self {
        let mut registry = Self::new();
        let name = config.command.clone();
        registry.register(Arc::new(SubprocessAgent::new(name, config)));
        registry
    }

    /// Registry carrying every known variant plus the configured default.
    /// Variants are a fixed list; there is no dynamic discovery.
    pub fn with_known_variants(default: SubprocessConfig) -> Self {
        let mut registry = Self::new();
        for config in [SubprocessConfig::claude(), SubprocessConfig::codex()] {
            let name = config.command.clone();
            registry.register(Arc::new(SubprocessAgent::new(name, config)));
        }
        let name = default.command.clone();
        registry.register(Arc::new(SubprocessAgent::new(name, default)));
        registry
    }

    pub fn register(&mut self, engine: Arc<dyn AgentEngine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentEngine>> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownEngine(name.to_string()))
    }

    /// First registered engine when only one exists; the usual case for a
    /// configured run.
    pub fn single(&self) -> Option<Arc<dyn AgentEngine>> {
        (self.engines.len() == 1).then(|| self.engines.values().next().cloned())?
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.engines.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}
