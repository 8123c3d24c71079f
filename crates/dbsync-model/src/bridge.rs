//! Id bridges: named functions turning log-table column values into an
//! original entity id.

use std::collections::HashMap;
use std::sync::Arc;

use dbsync_types::{ColumnValue, EntityId};

use crate::error::ModelError;

type BridgeFn = dyn Fn(&[ColumnValue]) -> Result<EntityId, String> + Send + Sync;

/// A named column-to-id conversion function.
#[derive(Clone)]
pub struct IdBridge {
    name: String,
    func: Arc<BridgeFn>,
}

impl IdBridge {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[ColumnValue]) -> Result<EntityId, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Single integral column.
    pub fn integer() -> Self {
        Self::new("integer", |values| match values {
            [value] => value
                .as_i64()
                .map(EntityId::Int)
                .ok_or_else(|| format!("expected an integer, got {}", value)),
            _ => Err(format!("expected 1 column, got {}", values.len())),
        })
    }

    /// Single character column, kept verbatim.
    pub fn string() -> Self {
        Self::new("string", |values| match values {
            [value] => value
                .as_text()
                .map(EntityId::Text)
                .ok_or_else(|| "expected a string, got NULL".to_string()),
            _ => Err(format!("expected 1 column, got {}", values.len())),
        })
    }

    /// One id part per column.
    pub fn composite() -> Self {
        Self::new("composite", |values| {
            let parts = values
                .iter()
                .map(|v| EntityId::from_column(v).map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EntityId::Composite(parts))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn convert(&self, values: &[ColumnValue]) -> Result<EntityId, ModelError> {
        (self.func)(values).map_err(|message| ModelError::Bridge {
            bridge: self.name.clone(),
            message,
        })
    }
}

impl std::fmt::Debug for IdBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdBridge").field("name", &self.name).finish()
    }
}

/// Bridges addressable by name from declaration files.
#[derive(Debug, Clone)]
pub struct BridgeRegistry {
    bridges: HashMap<String, IdBridge>,
}

impl BridgeRegistry {
    /// Registry without any bridge.
    pub fn empty() -> Self {
        Self {
            bridges: HashMap::new(),
        }
    }

    /// Registry holding `integer`, `string` and `composite`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(IdBridge::integer());
        registry.register(IdBridge::string());
        registry.register(IdBridge::composite());
        registry
    }

    /// Register a bridge under its own name, replacing any previous one.
    pub fn register(&mut self, bridge: IdBridge) {
        self.bridges.insert(bridge.name().to_string(), bridge);
    }

    pub fn get(&self, name: &str) -> Result<IdBridge, ModelError> {
        self.bridges
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownBridge(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bridges.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
