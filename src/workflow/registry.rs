/// Compiled definition registry using ArcSwap
///
/// Parsed and compiled workflow definitions keyed by workflow record id. Reads
/// are lock-free; every update swaps in a new map so running advancements keep
/// the definition they started with.

use crate::workflow::{
    definition::CompiledDefinition, storage::WorkflowStorage, types::WorkflowRecord,
};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

#[derive(Debug)]
pub struct DefinitionRegistry {
    /// Key: workflow record id, Value: compiled definition
    definitions: ArcSwap<HashMap<Uuid, Arc<CompiledDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Compile every stored definition
    ///
    /// Records whose text no longer parses are skipped with an error log; they
    /// fail again on demand with `MalformedDefinition`.
    pub async fn init_from_storage(&self, storage: &WorkflowStorage) -> Result<()> {
        let records = storage.list_workflows(false).await?;
        let mut compiled = HashMap::new();

        for record in records {
            match CompiledDefinition::parse(&record.definition) {
                Ok(definition) => {
                    compiled.insert(record.id, Arc::new(definition));
                }
                Err(e) => tracing::error!(
                    "❌ Skipping workflow '{}' ({}) v{}: {}",
                    record.name, record.id, record.version, e
                ),
            }
        }

        let count = compiled.len();
        self.definitions.store(Arc::new(compiled));
        tracing::info!("📚 Initialized definition registry with {} workflows", count);

        Ok(())
    }

    /// Cached compiled definition, parsing and caching the record's text on a miss
    pub fn get_or_compile(
        &self,
        record: &WorkflowRecord,
    ) -> Result<Arc<CompiledDefinition>, crate::error::WorkflowError> {
        if let Some(compiled) = self.get(&record.id) {
            return Ok(compiled);
        }

        let compiled = Arc::new(CompiledDefinition::parse(&record.definition)?);
        self.insert(record.id, compiled.clone());
        Ok(compiled)
    }

    pub fn get(&self, workflow_id: &Uuid) -> Option<Arc<CompiledDefinition>> {
        self.definitions.load().get(workflow_id).cloned()
    }

    pub fn insert(&self, workflow_id: Uuid, compiled: Arc<CompiledDefinition>) {
        self.definitions.rcu(|current| {
            let mut updated = (**current).clone();
            updated.insert(workflow_id, compiled.clone());
            updated
        });
        tracing::debug!("🔄 Registered compiled definition for workflow {}", workflow_id);
    }

    pub fn remove(&self, workflow_id: &Uuid) {
        let current = self.definitions.load();
        if !current.contains_key(workflow_id) {
            return;
        }

        self.definitions.rcu(|current| {
            let mut updated = (**current).clone();
            updated.remove(workflow_id);
            updated
        });
        tracing::info!("🗑️ Removed workflow {} from definition registry", workflow_id);
    }

    pub fn len(&self) -> usize {
        self.definitions.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
