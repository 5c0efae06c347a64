//! Collaborators the service layer talks to: where templates come from and
//! where results go. The engine itself never calls them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::calculation::CalculationResult;
use crate::error::EngineError;
use crate::templates::TemplateDefinition;
use crate::value::Values;
use crate::ResultEngine;

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// The current snapshot of a template with all its parameters.
    async fn find_template_with_parameters(
        &self,
        id: Uuid,
    ) -> ResultEngine<Option<Arc<TemplateDefinition>>>;

    async fn increment_usage(&self, id: Uuid) -> ResultEngine<()>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn create_result(&self, record: ResultRecord) -> ResultEngine<PersistedResult>;
}

/// A finished run, as handed to a [`ResultRepository`].
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRecord {
    pub template_id: Uuid,
    pub template_version: u32,
    pub inputs: Values,
    pub result: CalculationResult,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PersistedResult {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub record: ResultRecord,
}

/// In-memory template store. Edits replace the whole snapshot, so runs
/// holding an older `Arc` keep seeing the version they started with.
#[derive(Debug, Default)]
pub struct MemoryTemplates {
    templates: RwLock<HashMap<Uuid, Arc<TemplateDefinition>>>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `template`, replacing any snapshot with the same id.
    pub fn insert(&self, template: TemplateDefinition) -> ResultEngine<Arc<TemplateDefinition>> {
        let template = Arc::new(template);
        self.templates
            .write()
            .map_err(poisoned)?
            .insert(template.id, Arc::clone(&template));
        Ok(template)
    }

    pub fn get(&self, id: Uuid) -> ResultEngine<Option<Arc<TemplateDefinition>>> {
        Ok(self.templates.read().map_err(poisoned)?.get(&id).cloned())
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplates {
    async fn find_template_with_parameters(
        &self,
        id: Uuid,
    ) -> ResultEngine<Option<Arc<TemplateDefinition>>> {
        self.get(id)
    }

    async fn increment_usage(&self, id: Uuid) -> ResultEngine<()> {
        let mut templates = self.templates.write().map_err(poisoned)?;
        let current = templates
            .get(&id)
            .ok_or(EngineError::TemplateNotFound(id))?;
        let mut next = TemplateDefinition::clone(current);
        next.usage_count += 1;
        templates.insert(id, Arc::new(next));
        Ok(())
    }
}

/// Append-only in-memory result log.
#[derive(Debug, Default)]
pub struct MemoryResults {
    results: Mutex<Vec<PersistedResult>>,
}

impl MemoryResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> ResultEngine<Vec<PersistedResult>> {
        Ok(self.results.lock().map_err(poisoned)?.clone())
    }

    pub fn for_template(&self, template_id: Uuid) -> ResultEngine<Vec<PersistedResult>> {
        Ok(self
            .results
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|r| r.record.template_id == template_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResultRepository for MemoryResults {
    async fn create_result(&self, record: ResultRecord) -> ResultEngine<PersistedResult> {
        let persisted = PersistedResult {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            record,
        };
        self.results
            .lock()
            .map_err(poisoned)?
            .push(persisted.clone());
        Ok(persisted)
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> EngineError {
    EngineError::Repository(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn usage_increment_replaces_the_snapshot() {
        let store = MemoryTemplates::new();
        let before = store.insert(TemplateDefinition::new("T", "1")).unwrap();
        store.increment_usage(before.id).await.unwrap();

        let after = store
            .find_template_with_parameters(before.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.usage_count, 0);
        assert_eq!(after.usage_count, 1);
    }

    #[tokio::test]
    async fn increment_on_unknown_template_fails() {
        let store = MemoryTemplates::new();
        let id = Uuid::new_v4();
        assert_eq!(
            store.increment_usage(id).await,
            Err(EngineError::TemplateNotFound(id))
        );
    }
}
