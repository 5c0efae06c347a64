//! The calculation use case: look a template up, run it under a wall-clock
//! budget, persist the outcome and count the usage.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::calculation::{CalculationResult, StageProbe};
use crate::error::EngineError;
use crate::preview::Preview;
use crate::repository::{PersistedResult, ResultRecord, ResultRepository, TemplateRepository};
use crate::templates::TemplateDefinition;
use crate::value::Values;
use crate::{Engine, ResultEngine};

pub struct CalculationService<T, R> {
    engine: Engine,
    templates: Arc<T>,
    results: Arc<R>,
    budget: Option<Duration>,
}

impl<T, R> CalculationService<T, R>
where
    T: TemplateRepository,
    R: ResultRepository,
{
    pub fn new(engine: Engine, templates: Arc<T>, results: Arc<R>) -> Self {
        Self {
            engine,
            templates,
            results,
            budget: None,
        }
    }

    /// Abandons runs that take longer than `budget`. The result then reports
    /// a `timeout` at the stage that was active.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Runs the template and persists the result, failed runs included.
    ///
    /// Only a missing or inactive template, or a collaborator failure, is
    /// returned as an error; calculation failures live in the persisted
    /// [`CalculationResult`].
    pub async fn execute(
        &self,
        template_id: Uuid,
        values: Values,
    ) -> ResultEngine<PersistedResult> {
        let template = self.find(template_id).await?;
        if !template.is_active {
            return Err(EngineError::TemplateInactive(template_id));
        }
        let result = self.run_budgeted(Arc::clone(&template), values.clone()).await?;
        info!(
            template = %template_id,
            version = template.version,
            success = result.was_successful,
            elapsed_ms = result.execution_time_ms,
            "calculation finished"
        );
        let persisted = self
            .results
            .create_result(ResultRecord {
                template_id,
                template_version: template.version,
                inputs: values,
                result,
            })
            .await?;
        self.templates.increment_usage(template_id).await?;
        Ok(persisted)
    }

    /// Dry run with synthesized inputs. Inactive templates can be previewed.
    pub async fn preview(&self, template_id: Uuid) -> ResultEngine<Preview> {
        let template = self.find(template_id).await?;
        Ok(self.engine.generate_preview(&template))
    }

    async fn find(&self, template_id: Uuid) -> ResultEngine<Arc<TemplateDefinition>> {
        self.templates
            .find_template_with_parameters(template_id)
            .await?
            .ok_or(EngineError::TemplateNotFound(template_id))
    }

    async fn run_budgeted(
        &self,
        template: Arc<TemplateDefinition>,
        values: Values,
    ) -> ResultEngine<CalculationResult> {
        let engine = self.engine;
        let probe = Arc::new(StageProbe::default());
        let task = {
            let probe = Arc::clone(&probe);
            let template = Arc::clone(&template);
            tokio::task::spawn_blocking(move || {
                engine.execute_calculation_probed(&template, &values, &probe)
            })
        };
        let Some(budget) = self.budget else {
            return task.await.map_err(|err| EngineError::Task(err.to_string()));
        };
        match tokio::time::timeout(budget, task).await {
            Ok(joined) => joined.map_err(|err| EngineError::Task(err.to_string())),
            Err(_) => {
                let stage = probe.stage(&template);
                warn!(template = %template.id, %stage, ?budget, "calculation timed out");
                Ok(CalculationResult::timed_out(stage, budget))
            }
        }
    }
}
