use std::sync::Arc;
use std::time::Duration;

use engine::{
    CalculationService, DataType, Engine, EngineError, MemoryResults, MemoryTemplates,
    ParameterDefinition, Stage, TemplateDefinition, TemplateRepository, Value, Values,
};
use serde_json::json;
use uuid::Uuid;

fn doubler() -> TemplateDefinition {
    TemplateDefinition::new("Doubler", "x * 2").parameter(
        ParameterDefinition::input("x", DataType::Number)
            .required()
            .range(0.0, 10.0),
    )
}

fn service_with(
    templates: &[TemplateDefinition],
) -> (
    CalculationService<MemoryTemplates, MemoryResults>,
    Arc<MemoryTemplates>,
    Arc<MemoryResults>,
) {
    let store = Arc::new(MemoryTemplates::new());
    for template in templates {
        store.insert(template.clone()).unwrap();
    }
    let results = Arc::new(MemoryResults::new());
    let service = CalculationService::new(
        Engine::builder().build(),
        Arc::clone(&store),
        Arc::clone(&results),
    );
    (service, store, results)
}

fn values(json: serde_json::Value) -> Values {
    Value::values_from_json(json).unwrap()
}

#[tokio::test]
async fn unknown_template_is_a_hard_error() {
    let (service, _, results) = service_with(&[]);
    let id = Uuid::new_v4();

    let err = service.execute(id, Values::new()).await.unwrap_err();
    assert_eq!(err, EngineError::TemplateNotFound(id));
    assert!(results.all().unwrap().is_empty());
}

#[tokio::test]
async fn inactive_template_is_rejected_before_evaluation() {
    let template = doubler().active(false);
    let id = template.id;
    let (service, store, results) = service_with(&[template]);

    let err = service.execute(id, values(json!({"x": 1}))).await.unwrap_err();
    assert_eq!(err, EngineError::TemplateInactive(id));
    assert!(results.all().unwrap().is_empty());
    assert_eq!(store.get(id).unwrap().unwrap().usage_count, 0);

    // inactive templates can still be previewed
    let preview = service.preview(id).await.unwrap();
    assert!(preview.was_successful);
}

#[tokio::test]
async fn successful_run_is_persisted_and_counted() {
    let template = doubler().version(3);
    let id = template.id;
    let (service, store, results) = service_with(&[template]);

    let persisted = service.execute(id, values(json!({"x": 4}))).await.unwrap();
    assert!(persisted.record.result.was_successful);
    assert_eq!(persisted.record.template_version, 3);
    assert_eq!(persisted.record.result.results["resultado"], Value::from(8));
    assert_eq!(persisted.record.inputs, values(json!({"x": 4})));

    assert_eq!(results.for_template(id).unwrap(), vec![persisted]);
    let snapshot = store.find_template_with_parameters(id).await.unwrap().unwrap();
    assert_eq!(snapshot.usage_count, 1);
}

#[tokio::test]
async fn failed_runs_are_persisted_too() {
    let template = doubler();
    let id = template.id;
    let (service, store, results) = service_with(&[template]);

    let persisted = service.execute(id, values(json!({"x": 50}))).await.unwrap();
    let result = &persisted.record.result;
    assert!(!result.was_successful);
    assert_eq!(result.failure.as_ref().map(|f| &f.stage), Some(&Stage::Validation));
    assert_eq!(results.all().unwrap().len(), 1);
    assert_eq!(store.get(id).unwrap().unwrap().usage_count, 1);
}

#[tokio::test]
async fn running_snapshot_is_unaffected_by_usage_updates() {
    let template = doubler();
    let id = template.id;
    let (service, store, _) = service_with(&[template]);
    let before = store.get(id).unwrap().unwrap();

    for x in 0..3 {
        service.execute(id, values(json!({"x": x}))).await.unwrap();
    }
    assert_eq!(before.usage_count, 0);
    assert_eq!(store.get(id).unwrap().unwrap().usage_count, 3);
}

#[tokio::test]
async fn generous_budget_does_not_interfere() {
    let template = doubler();
    let id = template.id;
    let (service, _, _) = service_with(&[template]);
    let service = service.with_budget(Duration::from_secs(5));

    let persisted = service.execute(id, values(json!({"x": 2}))).await.unwrap();
    assert!(persisted.record.result.was_successful);
}

fn heavy_template() -> TemplateDefinition {
    let mut template = TemplateDefinition::new("Heavy", "s0")
        .parameter(ParameterDefinition::input("xs", DataType::Array).required());
    for i in 0..40 {
        template = template.parameter(ParameterDefinition::internal(
            format!("s{i}"),
            DataType::Number,
            "sum(xs) + avg(xs)",
        ));
    }
    template
}

#[tokio::test]
async fn exhausted_budget_is_persisted_as_timeout() {
    let template = heavy_template();
    let id = template.id;
    let (service, store, results) = service_with(&[template]);
    let service = service.with_budget(Duration::ZERO);
    let xs = Value::Array((0..100_000_i32).map(|n| Value::from(n % 7)).collect());
    let inputs = Values::from([("xs".to_string(), xs)]);

    let persisted = service.execute(id, inputs).await.unwrap();
    let result = &persisted.record.result;
    assert!(!result.was_successful);
    assert!(result.results.is_empty());
    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.message, "timeout");
    // the run is cut short while validating or deriving, never later
    let active = match &failure.stage {
        Stage::Validation => true,
        Stage::Internal(name) => name.starts_with('s'),
        _ => false,
    };
    assert!(active, "unexpected stage {}", failure.stage);
    assert_eq!(
        result.error_message.as_deref(),
        Some(format!("{}: timeout", failure.stage).as_str())
    );
    assert!(result.error_message.as_deref().unwrap().ends_with(": timeout"));

    assert_eq!(results.for_template(id).unwrap(), vec![persisted.clone()]);
    assert_eq!(store.get(id).unwrap().unwrap().usage_count, 1);
}

#[tokio::test]
async fn preview_of_unknown_template_fails() {
    let (service, _, _) = service_with(&[]);
    let id = Uuid::new_v4();
    assert_eq!(
        service.preview(id).await.unwrap_err(),
        EngineError::TemplateNotFound(id)
    );
}
