use std::{error::Error, fs, path::PathBuf, process::ExitCode, sync::Arc};

use api_types::{JsonMap, template::TemplateNew};
use clap::{Args, Parser, Subcommand};
use engine::{CalculationService, MemoryResults, MemoryTemplates};
use serde::Serialize;
use serde_json::Value as Json;

mod convert;
mod settings;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "cubica")]
#[command(about = "Run, preview and check calculation templates")]
struct Cli {
    /// Settings file (TOML). Defaults to an optional `settings.toml`.
    #[arg(long, env = "CUBICA_SETTINGS")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a template against input values.
    Run(RunArgs),
    /// Dry run with synthesized inputs.
    Preview(PreviewArgs),
    /// Report authoring problems in a template.
    Check(TemplateArg),
}

#[derive(Args, Debug)]
struct TemplateArg {
    /// Template document (JSON).
    #[arg(long)]
    template: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    template: TemplateArg,
    /// Input values (JSON object).
    #[arg(long)]
    values: Option<PathBuf>,
    /// Single input override, `name=value`; the value is read as JSON when
    /// possible, else as a string.
    #[arg(long = "set", value_parser = parse_assignment)]
    assignments: Vec<(String, Json)>,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    #[command(flatten)]
    template: TemplateArg,
    /// Values to use instead of synthesized samples (JSON object).
    #[arg(long)]
    values: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, BoxError> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "cubica={level},engine={level}",
            level = settings.app.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let engine = settings.engine()?;
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        Command::Run(args) => {
            let template = convert::template(read_template(&args.template.template)?);
            let template_id = template.id;
            let mut values = read_values(args.values.as_ref())?;
            values.extend(args.assignments);

            let templates = Arc::new(MemoryTemplates::new());
            templates.insert(template)?;
            let mut service =
                CalculationService::new(engine, templates, Arc::new(MemoryResults::new()));
            if let Some(budget) = settings.budget() {
                service = service.with_budget(budget);
            }

            let persisted = service
                .execute(template_id, convert::values(values))
                .await?;
            let result = &persisted.record.result;
            print_json(&convert::calculation_response(
                Some(persisted.id),
                template_id,
                result,
            ))?;
            Ok(exit_code(result.was_successful))
        }
        Command::Preview(args) => {
            let template = convert::template(read_template(&args.template.template)?);
            let supplied = convert::values(read_values(args.values.as_ref())?);
            let preview = engine.generate_preview_with(&template, &supplied);
            print_json(&convert::preview_response(template.id, &preview))?;
            Ok(exit_code(preview.was_successful))
        }
        Command::Check(args) => {
            let template = convert::template(read_template(&args.template)?);
            let issues = engine.check_template(&template);
            for issue in &issues {
                tracing::warn!(template = %template.name, "{issue}");
            }
            let response = convert::check_response(template.id, issues);
            print_json(&response)?;
            Ok(exit_code(response.is_valid))
        }
    }
}

fn read_template(path: &PathBuf) -> Result<TemplateNew, BoxError> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("cannot read template {}: {err}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn read_values(path: Option<&PathBuf>) -> Result<JsonMap, BoxError> {
    let Some(path) = path else {
        return Ok(JsonMap::new());
    };
    let text = fs::read_to_string(path)
        .map_err(|err| format!("cannot read values {}: {err}", path.display()))?;
    match serde_json::from_str(&text)? {
        Json::Object(map) => Ok(map),
        _ => Err(format!("{} must contain a JSON object", path.display()).into()),
    }
}

fn parse_assignment(raw: &str) -> Result<(String, Json), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Json::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), BoxError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
