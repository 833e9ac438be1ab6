use std::env;
use std::fs;
use std::io;

use choice_core::{
    read_entity_table_path, read_model_spec_path, simple_simulate, simple_simulate_logsums,
    Environment, ExpressionPlan, NestTree, RandomStream, Spec,
};
use contracts::{ModelSettings, SimulateConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn print_usage() {
    println!("choice-cli <command>");
    println!("commands:");
    println!("  simulate <choosers.csv> <key_column> <spec.csv> [settings.json]");
    println!("    writes one chosen alternative per chooser as csv on stdout");
    println!("  logsums <choosers.csv> <key_column> <spec.csv> [settings.json]");
    println!("    writes one logsum per chooser as csv on stdout");
    println!("  check-spec <spec.csv>");
    println!("    parses every expression and lists the alternatives");
    println!("environment:");
    println!("  CHOICE_SEED, CHOICE_CHUNK_SIZE, CHOICE_WORKER_THREADS override settings");
    println!("  RUST_LOG sets log filtering (default info)");
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn required<'a>(args: &'a [String], index: usize, label: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {label}"))
}

fn env_override<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("invalid {name}: {raw}")),
        _ => Ok(None),
    }
}

fn load_settings(path: Option<&String>) -> Result<ModelSettings, String> {
    let Some(path) = path else {
        return Ok(ModelSettings::default());
    };
    let raw = fs::read_to_string(path).map_err(|err| format!("failed to read {path}: {err}"))?;
    serde_json::from_str(&raw).map_err(|err| format!("invalid settings {path}: {err}"))
}

fn simulate_config(settings: &ModelSettings) -> Result<SimulateConfig, String> {
    let mut config = settings.simulate_config();
    if let Some(seed) = env_override("CHOICE_SEED")? {
        config.seed = seed;
    }
    if let Some(chunk_size) = env_override("CHOICE_CHUNK_SIZE")? {
        config.chunk_size = chunk_size;
    }
    if let Some(threads) = env_override("CHOICE_WORKER_THREADS")? {
        config.worker_threads = threads;
    }
    Ok(config)
}

struct Model {
    choosers: choice_core::EntityTable,
    key_column: String,
    spec: Spec,
    tree: Option<NestTree>,
    env: Environment,
    config: SimulateConfig,
}

fn load_model(args: &[String]) -> Result<Model, String> {
    let choosers_path = required(args, 2, "choosers csv")?;
    let key_column = required(args, 3, "key column")?;
    let spec_path = required(args, 4, "spec csv")?;
    let settings = load_settings(args.get(5))?;

    let choosers = read_entity_table_path(choosers_path, key_column)
        .map_err(|err| format!("failed to read choosers: {err}"))?;
    let spec = read_model_spec_path(spec_path).map_err(|err| format!("failed to read spec: {err}"))?;
    let tree = NestTree::from_settings(&settings, spec.alternatives()).map_err(|err| err.to_string())?;
    let config = simulate_config(&settings)?;
    info!(%config, "loaded model");
    Ok(Model {
        choosers,
        key_column: key_column.to_string(),
        spec,
        tree,
        env: Environment::from_constants(&settings.constants),
        config,
    })
}

fn run_simulate(args: &[String]) -> Result<(), String> {
    let model = load_model(args)?;
    let stream = RandomStream::from_config(&model.config);
    let result = simple_simulate(
        &model.choosers,
        &model.spec,
        model.tree.as_ref(),
        &model.env,
        &stream,
        &model.config,
    )
    .map_err(|err| err.to_string())?;

    let column = result.choices.column.as_str();
    let mut writer = csv::Writer::from_writer(io::stdout());
    let index_column = format!("{column}_index");
    writer
        .write_record([model.key_column.as_str(), column, index_column.as_str(), "draw"])
        .map_err(|err| err.to_string())?;
    for record in &result.choices.records {
        writer
            .write_record([
                record.entity_key.to_string(),
                record.alternative.clone(),
                record.alternative_index.to_string(),
                record.draw.to_string(),
            ])
            .map_err(|err| err.to_string())?;
    }
    writer.flush().map_err(|err| err.to_string())?;
    if !result.report.is_clean() {
        info!(diagnostics = result.report.diagnostics.len(), "run finished with diagnostics");
    }
    Ok(())
}

fn run_logsums(args: &[String]) -> Result<(), String> {
    let model = load_model(args)?;
    let result = simple_simulate_logsums(
        &model.choosers,
        &model.spec,
        model.tree.as_ref(),
        &model.env,
        &model.config,
    )
    .map_err(|err| err.to_string())?;

    let mut writer = csv::Writer::from_writer(io::stdout());
    writer
        .write_record([model.key_column.as_str(), result.logsums.column.as_str()])
        .map_err(|err| err.to_string())?;
    for (key, value) in result.logsums.iter() {
        writer
            .write_record([key.to_string(), value.to_string()])
            .map_err(|err| err.to_string())?;
    }
    writer.flush().map_err(|err| err.to_string())
}

fn run_check_spec(args: &[String]) -> Result<(), String> {
    let spec = read_model_spec_path(required(args, 2, "spec csv")?).map_err(|err| err.to_string())?;
    let plan = ExpressionPlan::for_spec(&spec).map_err(|err| err.to_string())?;
    println!(
        "spec ok expressions={} alternatives={}",
        plan.len(),
        spec.alternatives().join(",")
    );
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    let outcome = match command {
        Some("simulate") => {
            init_logging();
            run_simulate(&args)
        }
        Some("logsums") => {
            init_logging();
            run_logsums(&args)
        }
        Some("check-spec") => run_check_spec(&args),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(err) = outcome {
        eprintln!("error: {err}");
        print_usage();
        std::process::exit(2);
    }
}
