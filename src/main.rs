use anyhow::{bail, Context};
use chrono::NaiveDateTime;
use clap::{Arg, ArgMatches, Command};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xpert_flow::{
    config::XpertConfig,
    context::RequestContext,
    example_data::ExampleDataGenerator,
    models::{DateTime, RequestInput},
    output::OutputManager,
    pipeline::{BatchStatus, Pipeline},
    services::{DictionaryTranslations, InMemoryDrugModelRepository},
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = Command::new("TuberXpert request flow")
        .version("0.1")
        .about("Selects drug models and prepares dose adjustments for a batch of requests")
        .arg(
            Arg::new("models")
                .short('m')
                .long("models")
                .value_name("FILE")
                .help("JSON array of drug models")
                .required_unless_present("generate-example"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("JSON batch of requests")
                .required_unless_present("generate-example"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for results")
                .default_value("./xpert_results"),
        )
        .arg(
            Arg::new("computation-time")
                .short('t')
                .long("computation-time")
                .value_name("DATETIME")
                .help("Reference time, e.g. 2022-06-20T10:00:00 (defaults to now)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file"),
        )
        .arg(
            Arg::new("points-per-hour")
                .long("points-per-hour")
                .value_name("NUMBER")
                .help("Prediction density override"),
        )
        .arg(
            Arg::new("window-days")
                .long("window-days")
                .value_name("DAYS")
                .help("Adjustment window override when no standard treatment applies"),
        )
        .arg(
            Arg::new("generate-example")
                .long("generate-example")
                .help("Generate example drug models and requests")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("requests")
                .short('n')
                .long("requests")
                .value_name("NUMBER")
                .help("Number of requests for the example batch")
                .default_value("20"),
        )
        .get_matches();

    let output_dir = PathBuf::from(
        matches
            .get_one::<String>("output")
            .context("missing output directory")?,
    );
    let config = create_config(&matches)?;

    let (models_path, input_path, default_time) = if matches.get_flag("generate-example") {
        let n_requests: usize = matches
            .get_one::<String>("requests")
            .context("missing number of requests")?
            .parse()
            .context("Invalid number of requests")?;

        let (models, requests) = ExampleDataGenerator::generate_example(&output_dir, n_requests)?;
        println!("Generated example batch: {}", requests.display());
        (models, requests, ExampleDataGenerator::computation_time())
    } else {
        let models = matches.get_one::<String>("models").context("missing --models")?;
        let input = matches.get_one::<String>("input").context("missing --input")?;
        (PathBuf::from(models), PathBuf::from(input), chrono::Local::now().naive_local())
    };

    let computation_time = match matches.get_one::<String>("computation-time") {
        Some(value) => NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
            .with_context(|| format!("Invalid computation time '{}'", value))?,
        None => default_time,
    };

    let status = run_batch(&models_path, &input_path, &output_dir, computation_time, config)?;
    std::process::exit(match status {
        BatchStatus::AllRequestsSucceeded => 0,
        BatchStatus::NoRequestsSucceeded => 1,
        BatchStatus::SomeRequestsSucceeded => 2,
    });
}

fn create_config(matches: &ArgMatches) -> anyhow::Result<XpertConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => XpertConfig::from_file(path).with_context(|| format!("Cannot load configuration {}", path))?,
        None => XpertConfig::default(),
    };

    if let Some(value) = matches.get_one::<String>("points-per-hour") {
        config.points_per_hour = value.parse().context("Invalid points per hour")?;
    }
    if let Some(value) = matches.get_one::<String>("window-days") {
        config.adjustment_window_days = value.parse().context("Invalid window days")?;
    }

    config.validate()?;
    Ok(config)
}

fn run_batch(
    models_path: &Path,
    input_path: &Path,
    output_dir: &Path,
    computation_time: DateTime,
    config: XpertConfig,
) -> anyhow::Result<BatchStatus> {
    println!("Drug models: {}", models_path.display());
    println!("Requests: {}", input_path.display());
    println!("Computation time: {}", computation_time);

    let repository = InMemoryDrugModelRepository::load_file(models_path)
        .with_context(|| format!("Cannot load drug models from {}", models_path.display()))?;
    if repository.is_empty() {
        bail!("No drug model in {}", models_path.display());
    }

    let reader = BufReader::new(File::open(input_path)?);
    let inputs: Vec<RequestInput> = serde_json::from_reader(reader)
        .with_context(|| format!("Cannot parse requests from {}", input_path.display()))?;

    let mut contexts: Vec<RequestContext> = inputs
        .into_iter()
        .map(|input| {
            let treatment = input.treatment.map(|mut treatment| {
                treatment.assign_identities();
                treatment
            });
            RequestContext::new(input.request, treatment, computation_time)
        })
        .collect();

    let pipeline = Pipeline::preparation(Arc::new(repository), config);
    let start_time = std::time::Instant::now();
    let status = pipeline.run_batch(&mut contexts);
    println!("Processed {} requests in {:.2} seconds", contexts.len(), start_time.elapsed().as_secs_f64());

    OutputManager::save_results(&contexts, &DictionaryTranslations::with_defaults(), output_dir)?;
    print_summary(&contexts, status);

    Ok(status)
}

fn print_summary(contexts: &[RequestContext], status: BatchStatus) {
    println!("\n=== REQUEST SUMMARY ===");
    for (index, ctx) in contexts.iter().enumerate() {
        match (ctx.drug_model(), ctx.adjustment_trait()) {
            (Some(model), Some(adjustment)) if ctx.should_continue_processing() => println!(
                "{:>3} {:<10} {} adjustment at {} [{} - {}]",
                index, ctx.request().drug_id, model.id, adjustment.adjustment_time, adjustment.start, adjustment.end
            ),
            _ => println!("{:>3} {:<10} FAILED: {}", index, ctx.request().drug_id, ctx.error()),
        }
    }
    println!("Batch status: {:?}", status);
}
