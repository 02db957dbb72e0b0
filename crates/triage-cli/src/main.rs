use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use triage_classifiers::config::{ModelFamily, StudyConfig};
use triage_cli::commands::explain::{run_explain, ExplainArgs};
use triage_cli::commands::predict::{run_predict, PredictArgs};
use triage_cli::commands::reader_config;
use triage_cli::commands::simulate::run_simulate;
use triage_cli::commands::train::{run_ablation, run_train, summarize, TrainArgs};

fn alias_arg() -> Arg {
    Arg::new("alias")
        .long("alias")
        .help("Rename a CSV header before schema matching, as header=attribute. Repeatable.")
        .action(ArgAction::Append)
        .value_parser(clap::builder::NonEmptyStringValueParser::new())
        .value_hint(ValueHint::Other)
}

fn data_arg(help: &'static str) -> Arg {
    Arg::new("data")
        .short('d')
        .long("data")
        .help(help)
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
}

fn study_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("config")
                .help("Path to the JSON study configuration. Defaults are used when omitted.")
                .required(false)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(data_arg("Path to the labelled patient CSV"))
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Override the seed from the configuration file.")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(alias_arg())
}

fn bundle_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("model")
                .short('m')
                .long("model")
                .help("Path to a model bundle written by `triage train`")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(data_arg("Path to the patient CSV to score").required(true))
        .arg(
            Arg::new("output_file")
                .short('o')
                .long("output")
                .help("Where to write the results. Defaults to stdout.")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(alias_arg())
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("TRIAGE_LOG", "error,triage=info"))
        .init();

    let matches = Command::new("triage")
        .version(clap::crate_version!())
        .about("In-hospital mortality risk models: train, compare, explain")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            study_args(Command::new("train").about(
                "Tune, evaluate and explain every model family, writing one bundle per family",
            ))
            .arg(
                Arg::new("output_dir")
                    .short('o')
                    .long("output-dir")
                    .help("Directory for the model bundles and report.json")
                    .default_value("triage_out")
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_hint(ValueHint::DirPath),
            ),
        )
        .subcommand(
            study_args(
                Command::new("ablate")
                    .about("Retrain one family without an attribute and compare test AUCs"),
            )
            .arg(
                Arg::new("attribute")
                    .short('a')
                    .long("attribute")
                    .help("Attribute to remove from the recipe")
                    .required(true)
                    .value_parser(clap::builder::NonEmptyStringValueParser::new()),
            )
            .arg(
                Arg::new("family")
                    .short('f')
                    .long("family")
                    .help("Model family to retrain")
                    .default_value("bagged_trees")
                    .value_parser(["bagged_trees", "boosted_trees", "kernel_machine"]),
            ),
        )
        .subcommand(bundle_args(
            Command::new("predict").about("Score patients with a trained bundle"),
        ))
        .subcommand(
            bundle_args(
                Command::new("explain").about("Per-patient attributions from a trained bundle"),
            )
            .arg(
                Arg::new("top")
                    .long("top")
                    .help("Keep only the largest contributions per patient")
                    .value_parser(clap::value_parser!(usize)),
            ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Write a synthetic patient cohort as CSV")
                .arg(
                    Arg::new("n_patients")
                        .short('n')
                        .long("patients")
                        .help("Number of simulated patients")
                        .default_value("500")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .help("Simulation seed")
                        .default_value("2024")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("output_file")
                        .short('o')
                        .long("output")
                        .help("Path of the CSV to write")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("train", sub_m)) => handle_train(sub_m),
        Some(("ablate", sub_m)) => handle_ablate(sub_m),
        Some(("predict", sub_m)) => handle_predict(sub_m),
        Some(("explain", sub_m)) => handle_explain(sub_m),
        Some(("simulate", sub_m)) => handle_simulate(sub_m),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn aliases(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("alias")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

/// `None` when no data file was given; the default configuration is printed instead.
fn train_args(matches: &ArgMatches, output_dir: PathBuf) -> Result<Option<TrainArgs>> {
    let Some(data) = matches.get_one::<PathBuf>("data") else {
        eprintln!("[triage] No data file provided. Default configuration:");
        println!("{}", serde_json::to_string_pretty(&StudyConfig::default())?);
        return Ok(None);
    };
    Ok(Some(TrainArgs {
        config: matches.get_one::<PathBuf>("config").cloned(),
        data: data.clone(),
        output_dir,
        seed: matches.get_one::<u64>("seed").copied(),
        reader: reader_config(&aliases(matches))?,
    }))
}

fn handle_train(matches: &ArgMatches) -> Result<()> {
    let output_dir = matches
        .get_one::<PathBuf>("output_dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("triage_out"));
    let Some(args) = train_args(matches, output_dir)? else {
        return Ok(());
    };
    log::info!("Training from data: {:?}", args.data);
    match run_train(&args) {
        Ok(report) => {
            eprintln!("{}", summarize(&report));
            Ok(())
        }
        Err(e) => {
            log::error!("Training failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_ablate(matches: &ArgMatches) -> Result<()> {
    let Some(args) = train_args(matches, PathBuf::new())? else {
        return Ok(());
    };
    let family = match matches.get_one::<String>("family").map(String::as_str) {
        Some("boosted_trees") => ModelFamily::BoostedTrees,
        Some("kernel_machine") => ModelFamily::KernelMachine,
        _ => ModelFamily::BaggedTrees,
    };
    let attribute = matches
        .get_one::<String>("attribute")
        .map(String::as_str)
        .unwrap_or_default();
    let result = run_ablation(&args, family, attribute)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    eprintln!(
        "[triage] {} without '{}': AUC {:.3} -> {:.3}",
        result.family, result.attribute, result.full_auc, result.ablated_auc
    );
    Ok(())
}

fn handle_predict(matches: &ArgMatches) -> Result<()> {
    let (Some(model), Some(data)) = (
        matches.get_one::<PathBuf>("model"),
        matches.get_one::<PathBuf>("data"),
    ) else {
        unreachable!("model and data are required by CLI configuration")
    };
    let args = PredictArgs {
        model: model.clone(),
        data: data.clone(),
        output: matches.get_one::<PathBuf>("output_file").cloned(),
        reader: reader_config(&aliases(matches))?,
    };
    let n = run_predict(&args)?;
    eprintln!("[triage] Scored {} patients.", n);
    Ok(())
}

fn handle_explain(matches: &ArgMatches) -> Result<()> {
    let (Some(model), Some(data)) = (
        matches.get_one::<PathBuf>("model"),
        matches.get_one::<PathBuf>("data"),
    ) else {
        unreachable!("model and data are required by CLI configuration")
    };
    let args = ExplainArgs {
        model: model.clone(),
        data: data.clone(),
        output: matches.get_one::<PathBuf>("output_file").cloned(),
        top: matches.get_one::<usize>("top").copied(),
        reader: reader_config(&aliases(matches))?,
    };
    let n = run_explain(&args)?;
    eprintln!("[triage] Explained {} patients.", n);
    Ok(())
}

fn handle_simulate(matches: &ArgMatches) -> Result<()> {
    let n = matches.get_one::<usize>("n_patients").copied().unwrap_or(500);
    let seed = matches.get_one::<u64>("seed").copied().unwrap_or(2024);
    let Some(output) = matches.get_one::<PathBuf>("output_file") else {
        unreachable!("output is required by CLI configuration")
    };
    run_simulate(n, seed, output)?;
    eprintln!("[triage] Wrote {} simulated patients to {:?}", n, output);
    Ok(())
}
