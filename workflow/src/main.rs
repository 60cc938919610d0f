use anyhow::Context;
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use common::config::Settings;
use etl::functions::WeatherFunction;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use workflow::{Pipeline, RunContext, schedule};

const DEFAULT_CONFIG: &str = "config/weather.toml";

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .default_value(DEFAULT_CONFIG)
        .help("Sets a custom config file")
}

fn cli() -> Command {
    Command::new("weather-etl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Daily weather ETL: archive API to object storage to warehouse")
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run the weather DAG once")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("schedule")
                .about("Run the weather DAG daily until interrupted")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("extract")
                .about("Fetch the trailing year into the raw prefix")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("transform")
                .about("Convert the raw document into fact and unit Parquet files")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("load")
                .about("Truncate and reload both warehouse tables")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("dag")
                .about("Print the task graph")
                .arg(config_arg()),
        )
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_pipeline(matches: &ArgMatches) -> anyhow::Result<Pipeline> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG);
    info!(config = %config_path, "Loading settings");

    let settings = Settings::new(config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path))?;
    Pipeline::open(settings)
        .await
        .context("Failed to open storage or warehouse")
}

async fn invoke(function: &dyn WeatherFunction) -> anyhow::Result<bool> {
    let response = function.invoke(Utc::now().date_naive()).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.is_success())
}

/// Returns whether the command succeeded.
async fn execute(matches: ArgMatches) -> anyhow::Result<bool> {
    let Some((name, sub)) = matches.subcommand() else {
        anyhow::bail!("Please specify a valid subcommand");
    };
    let pipeline = open_pipeline(sub).await?;

    match name {
        "run" => {
            let report = pipeline.run(RunContext::manual()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.succeeded())
        }
        "schedule" => {
            let hour = pipeline.settings().workflow.schedule_hour_utc;
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
            };
            schedule::run_daily(hour, shutdown, |logical_date| {
                let pipeline = &pipeline;
                async move {
                    match pipeline.run(RunContext::scheduled(logical_date)).await {
                        Ok(report) if report.succeeded() => {
                            info!(run_id = %report.run_id, "Scheduled run succeeded")
                        }
                        Ok(report) => error!(
                            run_id = %report.run_id,
                            failed = ?report.failed_tasks(),
                            "Scheduled run failed"
                        ),
                        Err(e) => error!(error = %e, "Scheduled run could not start"),
                    }
                }
            })
            .await;
            Ok(true)
        }
        "extract" => invoke(&pipeline.extractor()?).await,
        "transform" => invoke(&pipeline.transformer()).await,
        "load" => {
            let report = pipeline.loader().run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(true)
        }
        "dag" => {
            print!("{}", pipeline.dag()?);
            Ok(true)
        }
        other => anyhow::bail!("Unknown subcommand '{}'", other),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json"));

    match execute(matches).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("weather-etl error: {:#}", e);
            process::exit(1);
        }
    }
}
