//! Admin command line for the KPI engine. Every command prints JSON on stdout.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use kpi_engine::{
    config::{database, plan},
    core::{
        actuals::get_actuals,
        contract_status::{delete_contract_status, list_contract_statuses, upsert_contract_status},
        contracts::{create_contract, create_ledger_entry},
        metrics::{
            MetricInput, delete_metric_definition, list_metrics, set_metric_active,
            upsert_metric_definition,
        },
        overrides::{create_override, delete_override, list_overrides},
        recompute::{RecomputeEngine, RecomputeErrorKind, RecomputeStatus},
        report::monthly_scorecard,
        seed::{seed_baseline, seed_from_plan},
        state::last_recompute_at,
        targets::{list_targets, upsert_monthly_target},
    },
    entities::{LedgerKind, MetricKind},
    errors::{Error, Result},
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kpi-engine",
    about = "Compute, override and inspect monthly KPI metrics",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert metric definitions and monthly targets (baseline plan unless --plan is given)
    Seed {
        /// TOML seed plan to load instead of the embedded baseline
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Recompute and persist every metric of a year
    Recompute(YearArgs),
    /// When a year was last persisted
    LastRun(YearArgs),
    /// Read persisted actuals
    Actuals {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: Option<u32>,
        /// Metric key
        #[arg(long)]
        metric: Option<String>,
    },
    /// Actual against target for every active metric of one month
    Scorecard {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
    },
    /// Metric definitions
    Metric {
        #[command(subcommand)]
        command: MetricCommand,
    },
    /// Monthly targets
    Target {
        #[command(subcommand)]
        command: TargetCommand,
    },
    /// Manual overrides
    Override {
        #[command(subcommand)]
        command: OverrideCommand,
    },
    /// Contract status classification
    Status {
        #[command(subcommand)]
        command: StatusCommand,
    },
    /// Record a contract
    Contract(ContractArgs),
    /// Record a revenue or expense posting
    Ledger(LedgerArgs),
}

#[derive(Args, Debug)]
struct YearArgs {
    #[arg(long)]
    year: i32,
}

#[derive(Subcommand, Debug)]
enum MetricCommand {
    /// List every definition, active or not
    List,
    /// Create a definition or rewrite the one with the same key
    Set {
        #[arg(long)]
        key: String,
        #[arg(long)]
        title: String,
        /// Formula over other metrics; makes the metric derived
        #[arg(long)]
        formula: Option<String>,
        #[arg(long, default_value = "")]
        unit: String,
        /// Store the metric switched off
        #[arg(long)]
        inactive: bool,
    },
    /// Switch a metric on or off
    Activate {
        #[arg(long)]
        key: String,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Delete a metric that nothing references any more
    Delete {
        #[arg(long)]
        key: String,
    },
}

#[derive(Subcommand, Debug)]
enum TargetCommand {
    /// Create or replace the target of one metric and month
    Set {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        #[arg(long)]
        metric: String,
        #[arg(long, allow_hyphen_values = true)]
        value: f64,
    },
    /// List the targets of a year
    List(YearArgs),
}

#[derive(Subcommand, Debug)]
enum OverrideCommand {
    /// Create or replace the override of one metric and month
    Set {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        #[arg(long)]
        metric: String,
        #[arg(long, allow_hyphen_values = true)]
        value: f64,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long, default_value = "cli")]
        updated_by: String,
    },
    /// Delete an override by id
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// List the overrides of a year
    List(YearArgs),
}

#[derive(Subcommand, Debug)]
enum StatusCommand {
    /// Create or update a status classification
    Set {
        #[arg(long)]
        status: String,
        /// Whether contracts in this status count as active
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Delete a status classification by id
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// List every status classification
    List,
}

#[derive(Args, Debug)]
struct ContractArgs {
    #[arg(long)]
    client: String,
    #[arg(long)]
    status: String,
    #[arg(long)]
    monthly_value: f64,
    /// Start date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    start: NaiveDate,
    /// End date (YYYY-MM-DD), exclusive
    #[arg(long, value_parser = parse_date)]
    end: Option<NaiveDate>,
}

#[derive(Args, Debug)]
struct LedgerArgs {
    /// Posting date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    date: NaiveDate,
    #[arg(long, allow_hyphen_values = true)]
    amount: f64,
    /// Record an expense instead of revenue
    #[arg(long)]
    expense: bool,
    #[arg(long, default_value = "")]
    description: String,
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("invalid date '{value}': {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Env vars can also be set externally
    dotenv().ok();

    let cli = Cli::parse();
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to initialize database: {e}"))?;

    match cli.command {
        Command::Seed { plan: None } => print_json(&seed_baseline(&db).await?),
        Command::Seed { plan: Some(path) } => {
            let plan = plan::load_plan(&path)?;
            print_json(&seed_from_plan(&db, &plan).await?)
        }
        Command::Recompute(YearArgs { year }) => {
            let result = RecomputeEngine::new(db).recompute(year).await?;
            print_json(&result)?;
            if result.status == RecomputeStatus::Failed {
                let message = result
                    .errors
                    .iter()
                    .filter(|e| e.kind == RecomputeErrorKind::Persistence)
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(Error::RecomputeNotPersisted { year, message });
            }
            Ok(())
        }
        Command::LastRun(YearArgs { year }) => {
            let at = last_recompute_at(&db, year).await?;
            print_json(&json!({ "year": year, "lastRecomputeAt": at }))
        }
        Command::Actuals {
            year,
            month,
            metric,
        } => print_json(&get_actuals(&db, year, month, metric.as_deref()).await?),
        Command::Scorecard { year, month } => {
            print_json(&monthly_scorecard(&db, year, month).await?)
        }
        Command::Metric { command } => match command {
            MetricCommand::List => print_json(&list_metrics(&db).await?),
            MetricCommand::Set {
                key,
                title,
                formula,
                unit,
                inactive,
            } => {
                let kind = if formula.is_some() {
                    MetricKind::Derived
                } else {
                    MetricKind::Base
                };
                let input = MetricInput {
                    key,
                    title,
                    kind,
                    formula,
                    unit,
                    active: !inactive,
                };
                print_json(&upsert_metric_definition(&db, input).await?)
            }
            MetricCommand::Activate { key, active } => {
                print_json(&set_metric_active(&db, &key, active).await?)
            }
            MetricCommand::Delete { key } => {
                delete_metric_definition(&db, &key).await?;
                print_json(&json!({ "deleted": key }))
            }
        },
        Command::Target { command } => match command {
            TargetCommand::Set {
                year,
                month,
                metric,
                value,
            } => print_json(&upsert_monthly_target(&db, year, month, &metric, value).await?),
            TargetCommand::List(YearArgs { year }) => print_json(&list_targets(&db, year).await?),
        },
        Command::Override { command } => match command {
            OverrideCommand::Set {
                year,
                month,
                metric,
                value,
                note,
                updated_by,
            } => print_json(
                &create_override(&db, year, month, &metric, value, &note, &updated_by).await?,
            ),
            OverrideCommand::Delete { id } => {
                delete_override(&db, id).await?;
                print_json(&json!({ "deleted": id }))
            }
            OverrideCommand::List(YearArgs { year }) => {
                print_json(&list_overrides(&db, year).await?)
            }
        },
        Command::Status { command } => match command {
            StatusCommand::Set { status, active } => {
                print_json(&upsert_contract_status(&db, &status, active).await?)
            }
            StatusCommand::Delete { id } => {
                delete_contract_status(&db, id).await?;
                print_json(&json!({ "deleted": id }))
            }
            StatusCommand::List => print_json(&list_contract_statuses(&db).await?),
        },
        Command::Contract(args) => print_json(
            &create_contract(
                &db,
                &args.client,
                &args.status,
                args.monthly_value,
                args.start,
                args.end,
            )
            .await?,
        ),
        Command::Ledger(args) => {
            let kind = if args.expense {
                LedgerKind::Expense
            } else {
                LedgerKind::Revenue
            };
            print_json(
                &create_ledger_entry(&db, args.date, args.amount, kind, &args.description).await?,
            )
        }
    }
}
