use clap::{Parser, Subcommand};
use entitlement_meter::clock::SystemClock;
use entitlement_meter::config::Config;
use entitlement_meter::engine::{EntitlementEngine, Remaining};
use entitlement_meter::error::{Error, Result};
use entitlement_meter::logger;
use entitlement_meter::state::{BillingInterval, FeaturePolicy, PlanCatalog};
use entitlement_meter::storage::FileStorage;
use entitlement_meter::store::SimulatedStore;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

type CliEngine = EntitlementEngine<Arc<FileStorage>, SystemClock, SimulatedStore<Arc<FileStorage>>>;

#[derive(Parser)]
#[command(name = "entitlement-meter")]
#[command(about = "Entitlement Meter CLI - subscription gating and free-tier usage metering")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: "human" or "json"
    #[arg(short, long)]
    pub format: Option<String>,

    /// Data directory path
    #[arg(short, long)]
    pub data_dir: Option<String>,

    /// JSON feature policy (defaults to the built-in catalog)
    #[arg(short, long)]
    pub policy: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory
    Init,

    /// Show subscription state and usage of every metered feature
    Status,

    /// Check whether a feature is accessible right now
    Access {
        feature: String,
    },

    /// Record one use of a feature (what the gate does before an action)
    Track {
        feature: String,
    },

    /// Show free uses left for a feature
    Remaining {
        feature: String,
    },

    /// Buy a subscription plan
    Purchase {
        plan_id: String,
    },

    /// Restore purchases from the store
    Restore,

    /// Turn off auto-renewal for the current subscription
    Cancel,

    /// List purchasable plans
    Plans,

    /// Print the active feature policy
    Policy,
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(format) = &cli.format {
        config.output_format = format.clone();
    }
    if let Some(policy) = &cli.policy {
        config.policy_path = Some(PathBuf::from(policy));
    }
    Ok(config)
}

fn load_policy(config: &Config) -> Result<FeaturePolicy> {
    match &config.policy_path {
        Some(path) => FeaturePolicy::from_json_file(path),
        None => Ok(FeaturePolicy::default_catalog()),
    }
}

fn open_engine(config: &Config) -> Result<CliEngine> {
    let storage = Arc::new(FileStorage::new(config));
    let store = SimulatedStore::new(
        storage.clone(),
        PlanCatalog::default_catalog(),
        config.subscription_period_secs(),
    );
    EntitlementEngine::open(storage, SystemClock, store, load_policy(config)?)
}

/// Format output based on format type
fn format_output<T: serde::Serialize + std::fmt::Debug>(data: &T, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(data)
            .map_err(|e| Error::Config(format!("Failed to serialize JSON: {}", e))),
        _ => Ok(format!("{:#?}", data)),
    }
}

fn report_bool(action: &str, ok: bool) -> Result<()> {
    if ok {
        println!("✓ {}", action);
        Ok(())
    } else {
        Err(Error::Purchase(format!("{} did not complete", action)))
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    logger::init(&config.log_level);
    let format = config.output_format.clone();

    match cli.command {
        Commands::Init => {
            fs::create_dir_all(config.kv_dir())
                .map_err(|e| Error::Persistence(format!("Failed to create data directory: {}", e)))?;
            println!("Initialized data directory at: {}", config.data_dir.display());
            Ok(())
        }

        Commands::Status => {
            let engine = open_engine(&config)?;
            println!("{}", format_output(&engine.snapshot()?, &format)?);
            Ok(())
        }

        Commands::Access { feature } => {
            let engine = open_engine(&config)?;
            let output = AccessOutput {
                allowed: engine.has_feature_access(&feature),
                feature,
            };
            println!("{}", format_output(&output, &format)?);
            Ok(())
        }

        Commands::Track { feature } => {
            let engine = open_engine(&config)?;
            let outcome = engine.track_usage(&feature)?;
            println!("{}", format_output(&outcome, &format)?);
            Ok(())
        }

        Commands::Remaining { feature } => {
            let engine = open_engine(&config)?;
            let output = RemainingOutput {
                remaining: engine.remaining_usage(&feature)?,
                feature,
            };
            println!("{}", format_output(&output, &format)?);
            Ok(())
        }

        Commands::Purchase { plan_id } => {
            let engine = open_engine(&config)?;
            report_bool(
                &format!("Subscribed to {}", plan_id),
                engine.purchase_subscription(&plan_id),
            )
        }

        Commands::Restore => {
            let engine = open_engine(&config)?;
            report_bool("Purchases restored", engine.restore_purchases())
        }

        Commands::Cancel => {
            let engine = open_engine(&config)?;
            report_bool("Auto-renewal cancelled", engine.cancel_subscription())
        }

        Commands::Plans => {
            let engine = open_engine(&config)?;
            let plans: Vec<PlanOutput> = engine
                .provider()
                .catalog()
                .plans
                .iter()
                .map(|p| PlanOutput {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    monthly_price_cents: p.price_cents(BillingInterval::Monthly),
                    yearly_price_cents: p.price_cents(BillingInterval::Yearly),
                    features: p.features.clone(),
                })
                .collect();
            println!("{}", format_output(&plans, &format)?);
            Ok(())
        }

        Commands::Policy => {
            println!("{}", format_output(&load_policy(&config)?, &format)?);
            Ok(())
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct AccessOutput {
    feature: String,
    allowed: bool,
}

#[derive(Debug, serde::Serialize)]
struct RemainingOutput {
    feature: String,
    remaining: Remaining,
}

#[derive(Debug, serde::Serialize)]
struct PlanOutput {
    id: String,
    name: String,
    monthly_price_cents: u64,
    yearly_price_cents: u64,
    features: Vec<String>,
}
