mod cli;
mod ui;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, Command, ConfigAction};
use hireloop::config::{Config, DEFAULT_CONFIG_FILE};
use hireloop::store::PersistentStore;
use hireloop::{Actuator, HireloopError, HttpActuator, RunController, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = Config::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(dir) = cli.data_dir {
        config.application.data_dir = dir;
    }

    match cli.command {
        Command::Config { action } => config_command(action, config, &config_path),
        Command::Run => run(config, config_path).await,
        Command::Apply { candidate_id } => {
            let controller = controller(config, config_path)?;
            let record = controller.submit_manual(&candidate_id).await?;
            ui::print_applications(std::slice::from_ref(&record));
            Ok(())
        }
        Command::Status { json } => {
            let store = open_store(&config)?;
            let stats = store.stats(Utc::now(), config.utc_offset());
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                ui::print_stats(&stats, config.application.max_applications_per_day);
            }
            Ok(())
        }
        Command::Candidates { pending } => {
            let mut candidates = open_store(&config)?.candidates();
            if pending {
                candidates.retain(|c| !c.outcome.is_terminal());
            }
            ui::print_candidates(&candidates);
            Ok(())
        }
        Command::Applications => {
            ui::print_applications(&open_store(&config)?.applications());
            Ok(())
        }
        Command::Logs { limit } => {
            ui::print_logs(&open_store(&config)?.logs(Some(limit)));
            Ok(())
        }
        Command::Info { json } => {
            let info = open_store(&config)?.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                ui::print_storage_info(&info);
            }
            Ok(())
        }
        Command::Backup => {
            let path = open_store(&config)?.backup(Some(&config), Utc::now())?;
            println!("Backup written to {}", path.display());
            Ok(())
        }
        Command::Clear { kind, yes } => {
            if !yes {
                bail!("refusing to clear {kind} without --yes");
            }
            open_store(&config)?.clear(kind)?;
            println!("Cleared {kind}.");
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<PersistentStore> {
    let dir = &config.application.data_dir;
    PersistentStore::open(dir).with_context(|| format!("opening data directory {}", dir.display()))
}

fn controller(config: Config, config_path: PathBuf) -> Result<RunController> {
    let actuator: Arc<dyn Actuator> = Arc::new(HttpActuator::new(
        config.actuator_endpoint()?,
        config.actuator.token.clone(),
    )?);
    Ok(RunController::open(config, Some(config_path), actuator)?)
}

async fn run(config: Config, config_path: PathBuf) -> Result<()> {
    let controller = controller(config, config_path)?;
    let response = controller.start();
    if !response.accepted {
        bail!("{}", response.message);
    }
    info!(run_id = ?response.run_id, "run started");

    let stopper = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current application");
            stopper.stop();
        }
    });

    let progress = ui::RunProgress::start();
    let mut updates = controller.subscribe();
    let initial = updates.borrow_and_update().clone();
    progress.update(&initial);
    while initial.running && updates.changed().await.is_ok() {
        let status = updates.borrow_and_update().clone();
        progress.update(&status);
        if !status.running {
            break;
        }
    }

    let Some(report) = controller.wait().await else {
        bail!("run task ended unexpectedly");
    };
    progress.finish(&report);
    match report.error {
        Some(error) => bail!(error),
        None => Ok(()),
    }
}

fn config_command(action: ConfigAction, config: Config, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        ConfigAction::Validate => match config.validate() {
            Ok(()) => println!("Configuration OK."),
            Err(HireloopError::Validation(problems)) => {
                for problem in &problems {
                    println!("  ✗ {problem}");
                }
                bail!("{} problem(s) in {}", problems.len(), path.display());
            }
            Err(err) => return Err(err.into()),
        },
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save(path)?;
            println!("Wrote {}", path.display());
        }
        ConfigAction::Accept => {
            // Re-read the file so env and flag overrides are not persisted.
            let mut config = Config::read_file(path)?;
            config.user.agreement_accepted = true;
            config.user.agreement_timestamp = Some(Utc::now());
            config.save(path)?;
            println!("Agreement recorded in {}", path.display());
        }
    }
    Ok(())
}
