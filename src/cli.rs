use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::config::Config;
use crate::enrich::ServiceMapping;
use crate::output;
use crate::pipeline;
use crate::sink::OpenSearchSink;

#[derive(Parser)]
#[command(name = "snowdrift")]
#[command(author, version, about = "Change-management ETL into a search index", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./snowdrift.{toml,json,yaml,yml})
    #[arg(short, long, global = true, env = "SNOWDRIFT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "SNOW_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, global = true, env = "INDEX_USERNAME")]
    index_username: Option<String>,

    #[arg(long, global = true, env = "INDEX_PASSWORD", hide_env_values = true)]
    index_password: Option<String>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract one window of change records and load it
    Run {
        /// Fetch, transform and enrich, then print documents instead of loading
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[arg(long, default_value_t = false)]
        no_progress: bool,
    },
    /// Write an operational notification to the notification index
    Notify {
        #[arg(short, long)]
        api: String,

        #[arg(short, long)]
        message: String,
    },
    /// Load a service mapping file and report its size
    CheckMapping { path: PathBuf },
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(secret) = &self.client_secret {
            config.auth.client_secret = Some(secret.clone());
        }
        if let Some(username) = &self.index_username {
            config.index.username = Some(username.clone());
        }
        if let Some(password) = &self.index_password {
            config.index.password = Some(password.clone());
        }

        Ok(config)
    }

    fn to_json<T: serde::Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }

    async fn execute_run(&self, dry_run: bool, no_progress: bool) -> Result<ExitCode> {
        let config = self.load_config()?;
        config.validate().context("Configuration rejected")?;

        let outcome = pipeline::run(&config, dry_run, !no_progress).await;

        if let Some(documents) = &outcome.documents {
            println!("{}", self.to_json(documents)?);
        }
        output::print_summary(&outcome.report, &outcome.response);
        println!("{}", self.to_json(&outcome.response)?);

        Ok(if outcome.response.status_code == 200 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }

    async fn execute_notify(&self, api: &str, message: &str) -> Result<ExitCode> {
        let config = self.load_config()?;
        let sink = OpenSearchSink::new(&config.index)?;
        let tz = config.change_api.tz()?;
        let now = Utc::now().with_timezone(&tz);

        let written =
            pipeline::notify(&sink, &config.index.notification_index, &now, api, message).await;
        Ok(match written {
            Ok(()) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        })
    }

    fn execute_check_mapping(path: &Path) -> Result<ExitCode> {
        let mapping = ServiceMapping::from_path(path)
            .with_context(|| format!("Invalid service mapping: {}", path.display()))?;
        info!("Service mapping is valid");
        println!("{} services", mapping.len());
        Ok(ExitCode::SUCCESS)
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        match &self.command {
            Commands::Run {
                dry_run,
                no_progress,
            } => self.execute_run(*dry_run, *no_progress).await,
            Commands::Notify { api, message } => self.execute_notify(api, message).await,
            Commands::CheckMapping { path } => Self::execute_check_mapping(path),
        }
    }
}
