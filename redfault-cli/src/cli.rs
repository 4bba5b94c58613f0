use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use redfault::logging::{self, WorkerGuard};
use redfault::target::{MemoryTarget, RedisConnector};
use redfault::{Endpoints, Engine, RoutingConnector, Settings};

use crate::commands::list::ListArgs;
use crate::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(
    name = "redfault",
    version,
    about = "Fault injection and health checks for Redis-compatible data stores"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available attacks and checks
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Run one attack or check until its window closes
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true, env = "REDFAULT_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

impl GlobalFlags {
    pub fn init_logging(&self) -> anyhow::Result<Option<WorkerGuard>> {
        match &self.log_dir {
            Some(dir) => Ok(Some(logging::init_file_logging(dir, &self.log_level)?)),
            None => {
                logging::init_logging(&self.log_level);
                Ok(None)
            }
        }
    }

    /// Engine configured from the environment, plus the stored endpoints
    /// used to resolve target names.
    pub fn create_engine(&self) -> anyhow::Result<(Engine, Endpoints)> {
        let settings = Settings::from_env()?;
        let redis = RedisConnector::new(settings.engine.dial_timeout(), settings.engine.op_timeout());
        let connector = RoutingConnector::new(redis, MemoryTarget::new());
        let engine = Engine::new(Arc::new(connector), settings.engine);
        Ok((engine, settings.endpoints))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    /// One JSON object per line
    Json,
}
