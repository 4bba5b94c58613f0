use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Args;
use redfault::{ActionKind, TargetDescriptor, actions};
use serde_json::{Map, Value, json};

use crate::cli::{GlobalFlags, OutputFormat};
use crate::output::Printer;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Action id (see `redfault list`)
    pub action: String,

    /// Target URL (redis://, rediss://, memory://) or configured endpoint name
    #[arg(long, short = 't', env = "REDFAULT_TARGET")]
    pub target: String,

    /// How long the action runs, e.g. 30s or 2m
    #[arg(long, short = 'd', default_value = "10s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Action parameter as key=value. Values are parsed as JSON, falling
    /// back to a plain string
    #[arg(long = "param", short = 'p', value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Interval between status polls
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub poll: Duration,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn build_config(params: Vec<(String, Value)>, duration: Duration) -> Value {
    let mut config: Map<String, Value> = params.into_iter().collect();
    config.insert("duration".into(), json!(duration.as_millis() as u64));
    Value::Object(config)
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

pub async fn execute(args: RunArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let (engine, endpoints) = global.create_engine()?;
    let action = actions::find(&engine, &args.action)
        .ok_or_else(|| anyhow!("unknown action '{}', see `redfault list`", args.action))?;
    let descriptor = action.descriptor();
    let target = endpoints.resolve(&TargetDescriptor::new(args.target.clone()));
    let printer = Printer::new(args.format);

    let config = build_config(args.params, args.duration);
    let mut state = action
        .prepare(&config, target)
        .with_context(|| format!("invalid configuration for {}", descriptor.id))?;

    let started = action
        .start(&mut state)
        .await
        .with_context(|| format!("failed to start {}", descriptor.id))?;
    let key = state["params"]["key"].as_str().unwrap_or_default().to_string();
    printer.start(descriptor.id, &key, &started);

    let mut poll = tokio::time::interval(args.poll.max(Duration::from_millis(10)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut failure = None;
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                interrupted = true;
                break;
            }
            _ = poll.tick() => {
                let progress = action.status(&mut state).await?;
                printer.status(&progress);
                if progress.completed {
                    failure = progress.failure;
                    break;
                }
            }
        }
    }

    if interrupted {
        let signalled = engine.registry().cancel_all();
        tracing::warn!(execution_key = %key, signalled, "Interrupted, stopping execution");
    }

    let summary = action.stop(&mut state).await?;
    printer.stop(&summary);

    if interrupted {
        let stragglers = engine.shutdown().await;
        if stragglers > 0 {
            tracing::warn!(stragglers, "Worker loops still running after shutdown grace");
        }
        anyhow::bail!("{} interrupted before its window closed", descriptor.id);
    }
    if let Some(failure) = failure {
        let what = match descriptor.kind {
            ActionKind::Check => "check",
            ActionKind::Attack => "attack",
        };
        anyhow::bail!("{} {} failed: {}", what, descriptor.id, failure);
    }
    Ok(())
}
