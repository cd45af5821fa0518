//! `forkscope <config.yaml> [--forks N]`
//!
//! Starts a run, splits the initial process up to N times and lets every
//! process claim one state id. The initial process then reaps its children
//! and sweeps their slots.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::{info, warn};

use forkscope::{
    plugin, DuplicationOutcome, LogKind, Plugin, PluginCatalog, PluginContext, PluginDescriptor,
    RunConfig, Runtime, RuntimeOptions,
};

/// Counts the states explored by its process
#[plugin(
    name = "StateLogger",
    capability = "state-log",
    dependencies = "CorePlugin",
    description = "Counts explored states per process"
)]
#[derive(Debug, Default)]
struct StateLogger {
    label: String,
    explored: u64,
}

impl StateLogger {
    fn explored(&mut self) -> u64 {
        self.explored += 1;
        self.explored
    }
}

impl Plugin for StateLogger {
    fn descriptor(&self) -> &'static PluginDescriptor {
        &Self::DESCRIPTOR
    }

    fn initialize(&mut self, ctx: &PluginContext<'_>) -> anyhow::Result<()> {
        self.label = ctx
            .settings
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or("states")
            .to_string();
        Ok(())
    }
}

struct Args {
    config: PathBuf,
    forks: u32,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut forks = 0;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--forks" => {
                let value = args.next().ok_or_else(|| anyhow!("--forks needs a value"))?;
                forks = value
                    .parse()
                    .with_context(|| format!("invalid --forks value {value:?}"))?;
            }
            _ if config.is_none() => config = Some(PathBuf::from(arg)),
            other => bail!("unexpected argument {other:?}"),
        }
    }
    let config = config.ok_or_else(|| anyhow!("usage: forkscope <config.yaml> [--forks N]"))?;
    Ok(Args { config, forks })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = RunConfig::load_yaml_file(&args.config)?;
    let options = RuntimeOptions {
        argv: std::env::args().collect(),
        config_path: Some(args.config.clone()),
        ..RuntimeOptions::default()
    };
    let mut runtime = Runtime::start(config, &PluginCatalog::linked(), options)?;

    let mut children = Vec::new();
    for _ in 0..args.forks {
        match runtime.fork()? {
            DuplicationOutcome::ParentContinue { child_pid, .. } => children.push(child_pid),
            DuplicationOutcome::ChildContinue { .. } => break,
            DuplicationOutcome::ResourceExhausted => {
                warn!("No capacity left after {} forks", children.len());
                break;
            }
        }
    }

    let state_id = runtime.fetch_and_increment_state_id()?;
    let explored = runtime
        .with_plugin_mut::<StateLogger, _>("state-log", |logger| {
            (logger.label.clone(), logger.explored())
        });
    let text = match explored {
        Some((label, count)) => format!("{label}: {count} explored by {}", runtime.identity()),
        None => format!("state explored by {}", runtime.identity()),
    };
    runtime.log_line(LogKind::Message, state_id, &text)?;

    if runtime.identity().is_initial() {
        for child in children {
            match waitpid(Pid::from_raw(child as i32), None) {
                Ok(WaitStatus::Exited(pid, code)) => info!("Child {} exited with {}", pid, code),
                Ok(status) => info!("Child {} ended: {:?}", child, status),
                Err(e) => warn!("Waiting for child {} failed: {}", child, e),
            }
        }
        if runtime.check_dead_processes()? {
            info!("Swept slots left behind by children");
        }
        info!(
            "{} processes still registered, next state id {}",
            runtime.current_process_count()?,
            runtime.fetch_and_increment_state_id()?
        );
    }

    runtime.shutdown();
    Ok(())
}
