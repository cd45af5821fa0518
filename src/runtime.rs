//! Per-process runtime: shared registry, coordinator, output session and
//! plugins wired together.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::core::errors::{ForkscopeError, Result};
use crate::plugin::catalog::PluginCatalog;
use crate::plugin::instance::{ForkEvent, Plugin};
use crate::plugin::registry::{CapabilityRegistry, PluginHandle};
use crate::process::coordinator::{DuplicationOutcome, ProcessCoordinator};
use crate::process::duplicate::{Duplicator, ForkDuplicator};
use crate::process::identity::WorkerIdentity;
use crate::process::liveness::{LivenessProbe, SignalProbe};
use crate::session::output::{format_log_prefix, LogKind, OutputSession, SessionOptions};
use crate::shared::registry::SharedRegistry;

/// A resource that cannot be shared with a duplicated process and must be
/// rebuilt in the child (solver connections, timers, counters).
pub trait ProcessLocal {
    fn name(&self) -> &str;

    fn reinitialize(&mut self, identity: &WorkerIdentity) -> Result<()>;
}

/// Counters for the current process only; reset in every new child
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStatistics {
    pub forks_requested: u64,
    pub forks_succeeded: u64,
    pub forks_refused: u64,
    pub state_ids_issued: u64,
    pub dead_processes_reclaimed: u64,
}

pub struct RuntimeOptions {
    pub session: SessionOptions,
    /// Saved into the output directory when non-empty
    pub argv: Vec<String>,
    /// Copied into the output directory when set
    pub config_path: Option<PathBuf>,
    pub duplicator: Box<dyn Duplicator>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            argv: Vec::new(),
            config_path: None,
            duplicator: Box::new(ForkDuplicator),
        }
    }
}

impl RuntimeOptions {
    pub fn with_duplicator(mut self, duplicator: Box<dyn Duplicator>) -> Self {
        self.duplicator = duplicator;
        self
    }
}

pub struct Runtime {
    config: RunConfig,
    coordinator: ProcessCoordinator,
    session: OutputSession,
    plugins: Option<CapabilityRegistry>,
    locals: Vec<Box<dyn ProcessLocal>>,
    stats: RuntimeStatistics,
    started: DateTime<Utc>,
}

impl Runtime {
    /// Start a run in the calling process, which becomes logical process 0
    pub fn start(config: RunConfig, catalog: &PluginCatalog, options: RuntimeOptions) -> Result<Self> {
        config.validate()?;
        let limits = config.limits();
        let started = Utc::now();

        let registry = Arc::new(SharedRegistry::create(limits)?);
        let coordinator = ProcessCoordinator::bootstrap(registry, options.duplicator)?;
        let identity = coordinator.identity();

        let mut session_options = options.session;
        if config.output_dir.is_some() {
            session_options.base_dir = config.output_dir.clone();
        }
        session_options.verbose |= config.verbose;
        let session = OutputSession::init(&session_options, limits, &identity)?;
        session.write_run_info(&identity, started)?;
        if let Some(path) = &options.config_path {
            session.save_config_copy(path)?;
        }
        if !options.argv.is_empty() {
            session.save_command_line(&options.argv)?;
        }

        let plugins = CapabilityRegistry::build(
            catalog,
            &config.plugins,
            &config.plugin_settings,
            identity,
        )?;

        info!(
            "Run started by pid {} with up to {} processes",
            identity.os_pid, limits.max_processes
        );
        Ok(Self {
            config,
            coordinator,
            session,
            plugins: Some(plugins),
            locals: Vec::new(),
            stats: RuntimeStatistics::default(),
            started,
        })
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.coordinator.identity()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn session(&self) -> &OutputSession {
        &self.session
    }

    pub fn shared_registry(&self) -> &Arc<SharedRegistry> {
        self.coordinator.registry()
    }

    pub fn statistics(&self) -> RuntimeStatistics {
        self.stats
    }

    /// Plugins of this process; `None` after shutdown
    pub fn plugins(&self) -> Option<&CapabilityRegistry> {
        self.plugins.as_ref()
    }

    pub fn register_process_local(&mut self, local: Box<dyn ProcessLocal>) {
        debug!("Tracking process-local resource {}", local.name());
        self.locals.push(local);
    }

    /// Split this process in two; see [`DuplicationOutcome`].
    pub fn fork(&mut self) -> Result<DuplicationOutcome> {
        let parent = self.identity();
        self.stats.forks_requested += 1;
        self.notify(&ForkEvent::Prefork { identity: parent });

        let outcome = self.coordinator.request_duplication()?;
        match outcome {
            DuplicationOutcome::ResourceExhausted => {
                self.stats.forks_refused += 1;
            }
            DuplicationOutcome::ParentContinue { .. } => {
                self.stats.forks_succeeded += 1;
                self.notify(&ForkEvent::Postfork {
                    identity: parent,
                    is_child: false,
                    parent_index: parent.logical_index,
                });
            }
            DuplicationOutcome::ChildContinue { identity } => {
                self.session.reinit_for_child(&identity)?;
                self.session.write_run_info(&identity, Utc::now())?;
                for local in &mut self.locals {
                    local.reinitialize(&identity)?;
                }
                self.stats = RuntimeStatistics::default();
                self.notify(&ForkEvent::Postfork {
                    identity,
                    is_child: true,
                    parent_index: parent.logical_index,
                });
            }
        }
        Ok(outcome)
    }

    fn notify(&self, event: &ForkEvent) {
        if let Some(plugins) = &self.plugins {
            plugins.notify_fork(event);
        }
    }

    pub fn fetch_and_increment_state_id(&mut self) -> Result<u64> {
        let id = self.shared_registry().fetch_and_increment_state_id()?;
        self.stats.state_ids_issued += 1;
        Ok(id)
    }

    pub fn current_process_count(&self) -> Result<u32> {
        self.shared_registry().current_process_count()
    }

    pub fn process_index_for_slot(&self, slot: usize) -> Result<Option<u32>> {
        self.shared_registry().process_index_for_slot(slot)
    }

    /// Reclaims slots of processes that died without cleaning up
    pub fn check_dead_processes(&mut self) -> Result<bool> {
        self.check_dead_processes_with(&SignalProbe)
    }

    pub fn check_dead_processes_with(&mut self, probe: &dyn LivenessProbe) -> Result<bool> {
        let reclaimed = self.shared_registry().reclaim_dead_processes(probe)?;
        self.stats.dead_processes_reclaimed += reclaimed as u64;
        Ok(reclaimed > 0)
    }

    pub fn refresh_plugins(&self) {
        if let Some(plugins) = &self.plugins {
            plugins.refresh_plugins();
        }
    }

    pub fn get_plugin(&self, key: &str) -> Option<PluginHandle> {
        self.plugins.as_ref()?.get_plugin(key)
    }

    pub fn with_plugin<T, R>(&self, key: &str, f: impl FnOnce(&T) -> R) -> Option<R>
    where
        T: Plugin + 'static,
    {
        self.plugins.as_ref()?.with_plugin(key, f)
    }

    pub fn with_plugin_mut<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Plugin + 'static,
    {
        self.plugins.as_ref()?.with_plugin_mut(key, f)
    }

    pub fn log_prefix(&self, state_id: u64) -> String {
        format_log_prefix(
            Utc::now() - self.started,
            self.config.limits().is_multi_process(),
            &self.identity(),
            state_id,
        )
    }

    /// Writes one prefixed line to the given output class
    pub fn log_line(&self, kind: LogKind, state_id: u64, text: &str) -> Result<()> {
        let line = format!("{}{}\n", self.log_prefix(state_id), text);
        let mut sink = self.session.sink(kind);
        sink.write_all(line.as_bytes())
            .map_err(|e| ForkscopeError::io("write log line", e))
    }

    /// Destroys plugins in activation order, then frees this process's slot.
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        let Some(plugins) = self.plugins.take() else {
            return;
        };
        drop(plugins);
        if let Err(e) = self.session.flush() {
            warn!("Flushing output failed during shutdown: {}", e);
        }
        if let Err(e) = self.coordinator.retire() {
            warn!("Releasing registry slot failed during shutdown: {}", e);
        }
        debug!("Process {} shut down", self.identity());
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
