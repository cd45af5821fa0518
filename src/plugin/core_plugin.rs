use tracing::trace;

use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::instance::{ForkEvent, Plugin, PluginContext};
use crate::process::identity::WorkerIdentity;

/// Always-present plugin; keeps track of which process it lives in.
#[forkscope_macros::plugin(
    name = "CorePlugin",
    description = "Mandatory services shared by every plugin"
)]
#[derive(Debug, Default)]
pub struct CorePlugin {
    identity: Option<WorkerIdentity>,
    forks_requested: u32,
    children_started: u32,
    is_child: bool,
}

impl CorePlugin {
    /// Identity of the hosting process, `None` before initialization
    pub fn identity(&self) -> Option<WorkerIdentity> {
        self.identity
    }

    /// Duplications requested by this process since it started
    pub fn forks_requested(&self) -> u32 {
        self.forks_requested
    }

    /// Successful duplications in which this process stayed the parent
    pub fn children_started(&self) -> u32 {
        self.children_started
    }

    pub fn is_child(&self) -> bool {
        self.is_child
    }
}

impl Plugin for CorePlugin {
    fn descriptor(&self) -> &'static PluginDescriptor {
        &Self::DESCRIPTOR
    }

    fn initialize(&mut self, ctx: &PluginContext<'_>) -> anyhow::Result<()> {
        trace!(
            "Core plugin in process {} sees {} active plugins",
            ctx.identity,
            ctx.registry.len()
        );
        self.identity = Some(ctx.identity);
        Ok(())
    }

    fn on_process_fork(&mut self, event: &ForkEvent) {
        match *event {
            ForkEvent::Prefork { identity } => {
                self.identity = Some(identity);
                self.forks_requested += 1;
            }
            ForkEvent::Postfork {
                identity,
                is_child: true,
                ..
            } => {
                self.identity = Some(identity);
                self.is_child = true;
                self.forks_requested = 0;
                self.children_started = 0;
            }
            ForkEvent::Postfork { identity, .. } => {
                self.identity = Some(identity);
                self.children_started += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_descriptor() {
        assert_eq!(CorePlugin::DESCRIPTOR.name, "CorePlugin");
        assert_eq!(CorePlugin::DESCRIPTOR.capability, None);
        assert!(CorePlugin::DESCRIPTOR.dependencies.is_empty());
    }

    #[test]
    fn test_fork_events_update_counters() {
        let parent = WorkerIdentity::initial(10);
        let child = WorkerIdentity {
            slot: 1,
            logical_index: 1,
            os_pid: 11,
        };

        let mut core = CorePlugin::default();
        core.on_process_fork(&ForkEvent::Prefork { identity: parent });
        core.on_process_fork(&ForkEvent::Postfork {
            identity: parent,
            is_child: false,
            parent_index: 0,
        });
        assert_eq!(core.forks_requested(), 1);
        assert_eq!(core.children_started(), 1);
        assert!(!core.is_child());

        core.on_process_fork(&ForkEvent::Postfork {
            identity: child,
            is_child: true,
            parent_index: 0,
        });
        assert!(core.is_child());
        assert_eq!(core.identity(), Some(child));
        assert_eq!(core.forks_requested(), 0);
    }

    #[test]
    fn test_initialize_records_identity() {
        let registry = crate::plugin::registry::CapabilityRegistry::new();
        let identity = WorkerIdentity::initial(42);
        let ctx = PluginContext {
            registry: &registry,
            identity,
            settings: &serde_json::Value::Null,
        };

        let mut core = CorePlugin::default();
        assert_eq!(core.identity(), None);
        core.initialize(&ctx).unwrap();
        assert_eq!(core.identity(), Some(identity));
        assert!(!core.is_child());
    }
}
