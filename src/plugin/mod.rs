pub mod catalog;
pub mod core_plugin;
pub mod descriptor;
pub mod instance;
pub mod registry;

pub use catalog::{PluginCatalog, PluginKind, PLUGIN_KINDS};
pub use core_plugin::CorePlugin;
pub use descriptor::PluginDescriptor;
pub use instance::{AsAny, ForkEvent, Plugin, PluginContext, PluginState};
pub use registry::{CapabilityRegistry, PluginHandle};
