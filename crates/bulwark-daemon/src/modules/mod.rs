//! Builtin capability modules and startup loading

pub mod firewall;
pub mod system_info;

use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::module::CapabilityModule;
use crate::registry::ModuleRegistry;

use firewall::FirewallModule;
use system_info::SystemInfoModule;

type Constructor = fn(&DaemonConfig) -> Box<dyn CapabilityModule>;

fn build_system_info(_config: &DaemonConfig) -> Box<dyn CapabilityModule> {
    Box::new(SystemInfoModule::new())
}

fn build_firewall(config: &DaemonConfig) -> Box<dyn CapabilityModule> {
    Box::new(FirewallModule::new(config.firewall.clone()))
}

/// Every module the daemon knows how to build, by name
static BUILTIN: &[(&str, Constructor)] = &[
    (SystemInfoModule::NAME, build_system_info),
    (FirewallModule::NAME, build_firewall),
];

/// Names accepted in `DaemonConfig::modules`
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTIN.iter().map(|(name, _)| *name)
}

/// Build the configured modules
///
/// `system-info` is always loaded first. Modules that fail to initialize are
/// logged and left out; the daemon runs with whatever succeeded.
pub async fn load_builtin(config: &DaemonConfig) -> ModuleRegistry {
    let mut wanted = vec![SystemInfoModule::NAME.to_string()];
    wanted.extend(
        config
            .modules
            .iter()
            .filter(|name| name.as_str() != SystemInfoModule::NAME)
            .cloned(),
    );

    let mut modules = Vec::with_capacity(wanted.len());
    for name in wanted {
        let Some((_, build)) = BUILTIN.iter().find(|(builtin, _)| *builtin == name) else {
            warn!(
                "Unknown module {:?} in configuration (known: {}), skipping",
                name,
                builtin_names().collect::<Vec<_>>().join(", ")
            );
            continue;
        };
        modules.push(build(config));
    }

    register_initialized(modules).await
}

/// Initialize each module and register the ones that come up
pub async fn register_initialized(modules: Vec<Box<dyn CapabilityModule>>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();

    for mut module in modules {
        let name = module.name().to_string();
        if let Err(e) = module.initialize().await {
            warn!("Module {} unavailable: {}", name, e);
            continue;
        }
        if let Err(e) = registry.register(module) {
            warn!("{}", e);
            continue;
        }
        info!("Loaded module {}", name);
    }

    info!(
        "{} module(s) loaded: {}",
        registry.len(),
        registry.names().join(", ")
    );
    registry
}
