//! Simulated deck-module registry.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pipetter_traits::{BoundaryResult, ModuleAtPort, ModuleInfo, ModuleProvider, ModuleType};

use crate::error::{HwError, Result};

/// Resolve a short module name ("tempdeck") to its model and type.
pub fn module_model(name: &str) -> Result<(&'static str, ModuleType)> {
    match name {
        "tempdeck" | "temperatureModuleV2" => Ok(("temperatureModuleV2", ModuleType::Temperature)),
        "magdeck" | "magneticModuleV2" => Ok(("magneticModuleV2", ModuleType::Magnetic)),
        "thermocycler" | "thermocyclerModuleV1" => {
            Ok(("thermocyclerModuleV1", ModuleType::Thermocycler))
        }
        "heatershaker" | "heaterShakerModuleV1" => {
            Ok(("heaterShakerModuleV1", ModuleType::HeaterShaker))
        }
        other => Err(HwError::UnknownModule(other.to_string())),
    }
}

fn sim_port(name: &str, idx: usize) -> String {
    format!("/dev/ot_module_sim_{name}{idx}")
}

#[derive(Debug, Default)]
pub struct SimulatedModules {
    modules: Mutex<Vec<ModuleInfo>>,
}

impl SimulatedModules {
    /// Registry pre-populated with the named modules on simulated ports.
    pub fn with_modules(names: &[String]) -> Result<Self> {
        let mut mods = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            mods.push(Self::make(&sim_port(name, idx), name, true)?);
        }
        Ok(Self {
            modules: Mutex::new(mods),
        })
    }

    fn make(port: &str, name: &str, simulated: bool) -> Result<ModuleInfo> {
        let (model, module_type) = module_model(name)?;
        Ok(ModuleInfo {
            port: port.to_string(),
            model: model.to_string(),
            module_type,
            serial: Some(format!("{model}-{}", port.rsplit('/').next().unwrap_or(port))),
            simulated,
        })
    }

    fn modules(&self) -> MutexGuard<'_, Vec<ModuleInfo>> {
        self.modules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ModuleProvider for SimulatedModules {
    async fn register_modules(
        &self,
        new_at_ports: Vec<ModuleAtPort>,
        removed_at_ports: Vec<ModuleAtPort>,
    ) -> BoundaryResult<()> {
        let mut added = Vec::with_capacity(new_at_ports.len());
        for m in &new_at_ports {
            added.push(Self::make(&m.port, &m.name, true)?);
        }
        let mut mods = self.modules();
        mods.retain(|m| !removed_at_ports.iter().any(|r| r.port == m.port));
        for m in added {
            tracing::info!(port = %m.port, model = %m.model, "module registered");
            mods.retain(|existing| existing.port != m.port);
            mods.push(m);
        }
        Ok(())
    }

    fn available_modules(&self) -> Vec<ModuleInfo> {
        self.modules().clone()
    }

    fn find_modules(
        &self,
        model: &str,
        module_type: ModuleType,
    ) -> (Vec<ModuleInfo>, Option<ModuleInfo>) {
        let matching: Vec<ModuleInfo> = self
            .modules()
            .iter()
            .filter(|m| m.model == model && m.module_type == module_type)
            .cloned()
            .collect();
        if !matching.is_empty() {
            return (matching, None);
        }
        let fallback = ModuleInfo {
            port: format!("/dev/ot_module_sim_{model}"),
            model: model.to_string(),
            module_type,
            serial: None,
            simulated: true,
        };
        (matching, Some(fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_remove() {
        let reg = SimulatedModules::with_modules(&["tempdeck".to_string()]).unwrap();
        assert_eq!(reg.available_modules().len(), 1);
        reg.register_modules(
            vec![ModuleAtPort {
                port: "/dev/ttyACM1".into(),
                name: "magdeck".into(),
            }],
            vec![ModuleAtPort {
                port: "/dev/ot_module_sim_tempdeck0".into(),
                name: "tempdeck".into(),
            }],
        )
        .await
        .unwrap();
        let mods = reg.available_modules();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].module_type, ModuleType::Magnetic);
    }

    #[test]
    fn find_falls_back_to_simulated() {
        let reg = SimulatedModules::default();
        let (found, fallback) = reg.find_modules("thermocyclerModuleV1", ModuleType::Thermocycler);
        assert!(found.is_empty());
        assert!(fallback.unwrap().simulated);
    }

    #[test]
    fn unknown_module_name_is_rejected() {
        assert!(SimulatedModules::with_modules(&["toaster".to_string()]).is_err());
    }
}
