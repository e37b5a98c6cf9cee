pub mod assets;
pub mod commands;
pub mod config;
pub mod ecs;
pub mod events;
pub mod managed;
pub mod scene;
pub mod scripts;

pub use config::{LogicConfig, LogicConfigOverrides};
pub use ecs::EcsWorld;
pub use managed::ManagedRuntimeHost;
pub use scripts::{CloneCoordinator, LogicSystem, NativeScript, NativeScriptCatalog, ScriptBinding, VariableRecord};
