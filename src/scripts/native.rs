use crate::commands::ScriptCommand;
use anyhow::Result;
use bevy_ecs::prelude::Entity;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// What a native script may touch while one of its callbacks runs.
pub struct ScriptContext<'a> {
    pub entity: Entity,
    pub dt: f32,
    commands: &'a mut Vec<ScriptCommand>,
}

impl<'a> ScriptContext<'a> {
    pub fn new(entity: Entity, dt: f32, commands: &'a mut Vec<ScriptCommand>) -> Self {
        Self { entity, dt, commands }
    }

    /// Destruction is deferred until the current stage or event has finished.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.commands.push(ScriptCommand::destroy(entity));
    }

    pub fn destroy_self(&mut self) {
        let entity = self.entity;
        self.destroy_entity(entity);
    }

    pub fn set_active(&mut self, entity: Entity, active: bool) {
        self.commands.push(ScriptCommand::set_active(entity, active));
    }
}

/// Behavior compiled into the host. Every callback defaults to a no-op.
pub trait NativeScript: Any {
    fn setup(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn init(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn fixed_update(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn end(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_collision_enter(&mut self, _ctx: &mut ScriptContext<'_>, _other: Entity) -> Result<()> {
        Ok(())
    }

    fn on_collision_stay(&mut self, _ctx: &mut ScriptContext<'_>, _other: Entity) -> Result<()> {
        Ok(())
    }

    fn on_collision_exit(&mut self, _ctx: &mut ScriptContext<'_>, _other: Entity) -> Result<()> {
        Ok(())
    }

    fn on_trigger_enter(&mut self, _ctx: &mut ScriptContext<'_>, _other: Entity) -> Result<()> {
        Ok(())
    }

    fn on_trigger_stay(&mut self, _ctx: &mut ScriptContext<'_>, _other: Entity) -> Result<()> {
        Ok(())
    }

    fn on_trigger_exit(&mut self, _ctx: &mut ScriptContext<'_>, _other: Entity) -> Result<()> {
        Ok(())
    }

    fn on_entity_created(&mut self, _ctx: &mut ScriptContext<'_>, _entity: Entity) -> Result<()> {
        Ok(())
    }

    fn on_entity_runtime_changed(&mut self, _ctx: &mut ScriptContext<'_>, _entity: Entity) -> Result<()> {
        Ok(())
    }

    fn on_destroy(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_enable(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_disable(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_application_quit(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type NativeFactory = Rc<dyn Fn() -> Box<dyn NativeScript>>;

/// The explicit list of native script types the host was built with, keyed by qualified name.
#[derive(Default, Clone)]
pub struct NativeScriptCatalog {
    factories: BTreeMap<String, NativeFactory>,
}

impl NativeScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn NativeScript> + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Rc::new(factory)).is_some() {
            log::warn!("[scripts] native script type {name} registered twice; keeping the latest factory");
        }
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn NativeScript> + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn factory(&self, name: &str) -> Option<NativeFactory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for NativeScriptCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
