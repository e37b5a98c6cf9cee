use super::hot_reload::{AssemblyWatcher, ReloadFlag};
use super::native::{NativeScript, NativeScriptCatalog, ScriptContext};
use super::registry::{LogicError, NativeInstance, ScriptInstanceRegistry};
use crate::assets::AssetManager;
use crate::commands::ScriptCommand;
use crate::config::LogicConfig;
use crate::ecs::EcsWorld;
use crate::events::{ContactEvent, ContactPhase, LogicEvent};
use crate::managed::{LifecycleStage, ManagedEvent, ManagedHandle, ManagedRuntimeHost};
use anyhow::Result;
use bevy_ecs::prelude::Entity;
use log::{debug, error, info, warn};

/// Rounds of script-issued commands applied after one stage or event before giving up.
const MAX_COMMAND_ROUNDS: usize = 32;

/// Drives every script instance in the world: lifecycle stages, event routing, deferred destroy,
/// garbage-collection hygiene and hot reload.
pub struct LogicSystem {
    config: LogicConfig,
    host: ManagedRuntimeHost,
    registry: ScriptInstanceRegistry,
    assets: AssetManager,
    commands: Vec<ScriptCommand>,
    doomed: Vec<Entity>,
    reload_flag: ReloadFlag,
    watcher: Option<AssemblyWatcher>,
    gc_timer: f32,
    dt: f32,
    running: bool,
}

impl LogicSystem {
    pub fn new(config: LogicConfig, catalog: NativeScriptCatalog) -> Self {
        let host = ManagedRuntimeHost::new(config.runtime.clone(), config.handles);
        Self {
            config,
            host,
            registry: ScriptInstanceRegistry::new(catalog),
            assets: AssetManager::new(),
            commands: Vec::new(),
            doomed: Vec::new(),
            reload_flag: ReloadFlag::new(),
            watcher: None,
            gc_timer: 0.0,
            dt: 0.0,
            running: false,
        }
    }

    pub fn config(&self) -> &LogicConfig {
        &self.config
    }

    pub fn host(&self) -> &ManagedRuntimeHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut ManagedRuntimeHost {
        &mut self.host
    }

    pub fn registry(&self) -> &ScriptInstanceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ScriptInstanceRegistry {
        &mut self.registry
    }

    /// Both halves at once, for callers that drive the registry against the host directly.
    pub fn parts_mut(&mut self) -> (&mut ScriptInstanceRegistry, &mut ManagedRuntimeHost) {
        (&mut self.registry, &mut self.host)
    }

    pub fn assets(&self) -> &AssetManager {
        &self.assets
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start_runtime(&mut self) -> bool {
        let ready = self.host.start();
        if !ready {
            warn!("[scripts] managed runtime unavailable; managed bindings stay inert");
        }
        ready
    }

    /// Materializes an instance for every binding in the world. Every binding is attempted; the first
    /// native configuration error is returned afterwards.
    pub fn load_scripts(&mut self, ecs: &mut EcsWorld) -> Result<usize, LogicError> {
        let mut loaded = 0;
        let mut first_error = None;
        for entity in ecs.script_entities() {
            match self.load_binding(ecs, entity) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        info!(
            "[scripts] loaded {loaded} script instance(s) ({} native, {} managed)",
            self.registry.native_count(),
            self.registry.managed_count()
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(loaded),
        }
    }

    /// Creates the instance backing `entity`'s binding. `Ok(false)` covers soft failures.
    pub fn load_binding(&mut self, ecs: &mut EcsWorld, entity: Entity) -> Result<bool, LogicError> {
        let Some(binding) = ecs.binding(entity) else {
            return Ok(false);
        };
        if binding.is_native() {
            let type_name = binding.type_name.clone();
            let active = binding.active;
            self.registry.load_native_type(&type_name, &mut self.assets)?;
            self.registry.instantiate_native(&type_name, entity)?;
            self.registry.set_active(entity, active);
            let instance_id = self
                .registry
                .natives_mut()
                .find(|instance| instance.entity == entity)
                .map(|instance| instance.instance_id)
                .unwrap_or_default();
            if let Some(mut binding) = ecs.binding_mut(entity) {
                binding.handle = None;
                binding.instance_id = instance_id;
            }
            Ok(true)
        } else if binding.is_managed() {
            Ok(self.registry.instantiate_managed(&mut self.host, ecs, entity).is_some())
        } else {
            debug!("[scripts] entity {entity} binds {} without an execution model; skipping", binding.type_name);
            Ok(false)
        }
    }

    fn for_each_native(
        &mut self,
        stage: &str,
        filter: impl Fn(&NativeInstance) -> bool,
        mut call: impl FnMut(&mut dyn NativeScript, &mut ScriptContext<'_>) -> Result<()>,
    ) {
        let dt = self.dt;
        for instance in self.registry.natives_mut() {
            if instance.pending || !filter(&*instance) {
                continue;
            }
            let mut ctx = ScriptContext::new(instance.entity, dt, &mut self.commands);
            if let Err(err) = call(instance.script.as_mut(), &mut ctx) {
                error!("[scripts] {}.{stage} failed on entity {}: {err:#}", instance.type_name, instance.entity);
            }
        }
    }

    fn dispatch_managed(&mut self, event: ManagedEvent) -> usize {
        if self.registry.managed_count() == 0 {
            return 0;
        }
        self.host.dispatch_event(event)
    }

    fn managed_targets(&self, stage: LifecycleStage, only: Option<Entity>) -> Vec<ManagedHandle> {
        self.registry
            .managed_instances()
            .filter(|instance| instance.active && !instance.pending)
            .filter(|instance| only.map(|entity| entity == instance.entity).unwrap_or(true))
            .filter(|instance| {
                self.registry.overrides_for(&instance.type_name).map(|flags| flags.overrides(stage)).unwrap_or(false)
            })
            .map(|instance| instance.handle)
            .collect()
    }

    fn run_stage(&mut self, stage: LifecycleStage, only: Option<Entity>) {
        self.host.set_delta_time(self.dt);
        let method = stage.method_name();
        self.for_each_native(
            method,
            |instance| instance.active && only.map(|entity| entity == instance.entity).unwrap_or(true),
            |script, ctx| match stage {
                LifecycleStage::Setup => script.setup(ctx),
                LifecycleStage::Init => script.init(ctx),
                LifecycleStage::Update => script.update(ctx),
                LifecycleStage::FixedUpdate => script.fixed_update(ctx),
                LifecycleStage::End => script.end(ctx),
            },
        );
        for handle in self.managed_targets(stage, only) {
            self.host.invoke_method(handle, method, &[]);
        }
    }

    pub fn setup(&mut self, ecs: &mut EcsWorld) {
        self.run_stage(LifecycleStage::Setup, None);
        self.apply_commands(ecs);
    }

    pub fn init(&mut self, ecs: &mut EcsWorld) {
        self.run_stage(LifecycleStage::Init, None);
        self.apply_commands(ecs);
    }

    /// Setup then Init for every instance; from here on new bindings are set up as they appear.
    pub fn start(&mut self, ecs: &mut EcsWorld) {
        self.setup(ecs);
        self.init(ecs);
        self.running = true;
    }

    pub fn update(&mut self, ecs: &mut EcsWorld, dt: f32) {
        self.dt = dt;
        self.run_stage(LifecycleStage::Update, None);
        self.apply_commands(ecs);
    }

    pub fn fixed_update(&mut self, ecs: &mut EcsWorld, dt: f32) {
        self.dt = dt;
        self.run_stage(LifecycleStage::FixedUpdate, None);
        self.apply_commands(ecs);
    }

    pub fn end(&mut self, ecs: &mut EcsWorld) {
        self.run_stage(LifecycleStage::End, None);
        self.apply_commands(ecs);
        self.running = false;
    }

    fn contact(&mut self, contact: ContactEvent, trigger: bool) {
        let label = if trigger { "on_trigger" } else { "on_collision" };
        self.for_each_native(
            label,
            |instance| instance.active && contact.involves(instance.entity),
            |script, ctx| {
                let Some(other) = contact.other(ctx.entity) else {
                    return Ok(());
                };
                match (trigger, contact.phase) {
                    (false, ContactPhase::Enter) => script.on_collision_enter(ctx, other),
                    (false, ContactPhase::Stay) => script.on_collision_stay(ctx, other),
                    (false, ContactPhase::Exit) => script.on_collision_exit(ctx, other),
                    (true, ContactPhase::Enter) => script.on_trigger_enter(ctx, other),
                    (true, ContactPhase::Stay) => script.on_trigger_stay(ctx, other),
                    (true, ContactPhase::Exit) => script.on_trigger_exit(ctx, other),
                }
            },
        );
        let (a, b) = (contact.a.to_bits(), contact.b.to_bits());
        let event = if trigger {
            ManagedEvent::Trigger { phase: contact.phase, a, b, time: contact.time }
        } else {
            ManagedEvent::Collision { phase: contact.phase, a, b, time: contact.time }
        };
        self.dispatch_managed(event);
    }

    pub fn on_collision(&mut self, ecs: &mut EcsWorld, contact: ContactEvent) {
        self.contact(contact, false);
        self.apply_commands(ecs);
    }

    pub fn on_trigger(&mut self, ecs: &mut EcsWorld, contact: ContactEvent) {
        self.contact(contact, true);
        self.apply_commands(ecs);
    }

    pub fn on_entity_runtime_changed(&mut self, ecs: &mut EcsWorld, entity: Entity) {
        self.for_each_native(
            "on_entity_runtime_changed",
            |instance| instance.active,
            |script, ctx| script.on_entity_runtime_changed(ctx, entity),
        );
        self.dispatch_managed(ManagedEvent::EntityRuntimeChanged { entity: entity.to_bits() });
        self.apply_commands(ecs);
    }

    /// Notifies every instance that `entity` exists. A binding without an instance is materialized
    /// first and, once the session is running, set up on the spot.
    pub fn on_entity_created(&mut self, ecs: &mut EcsWorld, entity: Entity) {
        if ecs.binding(entity).is_some() && self.registry.instance_count(entity) == 0 {
            match self.load_binding(ecs, entity) {
                Ok(true) => self.setup_instance(entity),
                Ok(false) => {}
                Err(err) => error!("[scripts] entity {entity} created with an unusable binding: {err}"),
            }
        }
        self.for_each_native(
            "on_entity_created",
            |instance| instance.active,
            |script, ctx| script.on_entity_created(ctx, entity),
        );
        self.dispatch_managed(ManagedEvent::EntityCreated { entity: entity.to_bits() });
        self.apply_commands(ecs);
    }

    /// Runs Setup and Init for the instance backing `entity` when the session is already running.
    pub fn setup_instance(&mut self, entity: Entity) {
        if !self.running {
            return;
        }
        self.run_stage(LifecycleStage::Setup, Some(entity));
        self.run_stage(LifecycleStage::Init, Some(entity));
    }

    /// Phase one of destruction for `entity` and its descendants: instances receive their destroy
    /// callback and are marked pending. [`Self::flush_destroyed`] finishes the job.
    pub fn destroy_entity(&mut self, ecs: &mut EcsWorld, entity: Entity) {
        self.mark_destroyed(ecs, entity);
        self.apply_commands(ecs);
    }

    fn mark_destroyed(&mut self, ecs: &EcsWorld, entity: Entity) {
        if !ecs.is_alive(entity) || self.doomed.contains(&entity) {
            return;
        }
        for target in ecs.subtree(entity) {
            if self.doomed.contains(&target) {
                continue;
            }
            self.doomed.push(target);
            if self.registry.is_pending(target) {
                continue;
            }
            self.for_each_native("on_destroy", |instance| instance.entity == target, |script, ctx| script.on_destroy(ctx));
            if let Some(handle) = self.registry.managed_handle(target) {
                self.dispatch_managed(ManagedEvent::Destroy { entity: target.to_bits() });
                self.host.set_instance_enabled(handle, false);
            }
            self.registry.destroy(target);
        }
    }

    /// Phase two: pending instances leave the registry and their entities are despawned.
    pub fn flush_destroyed(&mut self, ecs: &mut EcsWorld) -> Vec<Entity> {
        self.enroll_late_descendants(ecs);
        self.registry.flush_pending(&mut self.host);
        let mut despawned = Vec::new();
        for entity in std::mem::take(&mut self.doomed) {
            if ecs.is_alive(entity) {
                despawned.extend(ecs.despawn_recursive(entity));
            }
        }
        if !despawned.is_empty() {
            debug!("[scripts] despawned {} entit(ies)", despawned.len());
        }
        despawned
    }

    /// Entities parented under a doomed root after it was marked go through phase one as well, so
    /// nothing despawned with the subtree keeps an instance behind.
    fn enroll_late_descendants(&mut self, ecs: &mut EcsWorld) {
        loop {
            let late: Vec<Entity> = self
                .doomed
                .iter()
                .flat_map(|&root| ecs.subtree(root))
                .filter(|entity| !self.doomed.contains(entity))
                .collect();
            if late.is_empty() {
                return;
            }
            debug!("[scripts] {} entit(ies) joined a doomed subtree after it was marked", late.len());
            for entity in late {
                self.mark_destroyed(ecs, entity);
            }
            self.apply_commands(ecs);
        }
    }

    pub fn set_active(&mut self, ecs: &mut EcsWorld, entity: Entity, active: bool) {
        self.apply_active(ecs, entity, active);
        self.apply_commands(ecs);
    }

    /// Flips the entity's own flag and notifies every entity of the subtree whose effective state
    /// actually changed. Redundant sets notify nobody.
    fn apply_active(&mut self, ecs: &mut EcsWorld, entity: Entity, active: bool) {
        if !ecs.is_alive(entity) || ecs.active_self(entity) == active {
            return;
        }
        let before: Vec<(Entity, bool)> =
            ecs.subtree(entity).into_iter().map(|target| (target, ecs.effective_active(target))).collect();
        ecs.set_active_self(entity, active);
        for (target, was_active) in before {
            let now_active = ecs.effective_active(target);
            if now_active == was_active {
                continue;
            }
            if let Some(mut binding) = ecs.binding_mut(target) {
                binding.active = now_active;
            }
            self.registry.set_active(target, now_active);
            if now_active {
                self.for_each_native("on_enable", |instance| instance.entity == target, |script, ctx| script.on_enable(ctx));
            } else {
                self.for_each_native("on_disable", |instance| instance.entity == target, |script, ctx| {
                    script.on_disable(ctx)
                });
            }
            let pending = self.registry.is_pending(target);
            if self.registry.managed_handle(target).is_some() && !pending {
                let id = target.to_bits();
                let event = if now_active { ManagedEvent::Enable { entity: id } } else { ManagedEvent::Disable { entity: id } };
                self.dispatch_managed(event);
            }
        }
    }

    pub fn on_app_quit(&mut self, ecs: &mut EcsWorld) {
        self.for_each_native("on_application_quit", |_| true, |script, ctx| script.on_application_quit(ctx));
        self.dispatch_managed(ManagedEvent::ApplicationQuit);
        self.apply_commands(ecs);
    }

    /// Routes one ECS event to the matching handler.
    pub fn handle_event(&mut self, ecs: &mut EcsWorld, event: &LogicEvent) {
        match *event {
            LogicEvent::Collision(contact) => self.on_collision(ecs, contact),
            LogicEvent::Trigger(contact) => self.on_trigger(ecs, contact),
            LogicEvent::EntityCreated { entity } => self.on_entity_created(ecs, entity),
            LogicEvent::EntityDestroyed { entity } => self.destroy_entity(ecs, entity),
            LogicEvent::EntityRuntimeChanged { entity } => self.on_entity_runtime_changed(ecs, entity),
            LogicEvent::ActiveChanged { entity, active } => self.set_active(ecs, entity, active),
            LogicEvent::AppQuit => self.on_app_quit(ecs),
        }
    }

    /// Drains the world's event bus and routes every event. Returns how many were handled.
    pub fn handle_events(&mut self, ecs: &mut EcsWorld) -> usize {
        let events = ecs.drain_events();
        for event in &events {
            debug!("[scripts] event {event}");
            self.handle_event(ecs, event);
        }
        events.len()
    }

    /// Applies commands queued by native and managed scripts, including those issued while applying.
    fn apply_commands(&mut self, ecs: &mut EcsWorld) {
        for _ in 0..MAX_COMMAND_ROUNDS {
            let mut batch = std::mem::take(&mut self.commands);
            batch.extend(self.host.drain_commands());
            if batch.is_empty() {
                return;
            }
            for command in batch {
                let Some(target) = command.target() else {
                    warn!("[scripts] dropping {command:?}: not a valid entity id");
                    continue;
                };
                match command {
                    ScriptCommand::DestroyEntity { .. } => self.mark_destroyed(ecs, target),
                    ScriptCommand::SetActive { active, .. } => self.apply_active(ecs, target, active),
                }
            }
        }
        let dropped = self.commands.len() + self.host.drain_commands().len();
        self.commands.clear();
        warn!("[scripts] script commands still queued after {MAX_COMMAND_ROUNDS} rounds; dropped {dropped}");
    }

    /// Safe point between frames: pending hot reload, deferred destroy, periodic handle hygiene.
    pub fn end_frame(&mut self, ecs: &mut EcsWorld, dt: f32) {
        self.poll_hot_reload(ecs);
        self.flush_destroyed(ecs);
        self.gc_timer += dt;
        if self.gc_timer >= self.config.gc.interval_secs {
            self.gc_timer = 0.0;
            let collected = self.host.collect_garbage();
            let swept = self.host.sweep_stale_handles();
            if collected > 0 || swept > 0 {
                debug!("[scripts] gc hygiene collected {collected} object(s), swept {swept} handle(s)");
            }
        }
    }

    pub fn reload_flag(&self) -> ReloadFlag {
        self.reload_flag.clone()
    }

    pub fn request_hot_reload(&self) {
        self.reload_flag.request();
    }

    pub fn poll_hot_reload(&mut self, ecs: &mut EcsWorld) -> bool {
        if !self.reload_flag.take() {
            return false;
        }
        self.hot_reload(ecs)
    }

    /// Reloads the assembly and re-creates the managed instance of every MANAGED binding from its
    /// variables. On failure no managed instance exists until a later reload succeeds.
    pub fn hot_reload(&mut self, ecs: &mut EcsWorld) -> bool {
        self.flush_destroyed(ecs);
        let previous = self.registry.clear_managed();
        let managed: Vec<Entity> = ecs
            .script_entities()
            .into_iter()
            .filter(|entity| ecs.binding(*entity).map(|binding| binding.is_managed()).unwrap_or(false))
            .collect();
        for &entity in &managed {
            if let Some(mut binding) = ecs.binding_mut(entity) {
                binding.handle = None;
            }
        }
        if !self.host.reload() {
            error!(
                "[scripts] hot reload failed; {previous} managed instance(s) stay inert until the next successful reload"
            );
            return false;
        }
        let mut restored = 0;
        for entity in managed {
            if self.registry.instantiate_managed(&mut self.host, ecs, entity).is_some() {
                restored += 1;
            }
        }
        info!("[scripts] hot reload restored {restored} managed instance(s) (previously {previous})");
        true
    }

    /// Starts polling the assembly directory when hot reload is enabled.
    pub fn watch_assembly(&mut self) -> Result<bool> {
        if !self.config.hot_reload.enabled {
            return Ok(false);
        }
        let watcher = AssemblyWatcher::new(
            &self.config.runtime.assembly_path,
            self.config.hot_reload.poll_interval_secs,
            self.reload_flag.clone(),
        )?;
        self.watcher = Some(watcher);
        Ok(true)
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::ScriptBinding;
    use std::any::Any;

    #[derive(Default)]
    struct Counter {
        updates: u32,
        enables: u32,
        disables: u32,
    }

    impl NativeScript for Counter {
        fn update(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
            self.updates += 1;
            Ok(())
        }

        fn on_enable(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
            self.enables += 1;
            Ok(())
        }

        fn on_disable(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<()> {
            self.disables += 1;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn system() -> LogicSystem {
        let catalog = NativeScriptCatalog::new().with("Game.Counter", || Box::<Counter>::default());
        LogicSystem::new(LogicConfig::with_assembly("does/not/exist"), catalog)
    }

    #[test]
    fn disabled_natives_skip_update() {
        let mut logic = system();
        let mut ecs = EcsWorld::new();
        let entity = ecs.spawn_entity("counter");
        ecs.attach_script(entity, ScriptBinding::native("Game.Counter"));
        assert_eq!(logic.load_scripts(&mut ecs), Ok(1));
        logic.update(&mut ecs, 0.016);
        logic.set_active(&mut ecs, entity, false);
        logic.update(&mut ecs, 0.016);
        let counter = logic.registry().native_as::<Counter>(entity).expect("counter instance");
        assert_eq!(counter.updates, 1);
        assert_eq!(counter.disables, 1);
        assert_eq!(ecs.binding(entity).map(|binding| binding.active), Some(false));
    }

    #[test]
    fn redundant_active_sets_do_not_notify() {
        let mut logic = system();
        let mut ecs = EcsWorld::new();
        let parent = ecs.spawn_entity("parent");
        let child = ecs.spawn_child(parent, "child");
        ecs.attach_script(child, ScriptBinding::native("Game.Counter"));
        logic.load_scripts(&mut ecs).expect("native load");
        logic.set_active(&mut ecs, child, true);
        logic.set_active(&mut ecs, parent, false);
        logic.set_active(&mut ecs, parent, false);
        logic.set_active(&mut ecs, parent, true);
        let counter = logic.registry().native_as::<Counter>(child).expect("counter instance");
        assert_eq!((counter.enables, counter.disables), (1, 1));
    }

    #[test]
    fn destroy_is_deferred_until_the_frame_ends() {
        let mut logic = system();
        let mut ecs = EcsWorld::new();
        let root = ecs.spawn_entity("root");
        let child = ecs.spawn_child(root, "child");
        ecs.attach_script(child, ScriptBinding::native("Game.Counter"));
        logic.load_scripts(&mut ecs).expect("native load");
        logic.destroy_entity(&mut ecs, root);
        assert!(ecs.is_alive(child));
        assert!(logic.registry().is_pending(child));
        logic.end_frame(&mut ecs, 0.016);
        assert!(!ecs.is_alive(root));
        assert!(!ecs.is_alive(child));
        assert_eq!(logic.registry().instance_count(child), 0);
    }
}
