use super::marshaller::marshal_record;
use super::native::{NativeFactory, NativeScript, NativeScriptCatalog};
use super::variables::EntityRef;
use crate::assets::AssetManager;
use crate::commands::entity_from_bits;
use crate::ecs::EcsWorld;
use crate::managed::{LifecycleOverrides, ManagedHandle, ManagedRuntimeHost, NativePtr};
use bevy_ecs::prelude::Entity;
use log::{debug, error, warn};
use std::collections::HashMap;
use thiserror::Error;

const NATIVE_PTR_FIELD: &str = "NativePtr";
const ENTITY_ID_FIELD: &str = "EntityId";
const OWNER_PROPERTY: &str = "Owner";
const BIND_NATIVE: &str = "BindNative";
const UNBIND_NATIVE: &str = "UnbindNative";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogicError {
    #[error("native script type '{0}' is not part of the native script catalog")]
    UnknownNativeType(String),
    #[error("native script type '{0}' was never loaded")]
    NativeTypeNotRegistered(String),
}

pub struct NativeInstance {
    pub entity: Entity,
    pub type_name: String,
    pub script: Box<dyn NativeScript>,
    pub instance_id: u64,
    pub active: bool,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInstance {
    pub entity: Entity,
    pub handle: ManagedHandle,
    pub type_name: String,
    pub active: bool,
    pub pending: bool,
}

/// Entity to handle mapping for every loaded managed instance, kept in load order.
#[derive(Debug, Default)]
pub struct InstanceIndex {
    instances: Vec<ManagedInstance>,
    by_entity: HashMap<Entity, ManagedHandle>,
    by_handle: HashMap<ManagedHandle, Entity>,
}

impl InstanceIndex {
    /// Indexes `instance`. Returns the handle previously indexed for the same entity, if different.
    fn insert(&mut self, instance: ManagedInstance) -> Option<ManagedHandle> {
        let displaced = match self.by_entity.get(&instance.entity).copied() {
            Some(previous) if previous != instance.handle => {
                self.remove(previous);
                Some(previous)
            }
            Some(same) => {
                self.remove(same);
                None
            }
            None => None,
        };
        self.by_entity.insert(instance.entity, instance.handle);
        self.by_handle.insert(instance.handle, instance.entity);
        self.instances.push(instance);
        displaced
    }

    fn remove(&mut self, handle: ManagedHandle) -> Option<ManagedInstance> {
        let entity = self.by_handle.remove(&handle)?;
        if self.by_entity.get(&entity) == Some(&handle) {
            self.by_entity.remove(&entity);
        }
        let position = self.instances.iter().position(|instance| instance.handle == handle)?;
        Some(self.instances.remove(position))
    }

    fn get_mut(&mut self, entity: Entity) -> Option<&mut ManagedInstance> {
        let handle = *self.by_entity.get(&entity)?;
        self.instances.iter_mut().find(|instance| instance.handle == handle)
    }

    pub fn handle(&self, entity: Entity) -> Option<ManagedHandle> {
        self.by_entity.get(&entity).copied()
    }

    pub fn entity(&self, handle: ManagedHandle) -> Option<Entity> {
        self.by_handle.get(&handle).copied()
    }

    pub fn type_name(&self, handle: ManagedHandle) -> Option<&str> {
        self.instances.iter().find(|instance| instance.handle == handle).map(|instance| instance.type_name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedInstance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn clear(&mut self) {
        self.instances.clear();
        self.by_entity.clear();
        self.by_handle.clear();
    }
}

/// Lifecycle overrides probed once per script type name.
#[derive(Debug, Default, Clone)]
pub struct OverrideCache {
    entries: HashMap<String, LifecycleOverrides>,
}

impl OverrideCache {
    pub fn get(&self, type_name: &str) -> Option<LifecycleOverrides> {
        self.entries.get(type_name).copied()
    }

    fn get_or_probe(&mut self, type_name: &str, probe: impl FnOnce() -> LifecycleOverrides) -> LifecycleOverrides {
        if let Some(cached) = self.entries.get(type_name) {
            return *cached;
        }
        let overrides = probe();
        debug!("[scripts] {type_name} overrides {overrides:?}");
        self.entries.insert(type_name.to_string(), overrides);
        overrides
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Which script instance, native or managed, backs each entity. At most one per entity: loading a
/// second instance for an entity replaces the first.
pub struct ScriptInstanceRegistry {
    catalog: NativeScriptCatalog,
    factories: HashMap<String, NativeFactory>,
    natives: Vec<NativeInstance>,
    index: InstanceIndex,
    overrides: OverrideCache,
    /// Handles already detached from the index, waiting for the next flush.
    retired: Vec<ManagedHandle>,
    next_instance_id: u64,
}

impl ScriptInstanceRegistry {
    pub fn new(catalog: NativeScriptCatalog) -> Self {
        Self {
            catalog,
            factories: HashMap::new(),
            natives: Vec::new(),
            index: InstanceIndex::default(),
            overrides: OverrideCache::default(),
            retired: Vec::new(),
            next_instance_id: 1,
        }
    }

    pub fn catalog(&self) -> &NativeScriptCatalog {
        &self.catalog
    }

    fn allocate_instance_id(&mut self) -> u64 {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        id
    }

    /// Makes a catalogued native type instantiable and stores its prototype in `assets`.
    pub fn load_native_type(&mut self, name: &str, assets: &mut AssetManager) -> Result<(), LogicError> {
        if self.factories.contains_key(name) {
            return Ok(());
        }
        let Some(factory) = self.catalog.factory(name) else {
            error!("[scripts] native script type {name} is not in the catalog; was it registered at build time?");
            return Err(LogicError::UnknownNativeType(name.to_string()));
        };
        assets.insert_native_prototype(name, factory());
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn is_native_type_loaded(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Drops whatever currently backs `entity`. A managed handle is detached now and released at the
    /// next flush.
    fn retire(&mut self, entity: Entity) {
        self.natives.retain(|instance| instance.entity != entity);
        if let Some(handle) = self.index.handle(entity) {
            self.index.remove(handle);
            self.retired.push(handle);
        }
    }

    pub fn instantiate_native(&mut self, type_name: &str, entity: Entity) -> Result<&mut dyn NativeScript, LogicError> {
        let Some(factory) = self.factories.get(type_name).cloned() else {
            error!("[scripts] cannot instantiate native script {type_name} for entity {entity}: type was never loaded");
            return Err(LogicError::NativeTypeNotRegistered(type_name.to_string()));
        };
        self.retire(entity);
        let instance_id = self.allocate_instance_id();
        self.natives.push(NativeInstance {
            entity,
            type_name: type_name.to_string(),
            script: factory(),
            instance_id,
            active: true,
            pending: false,
        });
        match self.natives.last_mut() {
            Some(instance) => Ok(instance.script.as_mut()),
            None => Err(LogicError::NativeTypeNotRegistered(type_name.to_string())),
        }
    }

    /// Creates the managed object for the entity's MANAGED binding, binds it to its native owner and
    /// pushes the binding's variables into it. Schema drift (no binding, wrong model, unknown class)
    /// yields `None` with a warning.
    pub fn instantiate_managed(
        &mut self,
        host: &mut ManagedRuntimeHost,
        ecs: &mut EcsWorld,
        entity: Entity,
    ) -> Option<ManagedHandle> {
        let Some(binding) = ecs.binding(entity) else {
            warn!("[scripts] entity {entity} has no script binding; nothing to instantiate");
            return None;
        };
        if !binding.is_managed() {
            warn!(
                "[scripts] entity {entity} binds {} as {}, not managed",
                binding.type_name,
                binding.model().label()
            );
            return None;
        }
        if !host.is_ready() {
            warn!("[scripts] managed runtime not ready; {} on entity {entity} stays inert", binding.type_name);
            return None;
        }
        let type_name = binding.type_name.clone();
        let (namespace, name) = binding.namespace_and_name();
        let (namespace, name) = (namespace.to_string(), name.to_string());
        let variables = binding.variables.clone();
        let active = binding.active;
        if host.get_class(&namespace, &name).is_none() {
            warn!("[scripts] class {type_name} not found in the loaded assembly; entity {entity} stays inert");
            return None;
        }

        let handle = host.instantiate(&namespace, &name)?;
        let instance_id = self.allocate_instance_id();
        let bound = host
            .set_field(handle, NATIVE_PTR_FIELD, &NativePtr(instance_id))
            .and_then(|_| host.set_field(handle, ENTITY_ID_FIELD, &(entity.to_bits() as i64)))
            .and_then(|_| host.set_property(handle, OWNER_PROPERTY, &EntityRef::from_entity(entity)))
            .and_then(|_| host.try_invoke_method(handle, BIND_NATIVE, &[]).map(|_| ()));
        if let Err(err) = bound {
            error!("[scripts] failed to bind {type_name} to entity {entity}: {err}");
            if host.roster_entry(handle).is_some() {
                let _ = host.try_invoke_method(handle, UNBIND_NATIVE, &[]);
            }
            host.release(handle);
            return None;
        }
        if host.roster_entry(handle).is_none() {
            error!("[scripts] {type_name} instance {handle} did not register with the dispatcher");
            host.release(handle);
            return None;
        }
        host.set_instance_enabled(handle, active);
        marshal_record(host, handle, &variables);

        let loaded = self.runtime_load_at_run(host, handle);
        if loaded != Some(entity) {
            error!("[scripts] {type_name} instance {handle} did not report entity {entity} back");
            self.index.remove(handle);
            let _ = host.try_invoke_method(handle, UNBIND_NATIVE, &[]);
            host.release(handle);
            return None;
        }
        if let Some(mut binding) = ecs.binding_mut(entity) {
            binding.handle = Some(handle);
            binding.instance_id = instance_id;
        }
        Some(handle)
    }

    /// Indexes an already bound managed object by the entity it reports and caches its type's
    /// lifecycle overrides.
    pub fn runtime_load_at_run(&mut self, host: &mut ManagedRuntimeHost, handle: ManagedHandle) -> Option<Entity> {
        let class = host.class_of(handle)?;
        let bits = match host.get_field::<i64>(handle, ENTITY_ID_FIELD) {
            Ok(bits) => bits,
            Err(err) => {
                warn!("[scripts] {handle} has no readable owner id: {err}");
                return None;
            }
        };
        let entity = entity_from_bits(bits as u64)?;
        let active = host.roster_entry(handle).map(|entry| entry.enabled).unwrap_or(true);
        self.natives.retain(|instance| instance.entity != entity);
        let displaced = self.index.insert(ManagedInstance {
            entity,
            handle,
            type_name: class.qualified_name().to_string(),
            active,
            pending: false,
        });
        if let Some(previous) = displaced {
            debug!("[scripts] entity {entity} replaced managed instance {previous} with {handle}");
            if let Err(err) = host.try_invoke_method(previous, UNBIND_NATIVE, &[]) {
                debug!("[scripts] {previous} could not be unbound: {err}");
            }
            self.retired.push(previous);
        }
        self.overrides.get_or_probe(class.qualified_name(), || host.overrides(handle));
        Some(entity)
    }

    /// Marks the entity's instances for removal. They stop receiving callbacks immediately and leave
    /// the registry at the next [`Self::flush_pending`].
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let mut marked = false;
        for instance in self.natives.iter_mut().filter(|instance| instance.entity == entity) {
            marked |= !instance.pending;
            instance.pending = true;
        }
        if let Some(instance) = self.index.get_mut(entity) {
            marked |= !instance.pending;
            instance.pending = true;
        }
        marked
    }

    /// Erases pending instances from every index, unbinds their managed objects and releases their
    /// handles. Returns the entities whose instances were removed.
    pub fn flush_pending(&mut self, host: &mut ManagedRuntimeHost) -> Vec<Entity> {
        let mut flushed: Vec<Entity> = Vec::new();
        self.natives.retain(|instance| {
            if instance.pending {
                flushed.push(instance.entity);
                false
            } else {
                true
            }
        });
        let pending: Vec<ManagedHandle> =
            self.index.iter().filter(|instance| instance.pending).map(|instance| instance.handle).collect();
        for handle in pending {
            if let Some(instance) = self.index.remove(handle) {
                if !flushed.contains(&instance.entity) {
                    flushed.push(instance.entity);
                }
                self.retired.push(handle);
            }
        }
        for handle in std::mem::take(&mut self.retired) {
            if host.is_alive(handle) {
                if let Err(err) = host.try_invoke_method(handle, UNBIND_NATIVE, &[]) {
                    debug!("[scripts] {handle} could not be unbound: {err}");
                }
            }
            host.release(handle);
        }
        flushed
    }

    pub fn set_active(&mut self, entity: Entity, active: bool) {
        for instance in self.natives.iter_mut().filter(|instance| instance.entity == entity) {
            instance.active = active;
        }
        if let Some(instance) = self.index.get_mut(entity) {
            instance.active = active;
        }
    }

    /// Forgets every managed instance and cached override. Used when the assembly is about to unload.
    pub fn clear_managed(&mut self) -> usize {
        let cleared = self.index.len();
        self.index.clear();
        self.overrides.clear();
        self.retired.clear();
        cleared
    }

    pub fn native(&self, entity: Entity) -> Option<&dyn NativeScript> {
        self.natives.iter().find(|instance| instance.entity == entity).map(|instance| instance.script.as_ref())
    }

    pub fn native_mut(&mut self, entity: Entity) -> Option<&mut dyn NativeScript> {
        self.natives.iter_mut().find(|instance| instance.entity == entity).map(|instance| instance.script.as_mut())
    }

    pub fn native_as<T: NativeScript>(&self, entity: Entity) -> Option<&T> {
        self.native(entity)?.as_any().downcast_ref::<T>()
    }

    pub fn natives_mut(&mut self) -> impl Iterator<Item = &mut NativeInstance> {
        self.natives.iter_mut()
    }

    pub fn managed_instances(&self) -> impl Iterator<Item = &ManagedInstance> {
        self.index.iter()
    }

    pub fn index(&self) -> &InstanceIndex {
        &self.index
    }

    pub fn managed_handle(&self, entity: Entity) -> Option<ManagedHandle> {
        self.index.handle(entity)
    }

    pub fn entity_for(&self, handle: ManagedHandle) -> Option<Entity> {
        self.index.entity(handle)
    }

    pub fn type_name(&self, handle: ManagedHandle) -> Option<&str> {
        self.index.type_name(handle)
    }

    pub fn overrides_for(&self, type_name: &str) -> Option<LifecycleOverrides> {
        self.overrides.get(type_name)
    }

    /// Instances currently backing `entity`, pending ones included. Never more than one.
    pub fn instance_count(&self, entity: Entity) -> usize {
        let natives = self.natives.iter().filter(|instance| instance.entity == entity).count();
        natives + usize::from(self.index.handle(entity).is_some())
    }

    pub fn managed_count(&self) -> usize {
        self.index.len()
    }

    pub fn native_count(&self) -> usize {
        self.natives.len()
    }

    pub fn is_pending(&self, entity: Entity) -> bool {
        self.natives.iter().any(|instance| instance.entity == entity && instance.pending)
            || self.index.iter().any(|instance| instance.entity == entity && instance.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.retired.is_empty()
            || self.natives.iter().any(|instance| instance.pending)
            || self.index.iter().any(|instance| instance.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[derive(Default)]
    struct Blinker {
        blinks: u32,
    }

    impl NativeScript for Blinker {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn registry() -> ScriptInstanceRegistry {
        let catalog = NativeScriptCatalog::new().with("Game.Blinker", || Box::<Blinker>::default());
        ScriptInstanceRegistry::new(catalog)
    }

    #[test]
    fn unknown_native_type_is_a_configuration_error() {
        let mut registry = registry();
        let mut assets = AssetManager::new();
        assert_eq!(
            registry.load_native_type("Game.Missing", &mut assets).err(),
            Some(LogicError::UnknownNativeType("Game.Missing".into()))
        );
        let entity = Entity::from_raw(3);
        assert!(matches!(
            registry.instantiate_native("Game.Blinker", entity),
            Err(LogicError::NativeTypeNotRegistered(_))
        ));
    }

    #[test]
    fn loading_a_native_type_stores_one_prototype() {
        let mut registry = registry();
        let mut assets = AssetManager::new();
        registry.load_native_type("Game.Blinker", &mut assets).expect("catalogued type");
        registry.load_native_type("Game.Blinker", &mut assets).expect("second load is a no-op");
        assert_eq!(assets.native_ref_count("Game.Blinker"), 1);
        assert!(assets.native_prototype_as::<Blinker>("Game.Blinker").is_some());
    }

    #[test]
    fn reinstantiating_replaces_the_native_instance() {
        let mut registry = registry();
        let mut assets = AssetManager::new();
        registry.load_native_type("Game.Blinker", &mut assets).expect("catalogued type");
        let entity = Entity::from_raw(7);
        let script = registry.instantiate_native("Game.Blinker", entity).expect("instance");
        if let Some(blinker) = script.as_any_mut().downcast_mut::<Blinker>() {
            blinker.blinks = 5;
        }
        registry.instantiate_native("Game.Blinker", entity).expect("replacement");
        assert_eq!(registry.instance_count(entity), 1);
        assert_eq!(registry.native_as::<Blinker>(entity).map(|b| b.blinks), Some(0));
    }

    #[test]
    fn destroy_defers_removal_until_flush() {
        let mut registry = registry();
        let mut assets = AssetManager::new();
        let mut host = ManagedRuntimeHost::new(Default::default(), Default::default());
        registry.load_native_type("Game.Blinker", &mut assets).expect("catalogued type");
        let entity = Entity::from_raw(9);
        registry.instantiate_native("Game.Blinker", entity).expect("instance");
        assert!(registry.destroy(entity));
        assert!(!registry.destroy(entity));
        assert!(registry.is_pending(entity));
        assert_eq!(registry.native_count(), 1);
        assert_eq!(registry.flush_pending(&mut host), vec![entity]);
        assert_eq!(registry.native_count(), 0);
        assert!(!registry.is_pending(entity));
    }
}
