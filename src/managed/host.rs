use super::assembly::{Assembly, ClassInfo, ENTITY_CLASS};
use super::bridge::{register_entry_points, BridgeState, RosterEntry, ScriptList, SharedBridge};
use super::error::ScriptError;
use super::handles::{HandlePools, PoolKind, Pressure};
use super::heap::{ObjectHeap, ObjectId};
use super::invoke;
use super::marshal::{items_from_managed, items_to_managed, Marshal};
use super::types::{ElementKind, FieldType, LifecycleOverrides, ManagedEvent, ManagedHandle, ScriptArg};
use crate::commands::ScriptCommand;
use crate::config::{HandlePoolConfig, RuntimeConfig};
use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use rhai::module_resolvers::FileModuleResolver;
use rhai::{Array, Dynamic, Engine, Map, FLOAT, INT};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Upper bound on collection passes while tearing a domain down.
pub const MAX_COLLECTION_PASSES: usize = 8;

const FINALIZER: &str = "Finalize";
const CONSTRUCTOR: &str = "Constructor";

/// The VM itself. Created once per host and kept across reloads.
struct RootDomain {
    engine: Engine,
    bridge: SharedBridge,
}

impl RootDomain {
    fn create(config: &RuntimeConfig) -> Result<Self> {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        if let Some(library) = &config.library_path {
            if !library.is_dir() {
                bail!("library search path {} does not exist", library.display());
            }
            engine.set_module_resolver(FileModuleResolver::new_with_path(library));
        }
        engine.on_print(|text| info!("[script] {text}"));
        engine.on_debug(|text, source, pos| debug!("[script] {} {pos}: {text}", source.unwrap_or("<eval>")));
        let bridge: SharedBridge = Rc::new(RefCell::new(BridgeState::default()));
        register_entry_points(&mut engine, &bridge);
        Ok(Self { engine, bridge })
    }

    fn roster_objects(&self) -> HashSet<ObjectId> {
        self.bridge.borrow().roster.iter().map(|entry| entry.object).collect()
    }
}

/// One loaded assembly and the objects created from it. Dropped on unload.
struct ScriptDomain {
    assembly: Assembly,
    heap: ObjectHeap,
    pending_finalizers: Vec<ObjectId>,
}

impl ScriptDomain {
    /// Frees unreachable objects, queueing and then running finalizers for those that declare one.
    /// A finalized object is freed by the next collection that still finds it unreachable.
    fn collect(&mut self, engine: &Engine, roots: &HashSet<ObjectId>) -> usize {
        let mut reclaimed = 0;
        for id in self.heap.ids() {
            if roots.contains(&id) || self.pending_finalizers.contains(&id) {
                continue;
            }
            let needs_finalizer =
                self.heap.get(id).map(|object| !object.finalized && object.class.has_method(FINALIZER, 0)).unwrap_or(false);
            if needs_finalizer {
                self.pending_finalizers.push(id);
            } else if self.heap.free(id).is_some() {
                reclaimed += 1;
            }
        }
        self.run_finalizers(engine);
        reclaimed
    }

    fn run_finalizers(&mut self, engine: &Engine) {
        for id in std::mem::take(&mut self.pending_finalizers) {
            let Some(object) = self.heap.get_mut(id) else {
                continue;
            };
            object.finalized = true;
            let class = Rc::clone(&object.class);
            if let Err(err) = invoke::call_method(engine, &class, &mut object.state, FINALIZER, Vec::new()) {
                warn!("[managed] finalizer of {} ({id}) failed: {err}", class.qualified_name());
            }
        }
    }

    fn heap_lines(&self, handles: &HandlePools) -> Vec<String> {
        self.heap
            .ids()
            .into_iter()
            .filter_map(|id| {
                let object = self.heap.get(id)?;
                let handle = match handles.handle_for(id) {
                    Some((handle, PoolKind::Transient)) => format!("{handle} transient"),
                    Some((handle, PoolKind::Lifetime)) => format!("{handle} lifetime"),
                    None => "untracked".to_string(),
                };
                Some(format!("{id} {} [{handle}]", object.class.qualified_name()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub ready: bool,
    pub classes: usize,
    pub live_objects: usize,
    pub transient_handles: usize,
    pub lifetime_handles: usize,
    pub bound_objects: usize,
    /// Native-to-runtime entries: one per method call, constructor, static call or dispatched event.
    /// The dispatcher's fan-out to individual handlers happens inside the runtime and is not counted
    /// here.
    pub boundary_calls: u64,
    /// Event handlers actually run by the dispatcher's fan-out.
    pub handler_calls: u64,
    pub degraded: bool,
}

/// Owns the script VM, the currently loaded assembly and every handle into its heap.
pub struct ManagedRuntimeHost {
    config: RuntimeConfig,
    root: Option<RootDomain>,
    domain: Option<ScriptDomain>,
    handles: HandlePools,
    boundary_calls: u64,
    handler_calls: u64,
    high_water_warned: bool,
    degraded: bool,
}

impl ManagedRuntimeHost {
    pub fn new(config: RuntimeConfig, limits: HandlePoolConfig) -> Self {
        Self {
            config,
            root: None,
            domain: None,
            handles: HandlePools::new(limits),
            boundary_calls: 0,
            handler_calls: 0,
            high_water_warned: false,
            degraded: false,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_assembly_path(&mut self, path: impl Into<std::path::PathBuf>) {
        self.config.assembly_path = path.into();
    }

    pub fn is_ready(&self) -> bool {
        self.domain.is_some()
    }

    /// Brings the runtime up: the VM on first use, then a fresh domain with the configured assembly.
    /// On failure the host stays not ready with no classes.
    pub fn start(&mut self) -> bool {
        if self.domain.is_some() {
            return true;
        }
        if self.root.is_none() {
            match RootDomain::create(&self.config) {
                Ok(root) => self.root = Some(root),
                Err(err) => {
                    error!("[managed] critical: failed to create the script runtime: {err:#}");
                    return false;
                }
            }
        }
        let Some(root) = self.root.as_ref() else {
            return false;
        };
        match Assembly::load(&root.engine, &self.config.assembly_path) {
            Ok(assembly) => {
                info!(
                    "[managed] loaded assembly {} ({} classes)",
                    self.config.assembly_path.display(),
                    assembly.len()
                );
                if self.config.verbose {
                    for class in assembly.classes() {
                        info!("[managed] type {}", class.describe());
                    }
                }
                self.domain = Some(ScriptDomain { assembly, heap: ObjectHeap::default(), pending_finalizers: Vec::new() });
                true
            }
            Err(err) => {
                error!("[managed] failed to load assembly {}: {err:#}", self.config.assembly_path.display());
                false
            }
        }
    }

    /// Tears the domain down: roster cleared, every handle released, objects collected in a bounded
    /// number of passes. Safe to call when nothing is loaded.
    pub fn unload(&mut self) {
        let domain = self.domain.take();
        if let (true, Some(domain)) = (self.config.verbose, domain.as_ref()) {
            for line in domain.heap_lines(&self.handles) {
                info!("[managed] heap {line}");
            }
        }
        let released = self.handles.clear();
        self.high_water_warned = false;
        self.degraded = false;
        let Some(mut domain) = domain else {
            return;
        };
        let mut passes = 0;
        if let Some(root) = self.root.as_ref() {
            {
                let mut bridge = root.bridge.borrow_mut();
                bridge.roster.clear();
                bridge.commands.clear();
            }
            while passes < MAX_COLLECTION_PASSES && !domain.heap.is_empty() {
                let roots = root.roster_objects();
                domain.collect(&root.engine, &roots);
                passes += 1;
            }
            root.bridge.borrow_mut().roster.clear();
        }
        if !domain.heap.is_empty() {
            warn!(
                "[managed] {} object(s) still reachable after {passes} collection pass(es); dropping them",
                domain.heap.len()
            );
        }
        info!("[managed] unloaded assembly {} ({released} handle(s) released)", domain.assembly.root().display());
    }

    pub fn reload(&mut self) -> bool {
        self.unload();
        self.start()
    }

    pub fn get_class(&self, namespace: &str, name: &str) -> Option<Rc<ClassInfo>> {
        let qualified = if namespace.is_empty() { name.to_string() } else { format!("{namespace}.{name}") };
        self.class_by_name(&qualified)
    }

    pub fn class_by_name(&self, qualified: &str) -> Option<Rc<ClassInfo>> {
        let domain = self.domain.as_ref()?;
        match domain.assembly.class(qualified) {
            Some(class) => Some(Rc::clone(class)),
            None => {
                debug!("[managed] class {qualified} not found in the loaded assembly");
                None
            }
        }
    }

    pub fn class_of(&self, handle: ManagedHandle) -> Option<Rc<ClassInfo>> {
        self.object(handle).ok().map(|(_, class)| class)
    }

    pub fn is_alive(&self, handle: ManagedHandle) -> bool {
        self.object(handle).is_ok()
    }

    pub fn pool_of(&self, handle: ManagedHandle) -> Option<PoolKind> {
        self.handles.pool_of(handle)
    }

    pub fn instantiate(&mut self, namespace: &str, name: &str) -> Option<ManagedHandle> {
        self.instantiate_logged(namespace, name, PoolKind::Transient)
    }

    pub fn instantiate_lifetime(&mut self, namespace: &str, name: &str) -> Option<ManagedHandle> {
        self.instantiate_logged(namespace, name, PoolKind::Lifetime)
    }

    fn instantiate_logged(&mut self, namespace: &str, name: &str, pool: PoolKind) -> Option<ManagedHandle> {
        match self.try_instantiate(namespace, name, pool) {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("[managed] failed to instantiate {namespace}.{name}: {err}");
                None
            }
        }
    }

    /// Allocates an object with default field values, registers it in `pool` and runs its
    /// constructor. A throwing constructor leaves no object and no handle behind.
    pub fn try_instantiate(&mut self, namespace: &str, name: &str, pool: PoolKind) -> Result<ManagedHandle, ScriptError> {
        let qualified = if namespace.is_empty() { name.to_string() } else { format!("{namespace}.{name}") };
        let root = self.root.as_ref().ok_or(ScriptError::NotReady)?;
        let domain = self.domain.as_mut().ok_or(ScriptError::NotReady)?;
        let class = domain.assembly.class(&qualified).cloned().ok_or_else(|| ScriptError::ClassNotFound(qualified.clone()))?;
        let object_id = domain.heap.alloc(Rc::clone(&class), class.new_state());
        let handle = self.handles.register(object_id, pool);
        if class.has_method(CONSTRUCTOR, 0) {
            self.boundary_calls += 1;
            let result = match domain.heap.get_mut(object_id) {
                Some(object) => invoke::call_method(&root.engine, &class, &mut object.state, CONSTRUCTOR, Vec::new()),
                None => Err(ScriptError::InvalidHandle(handle)),
            };
            if let Err(err) = result {
                self.handles.release(handle);
                domain.heap.free(object_id);
                return Err(err);
            }
        }
        self.check_handle_pressure(object_id);
        Ok(handle)
    }

    /// Drops the handle. The object itself goes at the next collection if nothing else holds it.
    pub fn release(&mut self, handle: ManagedHandle) -> bool {
        self.handles.release(handle).is_some()
    }

    fn object(&self, handle: ManagedHandle) -> Result<(ObjectId, Rc<ClassInfo>), ScriptError> {
        let domain = self.domain.as_ref().ok_or(ScriptError::NotReady)?;
        let object_id = self.handles.resolve(handle).ok_or(ScriptError::InvalidHandle(handle))?;
        let object = domain.heap.get(object_id).ok_or(ScriptError::InvalidHandle(handle))?;
        Ok((object_id, Rc::clone(&object.class)))
    }

    fn run_method(&mut self, handle: ManagedHandle, method: &str, args: Vec<Dynamic>) -> Result<Dynamic, ScriptError> {
        let root = self.root.as_ref().ok_or(ScriptError::NotReady)?;
        let domain = self.domain.as_mut().ok_or(ScriptError::NotReady)?;
        let object_id = self.handles.resolve(handle).ok_or(ScriptError::InvalidHandle(handle))?;
        let object = domain.heap.get_mut(object_id).ok_or(ScriptError::InvalidHandle(handle))?;
        let class = Rc::clone(&object.class);
        invoke::call_method(&root.engine, &class, &mut object.state, method, args)
    }

    fn run_static(&mut self, class: &str, method: &str, args: Vec<Dynamic>) -> Result<Dynamic, ScriptError> {
        let root = self.root.as_ref().ok_or(ScriptError::NotReady)?;
        let domain = self.domain.as_ref().ok_or(ScriptError::NotReady)?;
        let info = domain.assembly.class(class).ok_or_else(|| ScriptError::ClassNotFound(class.to_string()))?;
        if !info.has_method(method, args.len()) {
            return Err(ScriptError::MethodNotFound {
                class: class.to_string(),
                method: method.to_string(),
                arity: args.len(),
            });
        }
        invoke::call_static(&root.engine, info.ast(), class, method, args)
    }

    pub fn try_invoke_method(
        &mut self,
        handle: ManagedHandle,
        method: &str,
        args: &[ScriptArg],
    ) -> Result<Dynamic, ScriptError> {
        let args = invoke::args_to_dynamic(args)?;
        self.boundary_calls += 1;
        self.run_method(handle, method, args)
    }

    /// Boundary form of [`Self::try_invoke_method`]: failures are logged and yield `None`.
    pub fn invoke_method(&mut self, handle: ManagedHandle, method: &str, args: &[ScriptArg]) -> Option<Dynamic> {
        match self.try_invoke_method(handle, method, args) {
            Ok(value) => Some(value),
            Err(err) => {
                error!("[managed] {err}");
                None
            }
        }
    }

    pub fn try_invoke_static(&mut self, class: &str, method: &str, args: &[ScriptArg]) -> Result<Dynamic, ScriptError> {
        let args = invoke::args_to_dynamic(args)?;
        self.boundary_calls += 1;
        self.run_static(class, method, args)
    }

    pub fn invoke_static(&mut self, class: &str, method: &str, args: &[ScriptArg]) -> Option<Dynamic> {
        match self.try_invoke_static(class, method, args) {
            Ok(value) => Some(value),
            Err(err) => {
                error!("[managed] {err}");
                None
            }
        }
    }

    pub(crate) fn wrap_entity(&mut self, id: u64) -> Result<Dynamic, ScriptError> {
        self.run_static(ENTITY_CLASS, "FromNative", vec![Dynamic::from_int(id as INT)])
    }

    pub(crate) fn unwrap_entity(&mut self, value: &Dynamic) -> Result<u64, ScriptError> {
        let raw = self.run_static(ENTITY_CLASS, "ToNative", vec![value.clone()])?;
        raw.as_int().map(|id| id as u64).map_err(|found| ScriptError::ValueMismatch {
            expected: ElementKind::Entity.name().to_string(),
            found: found.to_string(),
        })
    }

    pub fn field_type(&self, handle: ManagedHandle, field: &str) -> Option<FieldType> {
        let (_, class) = self.object(handle).ok()?;
        class.field(field).cloned()
    }

    fn declared_field(class: &ClassInfo, field: &str) -> Result<FieldType, ScriptError> {
        class.field(field).cloned().ok_or_else(|| ScriptError::FieldNotFound {
            class: class.qualified_name().to_string(),
            field: field.to_string(),
        })
    }

    fn require_scalar(class: &ClassInfo, field: &str, declared: &FieldType, requested: ElementKind) -> Result<(), ScriptError> {
        match declared {
            FieldType::Scalar(kind) if *kind == requested => Ok(()),
            other => Err(ScriptError::TypeMismatch {
                class: class.qualified_name().to_string(),
                member: field.to_string(),
                declared: other.to_string(),
                requested: requested.name().to_string(),
            }),
        }
    }

    fn read_field_value(&self, object_id: ObjectId, field: &str) -> Result<Dynamic, ScriptError> {
        let domain = self.domain.as_ref().ok_or(ScriptError::NotReady)?;
        let object = domain.heap.get(object_id).ok_or(ScriptError::NotReady)?;
        let class = object.class.qualified_name();
        let state = object.state.read_lock::<Map>().ok_or_else(|| ScriptError::ValueMismatch {
            expected: "object map".to_string(),
            found: object.state.type_name().to_string(),
        })?;
        state.get(field).cloned().ok_or_else(|| ScriptError::FieldNotFound { class: class.to_string(), field: field.to_string() })
    }

    fn write_field_value(&mut self, object_id: ObjectId, field: &str, value: Dynamic) -> Result<(), ScriptError> {
        let domain = self.domain.as_mut().ok_or(ScriptError::NotReady)?;
        let object = domain.heap.get_mut(object_id).ok_or(ScriptError::NotReady)?;
        let found = object.state.type_name().to_string();
        let mut state = object
            .state
            .write_lock::<Map>()
            .ok_or(ScriptError::ValueMismatch { expected: "object map".to_string(), found })?;
        state.insert(field.into(), value);
        Ok(())
    }

    pub fn get_field<T: Marshal>(&mut self, handle: ManagedHandle, field: &str) -> Result<T, ScriptError> {
        let (object_id, class) = self.object(handle)?;
        let declared = Self::declared_field(&class, field)?;
        Self::require_scalar(&class, field, &declared, T::KIND)?;
        let value = self.read_field_value(object_id, field)?;
        T::from_managed(&value, self)
    }

    pub fn set_field<T: Marshal>(&mut self, handle: ManagedHandle, field: &str, value: &T) -> Result<(), ScriptError> {
        let (object_id, class) = self.object(handle)?;
        let declared = Self::declared_field(&class, field)?;
        Self::require_scalar(&class, field, &declared, T::KIND)?;
        let managed = value.to_managed(self)?;
        self.write_field_value(object_id, field, managed)
    }

    pub fn get_property<T: Marshal>(&mut self, handle: ManagedHandle, property: &str) -> Result<T, ScriptError> {
        let (_, class) = self.object(handle)?;
        let getter = format!("get_{property}");
        if !class.has_method(&getter, 0) {
            return Err(ScriptError::PropertyNotFound {
                class: class.qualified_name().to_string(),
                property: property.to_string(),
            });
        }
        self.boundary_calls += 1;
        let value = self.run_method(handle, &getter, Vec::new())?;
        T::from_managed(&value, self)
    }

    pub fn set_property<T: Marshal>(&mut self, handle: ManagedHandle, property: &str, value: &T) -> Result<(), ScriptError> {
        let (_, class) = self.object(handle)?;
        let setter = format!("set_{property}");
        if !class.has_method(&setter, 1) {
            return Err(ScriptError::PropertyNotFound {
                class: class.qualified_name().to_string(),
                property: property.to_string(),
            });
        }
        let managed = value.to_managed(self)?;
        self.boundary_calls += 1;
        self.run_method(handle, &setter, vec![managed]).map(|_| ())
    }

    fn require_sequence_element(requested: ElementKind) -> Result<(), ScriptError> {
        if requested.is_sequence_element() {
            Ok(())
        } else {
            warn!("[managed] '{requested}' cannot be marshalled as a sequence element");
            Err(ScriptError::Unsupported(requested.name().to_string()))
        }
    }

    /// Converts `items` into a fixed script array.
    pub fn array_marshal<T: Marshal>(&mut self, items: &[T]) -> Result<Dynamic, ScriptError> {
        Self::require_sequence_element(T::KIND)?;
        let array = items_to_managed(items, self)?;
        Ok(Dynamic::from_array(array))
    }

    /// Converts `items` into a growable `List`.
    pub fn list_marshal<T: Marshal>(&mut self, items: &[T]) -> Result<Dynamic, ScriptError> {
        Self::require_sequence_element(T::KIND)?;
        let array = items_to_managed(items, self)?;
        Ok(Dynamic::from(ScriptList::from_items(T::KIND.name(), array)))
    }

    fn sequence_element(class: &ClassInfo, field: &str, declared: &FieldType, requested: ElementKind) -> Result<(), ScriptError> {
        let element = match declared {
            FieldType::Array(element) | FieldType::List(element) => element,
            other => {
                return Err(ScriptError::TypeMismatch {
                    class: class.qualified_name().to_string(),
                    member: field.to_string(),
                    declared: other.to_string(),
                    requested: format!("{requested}[]"),
                })
            }
        };
        match ElementKind::parse(element) {
            Some(kind) if kind.is_sequence_element() && kind == requested => Ok(()),
            Some(kind) if kind.is_sequence_element() => Err(ScriptError::TypeMismatch {
                class: class.qualified_name().to_string(),
                member: field.to_string(),
                declared: declared.to_string(),
                requested: format!("{requested}[]"),
            }),
            _ => {
                warn!("[managed] {}.{field}: element type '{element}' cannot be marshalled", class.qualified_name());
                Err(ScriptError::Unsupported(element.clone()))
            }
        }
    }

    /// Writes a sequence field, building an array or a `List` depending on how the class declares it.
    pub fn set_sequence_field<T: Marshal>(&mut self, handle: ManagedHandle, field: &str, items: &[T]) -> Result<(), ScriptError> {
        let (object_id, class) = self.object(handle)?;
        let declared = Self::declared_field(&class, field)?;
        Self::sequence_element(&class, field, &declared, T::KIND)?;
        let value = match declared {
            FieldType::List(_) => self.list_marshal(items)?,
            _ => self.array_marshal(items)?,
        };
        self.write_field_value(object_id, field, value)
    }

    pub fn get_sequence_field<T: Marshal>(&mut self, handle: ManagedHandle, field: &str) -> Result<Vec<T>, ScriptError> {
        let (object_id, class) = self.object(handle)?;
        let declared = Self::declared_field(&class, field)?;
        Self::sequence_element(&class, field, &declared, T::KIND)?;
        let value = self.read_field_value(object_id, field)?;
        let items: Array = if let Some(list) = value.read_lock::<ScriptList>() {
            list.items().to_vec()
        } else if let Some(array) = value.read_lock::<Array>() {
            array.clone()
        } else if value.is_unit() {
            Array::new()
        } else {
            return Err(ScriptError::ValueMismatch {
                expected: declared.to_string(),
                found: value.type_name().to_string(),
            });
        };
        items_from_managed(&items, self)
    }

    /// Hands one event to the dispatcher, which fans it out to every bound object that handles it.
    /// Returns the number of handlers that ran.
    pub fn dispatch_event(&mut self, event: ManagedEvent) -> usize {
        if self.domain.is_none() {
            return 0;
        }
        self.boundary_calls += 1;
        let roster = self.roster();
        let handler = event.handler_name();
        let mut delivered = 0;
        for entry in roster {
            let arg = match event {
                ManagedEvent::Collision { a, b, .. } | ManagedEvent::Trigger { a, b, .. } => {
                    if !entry.enabled {
                        continue;
                    }
                    let other = if entry.entity == a {
                        b
                    } else if entry.entity == b {
                        a
                    } else {
                        continue;
                    };
                    Some(other)
                }
                ManagedEvent::EntityCreated { entity } | ManagedEvent::EntityRuntimeChanged { entity } => {
                    if !entry.enabled {
                        continue;
                    }
                    Some(entity)
                }
                ManagedEvent::Destroy { entity } | ManagedEvent::Disable { entity } => {
                    if entry.entity != entity {
                        continue;
                    }
                    None
                }
                ManagedEvent::Enable { entity } => {
                    if entry.entity != entity {
                        continue;
                    }
                    self.set_roster_enabled(entry.object, true);
                    None
                }
                ManagedEvent::ApplicationQuit => None,
            };
            let mut args = match arg {
                Some(id) => match self.wrap_entity(id) {
                    Ok(wrapped) => vec![wrapped],
                    Err(err) => {
                        error!("[managed] dispatcher could not wrap entity {id}: {err}");
                        continue;
                    }
                },
                None => Vec::new(),
            };
            if let Some(time) = event.contact_time() {
                args.push(Dynamic::from_float(time as FLOAT));
            }
            if self.deliver(entry.object, handler, args) {
                delivered += 1;
            }
            if let ManagedEvent::Disable { .. } = event {
                self.set_roster_enabled(entry.object, false);
            }
        }
        delivered
    }

    fn deliver(&mut self, object_id: ObjectId, handler: &str, mut args: Vec<Dynamic>) -> bool {
        let (Some(root), Some(domain)) = (self.root.as_ref(), self.domain.as_mut()) else {
            return false;
        };
        let Some(object) = domain.heap.get_mut(object_id) else {
            return false;
        };
        // Contact handlers may leave out the trailing timestamp.
        if !object.class.has_method(handler, args.len()) {
            let timed = handler.starts_with("OnCollision") || handler.starts_with("OnTrigger");
            if !timed || args.len() < 2 || !object.class.has_method(handler, args.len() - 1) {
                return false;
            }
            args.pop();
        }
        let class = Rc::clone(&object.class);
        self.handler_calls += 1;
        if let Err(err) = invoke::call_method(&root.engine, &class, &mut object.state, handler, args) {
            error!("[managed] {err}");
        }
        true
    }

    fn set_roster_enabled(&self, object_id: ObjectId, enabled: bool) -> bool {
        let Some(root) = self.root.as_ref() else {
            return false;
        };
        let mut bridge = root.bridge.borrow_mut();
        match bridge.roster.iter_mut().find(|entry| entry.object == object_id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Sets whether the dispatcher delivers contact and broadcast events to this object.
    pub fn set_instance_enabled(&mut self, handle: ManagedHandle, enabled: bool) -> bool {
        match self.handles.resolve(handle) {
            Some(object_id) => self.set_roster_enabled(object_id, enabled),
            None => false,
        }
    }

    /// Snapshot of the objects currently bound to native owners.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.root.as_ref().map(|root| root.bridge.borrow().roster.clone()).unwrap_or_default()
    }

    pub fn roster_entry(&self, handle: ManagedHandle) -> Option<RosterEntry> {
        let object_id = self.handles.resolve(handle)?;
        self.roster().into_iter().find(|entry| entry.object == object_id)
    }

    /// Reclaims every object not held by a lifetime handle or bound to a native owner.
    pub fn collect_garbage(&mut self) -> usize {
        self.collect_with(None)
    }

    fn collect_with(&mut self, extra_root: Option<ObjectId>) -> usize {
        let (Some(root), Some(domain)) = (self.root.as_ref(), self.domain.as_mut()) else {
            return 0;
        };
        let mut roots = root.roster_objects();
        roots.extend(self.handles.lifetime_objects());
        roots.extend(extra_root);
        let reclaimed = domain.collect(&root.engine, &roots);
        if reclaimed > 0 {
            debug!("[managed] collected {reclaimed} object(s)");
        }
        reclaimed
    }

    /// Releases handles whose object no longer exists.
    pub fn sweep_stale_handles(&mut self) -> usize {
        let Some(domain) = self.domain.as_ref() else {
            return 0;
        };
        let heap = &domain.heap;
        let swept = self.handles.sweep(|object_id| heap.contains(object_id));
        if swept > 0 {
            debug!("[managed] swept {swept} stale handle(s)");
        }
        if self.handles.pressure() == Pressure::Normal {
            self.high_water_warned = false;
            self.degraded = false;
        }
        swept
    }

    fn check_handle_pressure(&mut self, fresh: ObjectId) {
        match self.handles.pressure() {
            Pressure::Normal => {
                self.high_water_warned = false;
                self.degraded = false;
            }
            Pressure::HighWater => {
                if !self.high_water_warned {
                    warn!(
                        "[managed] handle pools at {} of {} (high-water mark {})",
                        self.handles.len(),
                        self.handles.limits().hard_cap,
                        self.handles.limits().high_water_mark
                    );
                    self.high_water_warned = true;
                }
            }
            Pressure::AtCap => {
                let reclaimed = self.collect_with(Some(fresh));
                let swept = self.sweep_stale_handles();
                if self.handles.pressure() == Pressure::AtCap {
                    if !self.degraded {
                        error!(
                            "[managed] critical: handle pools still at hard cap {} after sweeping {swept} handle(s); runtime degraded",
                            self.handles.limits().hard_cap
                        );
                    }
                    self.degraded = true;
                } else {
                    warn!("[managed] hard cap reached; collected {reclaimed} object(s), swept {swept} handle(s)");
                }
            }
        }
    }

    /// Lifecycle stages the object's class declares outside the engine base classes.
    pub fn overrides(&self, handle: ManagedHandle) -> LifecycleOverrides {
        self.class_of(handle).map(|class| class.overrides()).unwrap_or(LifecycleOverrides::empty())
    }

    pub fn set_delta_time(&mut self, dt: f32) {
        if let Some(root) = self.root.as_ref() {
            root.bridge.borrow_mut().delta_time = FLOAT::from(dt);
        }
    }

    /// World mutations requested by script code since the last drain.
    pub fn drain_commands(&mut self) -> Vec<ScriptCommand> {
        match self.root.as_ref() {
            Some(root) => root.bridge.borrow_mut().commands.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            ready: self.is_ready(),
            classes: self.domain.as_ref().map(|domain| domain.assembly.len()).unwrap_or(0),
            live_objects: self.domain.as_ref().map(|domain| domain.heap.len()).unwrap_or(0),
            transient_handles: self.handles.transient_len(),
            lifetime_handles: self.handles.lifetime_len(),
            bound_objects: self.root.as_ref().map(|root| root.bridge.borrow().roster.len()).unwrap_or(0),
            boundary_calls: self.boundary_calls,
            handler_calls: self.handler_calls,
            degraded: self.degraded,
        }
    }

    pub fn dump_types(&self) -> Vec<String> {
        self.domain
            .as_ref()
            .map(|domain| domain.assembly.classes().map(|class| class.describe()).collect())
            .unwrap_or_default()
    }

    pub fn dump_heap(&self) -> Vec<String> {
        self.domain.as_ref().map(|domain| domain.heap_lines(&self.handles)).unwrap_or_default()
    }
}

impl Drop for ManagedRuntimeHost {
    fn drop(&mut self) {
        if self.domain.is_some() {
            self.unload();
        }
    }
}
