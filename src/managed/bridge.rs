use super::heap::ObjectId;
use crate::commands::ScriptCommand;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Position, FLOAT, INT};
use std::cell::RefCell;
use std::rc::Rc;

/// A managed object bound to a native owner, as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub object: ObjectId,
    pub entity: u64,
    pub enabled: bool,
}

/// Native state reachable from script code through the registered entry points.
#[derive(Debug, Default)]
pub(crate) struct BridgeState {
    pub roster: Vec<RosterEntry>,
    pub commands: Vec<ScriptCommand>,
    pub delta_time: FLOAT,
}

impl BridgeState {
    fn bind(&mut self, object: ObjectId, entity: u64) {
        match self.roster.iter_mut().find(|entry| entry.object == object) {
            Some(entry) => entry.entity = entity,
            None => self.roster.push(RosterEntry { object, entity, enabled: true }),
        }
    }

    fn unbind(&mut self, object: ObjectId) -> bool {
        let before = self.roster.len();
        self.roster.retain(|entry| entry.object != object);
        before != self.roster.len()
    }
}

pub(crate) type SharedBridge = Rc<RefCell<BridgeState>>;

/// Script-side wrapper of a native entity id. Only `Engine.Entity::FromNative` creates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptEntity {
    id: INT,
}

impl ScriptEntity {
    pub(crate) fn from_native(id: u64) -> Self {
        Self { id: id as INT }
    }

    pub fn native_id(&self) -> u64 {
        self.id as u64
    }
}

/// Growable script-side list declared as `List<T>`.
#[derive(Debug, Clone, Default)]
pub struct ScriptList {
    element: String,
    items: Array,
}

impl ScriptList {
    pub fn new(element: impl Into<String>) -> Self {
        Self { element: element.into(), items: Array::new() }
    }

    pub fn from_items(element: impl Into<String>, items: Array) -> Self {
        Self { element: element.into(), items }
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn items(&self) -> &[Dynamic] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn slot(&self, index: INT) -> Result<usize, Box<EvalAltResult>> {
        usize::try_from(index)
            .ok()
            .filter(|&slot| slot < self.items.len())
            .ok_or_else(|| EvalAltResult::ErrorArrayBounds(self.items.len(), index, Position::NONE).into())
    }
}

impl IntoIterator for ScriptList {
    type Item = Dynamic;
    type IntoIter = std::vec::IntoIter<Dynamic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Equality for the scalar kinds a list can hold.
fn same_value(a: &Dynamic, b: &Dynamic) -> bool {
    if let (Ok(x), Ok(y)) = (a.as_int(), b.as_int()) {
        return x == y;
    }
    if let (Ok(x), Ok(y)) = (a.as_float(), b.as_float()) {
        return x == y;
    }
    if let (Ok(x), Ok(y)) = (a.as_bool(), b.as_bool()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.read_lock::<ImmutableString>(), b.read_lock::<ImmutableString>()) {
        return *x == *y;
    }
    if let (Some(x), Some(y)) = (a.read_lock::<ScriptEntity>(), b.read_lock::<ScriptEntity>()) {
        return *x == *y;
    }
    false
}

fn register_entity_type(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptEntity>("Entity")
        .register_get("id", |entity: &mut ScriptEntity| entity.id)
        .register_fn("==", |a: ScriptEntity, b: ScriptEntity| a == b)
        .register_fn("!=", |a: ScriptEntity, b: ScriptEntity| a != b)
        .register_fn("to_string", |entity: &mut ScriptEntity| format!("Entity({})", entity.id))
        .register_fn("to_debug", |entity: &mut ScriptEntity| format!("Entity({})", entity.id));
}

fn register_list_type(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptList>("List")
        .register_get("count", |list: &mut ScriptList| list.items.len() as INT)
        .register_fn("len", |list: &mut ScriptList| list.items.len() as INT)
        .register_fn("add", |list: &mut ScriptList, item: Dynamic| list.items.push(item))
        .register_fn("get", |list: &mut ScriptList, index: INT| -> Result<Dynamic, Box<EvalAltResult>> {
            let slot = list.slot(index)?;
            Ok(list.items[slot].clone())
        })
        .register_fn("set", |list: &mut ScriptList, index: INT, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let slot = list.slot(index)?;
            list.items[slot] = value;
            Ok(())
        })
        .register_fn("remove_at", |list: &mut ScriptList, index: INT| -> Result<Dynamic, Box<EvalAltResult>> {
            let slot = list.slot(index)?;
            Ok(list.items.remove(slot))
        })
        .register_fn("clear", |list: &mut ScriptList| list.items.clear())
        .register_fn("contains", |list: &mut ScriptList, value: Dynamic| {
            list.items.iter().any(|item| same_value(item, &value))
        })
        .register_indexer_get(|list: &mut ScriptList, index: INT| -> Result<Dynamic, Box<EvalAltResult>> {
            let slot = list.slot(index)?;
            Ok(list.items[slot].clone())
        })
        .register_indexer_set(
            |list: &mut ScriptList, index: INT, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let slot = list.slot(index)?;
                list.items[slot] = value;
                Ok(())
            },
        )
        .register_fn("to_string", |list: &mut ScriptList| format!("List<{}>[{}]", list.element, list.items.len()))
        .register_iterator::<ScriptList>();
}

/// Registers the native entry points script code may call.
pub(crate) fn register_entry_points(engine: &mut Engine, bridge: &SharedBridge) {
    register_entity_type(engine);
    register_list_type(engine);

    let state = Rc::clone(bridge);
    engine.register_fn("bind_native_owner", move |object: INT, entity: INT| {
        state.borrow_mut().bind(ObjectId::from_script(object), entity as u64);
    });
    let state = Rc::clone(bridge);
    engine.register_fn("unbind_native_owner", move |object: INT| state.borrow_mut().unbind(ObjectId::from_script(object)));
    engine.register_fn("entity_from_native", |id: INT| ScriptEntity { id });
    let state = Rc::clone(bridge);
    engine.register_fn("destroy_entity", move |id: INT| {
        state.borrow_mut().commands.push(ScriptCommand::DestroyEntity { entity: id as u64 });
    });
    let state = Rc::clone(bridge);
    engine.register_fn("set_entity_active", move |id: INT, active: bool| {
        state.borrow_mut().commands.push(ScriptCommand::SetActive { entity: id as u64, active });
    });
    let state = Rc::clone(bridge);
    engine.register_fn("delta_time", move || state.borrow().delta_time);
    engine.register_fn("log_info", |message: &str| log::info!("[script] {message}"));
    engine.register_fn("log_warn", |message: &str| log::warn!("[script] {message}"));
    engine.register_fn("log_error", |message: &str| log::error!("[script] {message}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (Engine, SharedBridge) {
        let mut engine = Engine::new();
        let bridge = SharedBridge::default();
        register_entry_points(&mut engine, &bridge);
        (engine, bridge)
    }

    #[test]
    fn lists_behave_like_growable_sequences() {
        let (mut engine, _) = engine();
        engine.register_fn("make_list", || ScriptList::new("int"));
        let total = engine
            .eval::<INT>(
                r#"
                let list = make_list();
                list.add(4);
                list.add(5);
                list.add(6);
                list[0] = 1;
                list.remove_at(1);
                let sum = 0;
                for item in list { sum += item; }
                if list.contains(6) { sum += 100; }
                sum + list.count
                "#,
            )
            .expect("eval");
        assert_eq!(total, 1 + 6 + 100 + 2);
    }

    #[test]
    fn out_of_range_index_is_a_script_error() {
        let (mut engine, _) = engine();
        engine.register_fn("make_list", || ScriptList::new("int"));
        assert!(engine.eval::<Dynamic>("let list = make_list(); list[3]").is_err());
    }

    #[test]
    fn entry_points_queue_commands_and_bind_owners() {
        let (engine, bridge) = engine();
        engine
            .run("bind_native_owner(5, 42); destroy_entity(7); set_entity_active(42, false); unbind_native_owner(9);")
            .expect("run");
        let state = bridge.borrow();
        assert_eq!(state.roster.len(), 1);
        assert_eq!(state.roster[0].entity, 42);
        assert_eq!(
            state.commands,
            vec![ScriptCommand::DestroyEntity { entity: 7 }, ScriptCommand::SetActive { entity: 42, active: false }]
        );
    }

    #[test]
    fn wrapped_entities_compare_by_id() {
        let (engine, _) = engine();
        assert!(engine.eval::<bool>("entity_from_native(3) == entity_from_native(3)").expect("eval"));
        assert_eq!(engine.eval::<INT>("entity_from_native(11).id").expect("eval"), 11);
    }
}
