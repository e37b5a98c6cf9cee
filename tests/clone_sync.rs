mod common;

use bevy_ecs::prelude::Entity;
use common::{logic_for, TestAssembly, ENEMY};
use kestrel_logic::ecs::EcsWorld;
use kestrel_logic::scripts::{
    CloneCoordinator, EntityRef, LogicSystem, NativeScript, NativeScriptCatalog, ScriptBinding, ScriptContext,
    VariableRecord,
};
use std::any::Any;

#[derive(Default)]
struct Turret {
    inits: u32,
    updates: u32,
}

impl NativeScript for Turret {
    fn init(&mut self, _ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        self.inits += 1;
        Ok(())
    }

    fn update(&mut self, _ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        self.updates += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Rig {
    ecs: EcsWorld,
    logic: LogicSystem,
    root: Entity,
    turret: Entity,
    leaf: Entity,
    _assembly: TestAssembly,
}

/// root (Game.Enemy) -> turret (native Game.Turret) -> leaf (Game.Enemy)
fn rig() -> Rig {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    let catalog = NativeScriptCatalog::new().with("Game.Turret", || Box::new(Turret::default()));
    let mut logic = logic_for(&assembly, catalog);
    let mut ecs = EcsWorld::new();
    let root = ecs.spawn_entity("root");
    let turret = ecs.spawn_child(root, "turret");
    let leaf = ecs.spawn_child(turret, "leaf");
    let root_record = VariableRecord::new()
        .with("health", 40_i32)
        .with("target", EntityRef::from(turret))
        .with_list("squad", vec![EntityRef::from(leaf)]);
    ecs.attach_script(root, ScriptBinding::managed("Game.Enemy").with_variables(root_record));
    ecs.attach_script(turret, ScriptBinding::native("Game.Turret"));
    ecs.attach_script(leaf, ScriptBinding::managed("Game.Enemy").with_variables(VariableRecord::new().with("health", 9_i32)));
    assert_eq!(logic.load_scripts(&mut ecs), Ok(3));
    logic.start(&mut ecs);
    Rig { ecs, logic, root, turret, leaf, _assembly: assembly }
}

#[test]
fn clone_copies_hierarchy_and_bindings_with_fresh_instances() {
    let Rig { mut ecs, mut logic, root, turret, leaf, .. } = rig();
    let clone_root = CloneCoordinator::clone_entity(&mut logic, &mut ecs, root).expect("clone");
    assert_ne!(clone_root, root);
    let clone_turret = ecs.children(clone_root)[0];
    let clone_leaf = ecs.children(clone_turret)[0];
    assert_eq!(ecs.name(clone_turret), Some("turret"));
    assert_eq!(ecs.parent(clone_root), None);

    for (original, clone) in [(root, clone_root), (turret, clone_turret), (leaf, clone_leaf)] {
        let original_binding = ecs.binding(original).cloned().expect("original binding");
        let clone_binding = ecs.binding(clone).cloned().expect("clone binding");
        assert_eq!(clone_binding.type_name, original_binding.type_name);
        assert_eq!(clone_binding.variables, original_binding.variables);
        assert_eq!(clone_binding.entity, Some(clone));
        assert_eq!(logic.registry().instance_count(clone), 1);
    }

    let original_handle = logic.registry().managed_handle(root).expect("original instance");
    let clone_handle = logic.registry().managed_handle(clone_root).expect("clone instance");
    assert_ne!(original_handle, clone_handle);
    assert_eq!(ecs.binding(clone_root).and_then(|binding| binding.handle), Some(clone_handle));
    assert_eq!(logic.registry().entity_for(clone_handle), Some(clone_root));
    let leaf_handle = logic.registry().managed_handle(clone_leaf).expect("clone leaf instance");
    assert_eq!(logic.host_mut().get_field::<i32>(leaf_handle, "health"), Ok(9));
    assert_eq!(logic.host_mut().get_field::<i64>(leaf_handle, "EntityId"), Ok(clone_leaf.to_bits() as i64));
}

#[test]
fn entity_references_are_not_remapped() {
    let Rig { mut ecs, mut logic, root, turret, leaf, .. } = rig();
    let clone_root = CloneCoordinator::clone_entity(&mut logic, &mut ecs, root).expect("clone");
    let clone_handle = logic.registry().managed_handle(clone_root).expect("clone instance");
    let host = logic.host_mut();
    assert_eq!(host.get_field::<i32>(clone_handle, "health"), Ok(40));
    assert_eq!(host.get_field::<EntityRef>(clone_handle, "target"), Ok(EntityRef::from(turret)));
    assert_eq!(host.get_sequence_field::<EntityRef>(clone_handle, "squad"), Ok(vec![EntityRef::from(leaf)]));
}

#[test]
fn clones_made_mid_session_are_set_up_once() {
    let Rig { mut ecs, mut logic, root, turret, .. } = rig();
    let clone_root = CloneCoordinator::clone_entity(&mut logic, &mut ecs, root).expect("clone");
    let clone_turret = ecs.children(clone_root)[0];
    assert_eq!(logic.registry().native_as::<Turret>(clone_turret).map(|t| t.inits), Some(1));
    assert_eq!(logic.registry().native_as::<Turret>(turret).map(|t| t.inits), Some(1));

    logic.update(&mut ecs, 0.016);
    assert_eq!(logic.registry().native_as::<Turret>(clone_turret).map(|t| t.updates), Some(1));
    assert_eq!(logic.registry().native_as::<Turret>(turret).map(|t| t.updates), Some(1));
    let clone_handle = logic.registry().managed_handle(clone_root).expect("clone instance");
    assert_eq!(logic.host_mut().get_field::<i32>(clone_handle, "updates"), Ok(1));
}

#[test]
fn cloning_a_child_keeps_it_under_the_same_parent() {
    let Rig { mut ecs, mut logic, root, turret, .. } = rig();
    let clone_turret = CloneCoordinator::clone_entity(&mut logic, &mut ecs, turret).expect("clone");
    assert_eq!(ecs.parent(clone_turret), Some(root));
    assert_eq!(ecs.children(root).len(), 2);
    assert_eq!(logic.registry().managed_count(), 3);
}

#[test]
fn cloning_a_dead_entity_yields_nothing() {
    let Rig { mut ecs, mut logic, leaf, .. } = rig();
    logic.destroy_entity(&mut ecs, leaf);
    logic.end_frame(&mut ecs, 0.016);
    assert!(CloneCoordinator::clone_entity(&mut logic, &mut ecs, leaf).is_none());
}

#[test]
fn clones_placed_under_a_doomed_subtree_are_destroyed_with_it() {
    let Rig { mut ecs, mut logic, root, turret, leaf, .. } = rig();
    logic.destroy_entity(&mut ecs, root);
    let late = CloneCoordinator::clone_entity(&mut logic, &mut ecs, leaf).expect("clone");
    assert_eq!(ecs.parent(late), Some(turret));
    assert_eq!(logic.registry().instance_count(late), 1);
    assert!(!logic.registry().is_pending(late));

    let despawned = logic.flush_destroyed(&mut ecs);
    assert!(despawned.contains(&late));
    assert!(!ecs.is_alive(late));
    assert_eq!(logic.registry().instance_count(late), 0);
    assert_eq!(logic.registry().managed_count(), 0);
    assert_eq!(logic.registry().native_count(), 0);
    assert_eq!(logic.host().stats().bound_objects, 0);
}
