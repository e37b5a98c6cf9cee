use super::*;
use crate::events::{EventBus, LogicEvent};
use crate::scene::{Scene, SceneEntity};
use crate::scripts::ScriptBinding;
use anyhow::{bail, Result};
use bevy_ecs::prelude::{Entity, Mut, World};
use std::collections::HashMap;

// ---------- World container ----------
pub struct EcsWorld {
    pub world: World,
}

impl Default for EcsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl EcsWorld {
    pub fn new() -> Self {
        let mut world = World::new();
        world.insert_resource(EventBus::default());
        Self { world }
    }

    pub fn spawn_entity(&mut self, name: &str) -> Entity {
        self.world.spawn((Name(name.to_string()), ActiveSelf(true))).id()
    }

    pub fn spawn_child(&mut self, parent: Entity, name: &str) -> Entity {
        let child = self.spawn_entity(name);
        self.set_parent(child, Some(parent));
        child
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.world.entities().contains(entity)
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.world.get::<Name>(entity).map(|name| name.0.as_str())
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.world.get::<Parent>(entity).map(|parent| parent.0)
    }

    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.world.get::<Children>(entity).map(|children| children.0.clone()).unwrap_or_default()
    }

    /// Re-parents `child`, keeping both `Parent` and the old/new parent's `Children` consistent.
    pub fn set_parent(&mut self, child: Entity, parent: Option<Entity>) -> bool {
        if !self.is_alive(child) {
            return false;
        }
        if let Some(new_parent) = parent {
            if !self.is_alive(new_parent) || self.is_ancestor_or_self(child, new_parent) {
                return false;
            }
        }
        if let Some(previous) = self.parent(child) {
            if let Some(mut siblings) = self.world.get_mut::<Children>(previous) {
                siblings.0.retain(|&sibling| sibling != child);
            }
        }
        match parent {
            Some(new_parent) => {
                self.world.entity_mut(child).insert(Parent(new_parent));
                if let Some(mut children) = self.world.get_mut::<Children>(new_parent) {
                    children.0.push(child);
                } else {
                    self.world.entity_mut(new_parent).insert(Children(vec![child]));
                }
            }
            None => {
                self.world.entity_mut(child).remove::<Parent>();
            }
        }
        true
    }

    fn is_ancestor_or_self(&self, candidate: Entity, entity: Entity) -> bool {
        let mut cursor = Some(entity);
        while let Some(current) = cursor {
            if current == candidate {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// `entity` followed by all of its descendants, depth first in child order.
    pub fn subtree(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        if !self.is_alive(entity) {
            return out;
        }
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            out.push(current);
            let children = self.children(current);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub fn active_self(&self, entity: Entity) -> bool {
        self.world.get::<ActiveSelf>(entity).map(|active| active.0).unwrap_or(true)
    }

    pub fn set_active_self(&mut self, entity: Entity, active: bool) -> bool {
        let alive = self.is_alive(entity);
        match self.world.get_mut::<ActiveSelf>(entity) {
            Some(mut flag) => {
                flag.0 = active;
                true
            }
            None if alive => {
                self.world.entity_mut(entity).insert(ActiveSelf(active));
                true
            }
            None => false,
        }
    }

    /// Active only when the entity and every ancestor are active.
    pub fn effective_active(&self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let mut cursor = Some(entity);
        while let Some(current) = cursor {
            if !self.active_self(current) {
                return false;
            }
            cursor = self.parent(current);
        }
        true
    }

    pub fn attach_script(&mut self, entity: Entity, mut binding: ScriptBinding) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        binding.entity = Some(entity);
        binding.active = self.effective_active(entity);
        self.world.entity_mut(entity).insert(binding);
        true
    }

    pub fn binding(&self, entity: Entity) -> Option<&ScriptBinding> {
        self.world.get::<ScriptBinding>(entity)
    }

    pub fn binding_mut(&mut self, entity: Entity) -> Option<Mut<'_, ScriptBinding>> {
        self.world.get_mut::<ScriptBinding>(entity)
    }

    /// Every entity carrying a script binding, ordered by entity index.
    pub fn script_entities(&mut self) -> Vec<Entity> {
        let mut query = self.world.query::<(Entity, &ScriptBinding)>();
        let mut entities: Vec<Entity> = query.iter(&self.world).map(|(entity, _)| entity).collect();
        entities.sort_by_key(|entity| entity.index());
        entities
    }

    /// Despawns the entity and its descendants. Returns every despawned entity.
    pub fn despawn_recursive(&mut self, entity: Entity) -> Vec<Entity> {
        let doomed = self.subtree(entity);
        if let Some(parent) = self.parent(entity) {
            if let Some(mut siblings) = self.world.get_mut::<Children>(parent) {
                siblings.0.retain(|&child| child != entity);
            }
        }
        let mut removed = Vec::with_capacity(doomed.len());
        for target in doomed.into_iter().rev() {
            if self.world.despawn(target) {
                removed.push(target);
            }
        }
        removed
    }

    /// Duplicates the subtree rooted at `root`. The returned pairs are `(original, clone)` in pre-order;
    /// clone parent/child links point at clone ids and the clone root shares the original's parent.
    pub fn clone_hierarchy(&mut self, root: Entity) -> Option<Vec<(Entity, Entity)>> {
        if !self.is_alive(root) {
            return None;
        }
        let originals = self.subtree(root);
        let mut mapping: HashMap<Entity, Entity> = HashMap::with_capacity(originals.len());
        let mut pairs = Vec::with_capacity(originals.len());
        for &original in &originals {
            let name = self.world.get::<Name>(original).cloned().unwrap_or_default();
            let active = self.world.get::<ActiveSelf>(original).copied().unwrap_or_default();
            let clone = self.world.spawn((name, active)).id();
            mapping.insert(original, clone);
            pairs.push((original, clone));
        }
        for &(original, clone) in &pairs {
            if original == root {
                if let Some(parent) = self.parent(root) {
                    self.set_parent(clone, Some(parent));
                }
                continue;
            }
            if let Some(parent) = self.parent(original).and_then(|parent| mapping.get(&parent).copied()) {
                self.set_parent(clone, Some(parent));
            }
        }
        Some(pairs)
    }

    pub fn push_event(&mut self, event: LogicEvent) {
        self.world.resource_mut::<EventBus>().push(event);
    }

    pub fn drain_events(&mut self) -> Vec<LogicEvent> {
        self.world.resource_mut::<EventBus>().drain()
    }

    pub fn export_scene(&mut self) -> Scene {
        let mut roots: Vec<Entity> = {
            let mut query = self.world.query::<(Entity, Option<&Parent>, &ActiveSelf)>();
            query.iter(&self.world).filter(|(_, parent, _)| parent.is_none()).map(|(e, _, _)| e).collect()
        };
        roots.sort_by_key(|entity| entity.index());
        let mut scene = Scene::default();
        for root in roots {
            self.collect_scene_entity(root, None, &mut scene.entities);
        }
        scene
    }

    pub fn export_prefab(&mut self, root: Entity) -> Option<Scene> {
        if !self.is_alive(root) {
            return None;
        }
        let mut scene = Scene::default();
        self.collect_scene_entity(root, None, &mut scene.entities);
        Some(scene)
    }

    fn collect_scene_entity(&self, entity: Entity, parent: Option<usize>, out: &mut Vec<SceneEntity>) {
        let index = out.len();
        out.push(SceneEntity {
            name: self.name(entity).map(str::to_string),
            active: self.active_self(entity),
            parent,
            script: self.binding(entity).map(ScriptBinding::to_data),
        });
        for child in self.children(entity) {
            self.collect_scene_entity(child, Some(index), out);
        }
    }

    /// Spawns every scene entity, returning them in scene order. Script bindings are attached but no
    /// instance is created; the logic system materializes them.
    pub fn load_scene(&mut self, scene: &Scene) -> Result<Vec<Entity>> {
        for (index, entity) in scene.entities.iter().enumerate() {
            if let Some(parent) = entity.parent {
                if parent >= index {
                    bail!("scene entity {index} references parent {parent} which is not declared before it");
                }
            }
        }
        let mut spawned = Vec::with_capacity(scene.entities.len());
        for data in &scene.entities {
            let entity = self
                .world
                .spawn((Name(data.name.clone().unwrap_or_default()), ActiveSelf(data.active)))
                .id();
            if let Some(parent) = data.parent {
                self.set_parent(entity, Some(spawned[parent]));
            }
            spawned.push(entity);
        }
        for (data, &entity) in scene.entities.iter().zip(spawned.iter()) {
            if let Some(script) = &data.script {
                self.attach_script(entity, ScriptBinding::from_data(script));
            }
        }
        Ok(spawned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_flag_is_inserted_for_bare_entities_and_refused_for_dead_ones() {
        let mut ecs = EcsWorld::new();
        let bare = ecs.world.spawn_empty().id();
        assert!(ecs.active_self(bare));
        assert!(ecs.set_active_self(bare, false));
        assert!(!ecs.active_self(bare));
        assert!(ecs.set_active_self(bare, true));
        assert!(ecs.active_self(bare));

        let gone = ecs.spawn_entity("gone");
        ecs.despawn_recursive(gone);
        assert!(!ecs.set_active_self(gone, false));
    }
}
