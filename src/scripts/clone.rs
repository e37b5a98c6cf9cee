use super::system::LogicSystem;
use crate::ecs::EcsWorld;
use bevy_ecs::prelude::Entity;
use log::{debug, error};

/// Duplicates entity subtrees together with their script bindings.
///
/// Entity references stored in a cloned record are copied as is: a clone whose record points at a
/// sibling in the original subtree keeps pointing at the original entity.
pub struct CloneCoordinator;

impl CloneCoordinator {
    /// Clones `source` and its descendants. Bindings are copied with fresh runtime state, native
    /// instances are created per clone, and managed instances are synchronized once from the clone root
    /// after the whole hierarchy exists. Returns the clone of `source`.
    pub fn clone_entity(logic: &mut LogicSystem, ecs: &mut EcsWorld, source: Entity) -> Option<Entity> {
        let pairs = ecs.clone_hierarchy(source)?;
        let &(root_original, root_clone) = pairs.first()?;
        for &(original, clone) in &pairs {
            let Some(binding) = ecs.binding(original).map(|binding| binding.clone_for(clone)) else {
                continue;
            };
            let native = binding.is_native();
            ecs.attach_script(clone, binding);
            if native {
                if let Err(err) = logic.load_binding(ecs, clone) {
                    error!("[scripts] clone {clone} of {original} has no native instance: {err}");
                }
            }
        }
        let synced = Self::sync_managed(logic, ecs, root_original, root_clone);
        debug!("[scripts] cloned {source} as {root_clone} ({} entit(ies), {synced} managed)", pairs.len());
        for &(_, clone) in &pairs {
            logic.setup_instance(clone);
            logic.on_entity_created(ecs, clone);
        }
        Some(root_clone)
    }

    /// Walks `original` and `clone` in lockstep, loading the managed instance of every clone with a
    /// MANAGED binding. Returns how many were loaded.
    fn sync_managed(logic: &mut LogicSystem, ecs: &mut EcsWorld, original: Entity, clone: Entity) -> usize {
        let mut loaded = 0;
        if ecs.binding(clone).map(|binding| binding.is_managed()).unwrap_or(false) {
            let (registry, host) = logic.parts_mut();
            if registry.instantiate_managed(host, ecs, clone).is_some() {
                loaded += 1;
            }
        }
        let originals = ecs.children(original);
        let clones = ecs.children(clone);
        for (child_original, child_clone) in originals.into_iter().zip(clones) {
            loaded += Self::sync_managed(logic, ecs, child_original, child_clone);
        }
        loaded
    }
}
