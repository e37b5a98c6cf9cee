use bevy_ecs::prelude::Entity;

/// World mutations requested by scripts. They are queued while script code runs and applied by the
/// logic system once the current stage or event has finished dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptCommand {
    DestroyEntity { entity: u64 },
    SetActive { entity: u64, active: bool },
}

impl ScriptCommand {
    pub fn destroy(entity: Entity) -> Self {
        ScriptCommand::DestroyEntity { entity: entity.to_bits() }
    }

    pub fn set_active(entity: Entity, active: bool) -> Self {
        ScriptCommand::SetActive { entity: entity.to_bits(), active }
    }

    pub fn target(&self) -> Option<Entity> {
        let bits = match self {
            ScriptCommand::DestroyEntity { entity } => *entity,
            ScriptCommand::SetActive { entity, .. } => *entity,
        };
        entity_from_bits(bits)
    }
}

pub fn entity_from_bits(bits: u64) -> Option<Entity> {
    Entity::try_from_bits(bits).ok()
}
