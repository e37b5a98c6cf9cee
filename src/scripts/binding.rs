use super::variables::VariableRecord;
use crate::managed::ManagedHandle;
use crate::scene::ScriptData;
use bevy_ecs::prelude::{Component, Entity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    Native,
    Managed,
    /// Terminal: the binding never executes.
    #[default]
    Unassigned,
}

impl ExecutionModel {
    pub fn label(self) -> &'static str {
        match self {
            ExecutionModel::Native => "native",
            ExecutionModel::Managed => "managed",
            ExecutionModel::Unassigned => "unassigned",
        }
    }
}

/// Splits `Game.Enemies.Grunt` into (`Game.Enemies`, `Grunt`). A bare name has an empty namespace.
pub fn split_qualified(qualified: &str) -> (&str, &str) {
    match qualified.rfind('.') {
        Some(dot) => (&qualified[..dot], &qualified[dot + 1..]),
        None => ("", qualified),
    }
}

/// Associates an entity with one script type, its execution model and its variables.
#[derive(Component, Debug, Clone)]
pub struct ScriptBinding {
    pub type_name: String,
    model: ExecutionModel,
    pub variables: VariableRecord,
    pub entity: Option<Entity>,
    /// Effective active state, ancestors included.
    pub active: bool,
    pub handle: Option<ManagedHandle>,
    pub instance_id: u64,
}

impl ScriptBinding {
    pub fn new(type_name: impl Into<String>, model: ExecutionModel) -> Self {
        Self {
            type_name: type_name.into(),
            model,
            variables: VariableRecord::default(),
            entity: None,
            active: true,
            handle: None,
            instance_id: 0,
        }
    }

    pub fn native(type_name: impl Into<String>) -> Self {
        Self::new(type_name, ExecutionModel::Native)
    }

    pub fn managed(type_name: impl Into<String>) -> Self {
        Self::new(type_name, ExecutionModel::Managed)
    }

    pub fn with_variables(mut self, variables: VariableRecord) -> Self {
        self.variables = variables;
        self
    }

    pub fn model(&self) -> ExecutionModel {
        self.model
    }

    pub fn is_native(&self) -> bool {
        self.model == ExecutionModel::Native
    }

    pub fn is_managed(&self) -> bool {
        self.model == ExecutionModel::Managed
    }

    pub fn namespace_and_name(&self) -> (&str, &str) {
        split_qualified(&self.type_name)
    }

    pub fn from_data(data: &ScriptData) -> Self {
        let load = VariableRecord::from_data(&data.variables);
        if !load.missing_buckets.is_empty() {
            log::warn!(
                "[scripts] {} loaded with {} missing variable bucket(s): {}",
                data.type_name,
                load.missing_buckets.len(),
                load.missing_buckets.join(", ")
            );
        }
        Self::new(data.type_name.clone(), data.model).with_variables(load.record)
    }

    pub fn to_data(&self) -> ScriptData {
        ScriptData { type_name: self.type_name.clone(), model: self.model, variables: self.variables.to_data() }
    }

    /// Same type, model and variables; runtime fields start fresh for `entity`.
    pub fn clone_for(&self, entity: Entity) -> Self {
        let mut binding = Self::new(self.type_name.clone(), self.model).with_variables(self.variables.clone());
        binding.entity = Some(entity);
        binding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::world::World;

    #[test]
    fn qualified_names_split_on_last_dot() {
        assert_eq!(split_qualified("Game.Enemy"), ("Game", "Enemy"));
        assert_eq!(split_qualified("Game.AI.Brain"), ("Game.AI", "Brain"));
        assert_eq!(split_qualified("Loose"), ("", "Loose"));
    }

    #[test]
    fn clone_for_resets_runtime_fields() {
        let mut world = World::new();
        let original_entity = world.spawn_empty().id();
        let clone_entity = world.spawn_empty().id();
        let mut binding =
            ScriptBinding::managed("Game.Enemy").with_variables(VariableRecord::new().with("health", 10_i32));
        binding.entity = Some(original_entity);
        binding.active = false;
        binding.instance_id = 99;
        let copy = binding.clone_for(clone_entity);
        assert_eq!(copy.model(), ExecutionModel::Managed);
        assert_eq!(copy.variables, binding.variables);
        assert_eq!(copy.entity, Some(clone_entity));
        assert!(copy.active);
        assert!(copy.handle.is_none());
        assert_eq!(copy.instance_id, 0);
    }

    #[test]
    fn model_serializes_in_snake_case() {
        assert_eq!(serde_json::to_string(&ExecutionModel::Managed).expect("serialize"), "\"managed\"");
        assert_eq!(ExecutionModel::default(), ExecutionModel::Unassigned);
    }
}
