//! Per-entity script instances: bindings and their variable records, native scripts, the instance
//! registry and the logic system that drives both execution models.

mod binding;
mod clone;
mod hot_reload;
mod marshaller;
mod native;
mod registry;
mod serialization;
mod system;
mod variables;

pub use binding::{split_qualified, ExecutionModel, ScriptBinding};
pub use clone::CloneCoordinator;
pub use hot_reload::{is_script_source, AssemblyWatcher, ReloadFlag};
pub use marshaller::{marshal_record, read_entity_fields, MarshalReport};
pub use native::{NativeFactory, NativeScript, NativeScriptCatalog, ScriptContext};
pub use registry::{
    InstanceIndex, LogicError, ManagedInstance, NativeInstance, OverrideCache, ScriptInstanceRegistry,
};
pub use serialization::{NamedValue, RecordLoad, VariableRecordData};
pub use system::LogicSystem;
pub use variables::{Bucket, EntityRef, RecordScalar, VariableRecord};
