//! Embedded managed runtime: a rhai VM hosting class-shaped script sources, with an object heap,
//! handle pools and a marshalling layer between native values and script values.

mod assembly;
mod bridge;
mod error;
mod handles;
mod heap;
mod host;
mod invoke;
mod marshal;
mod types;

pub use assembly::{Assembly, ClassInfo, ClassKind};
pub use bridge::{RosterEntry, ScriptEntity, ScriptList};
pub use error::ScriptError;
pub use handles::{HandlePools, PoolKind};
pub use heap::ObjectId;
pub use host::{ManagedRuntimeHost, RuntimeStats, MAX_COLLECTION_PASSES};
pub use invoke::render_exception;
pub use marshal::Marshal;
pub use types::{
    BoxedValue, ElementKind, FieldType, LifecycleOverrides, LifecycleStage, ManagedEvent, ManagedHandle, NativePtr,
    Primitive, ScriptArg,
};
