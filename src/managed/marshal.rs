use super::error::ScriptError;
use super::host::ManagedRuntimeHost;
use super::invoke::char_to_code_unit;
use super::types::{ElementKind, NativePtr};
use crate::scripts::EntityRef;
use rhai::{Array, Dynamic, FLOAT, INT};

/// A native value kind that can cross into script state and back.
pub trait Marshal: Sized + Clone {
    const KIND: ElementKind;

    fn to_managed(&self, host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError>;

    fn from_managed(value: &Dynamic, host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError>;
}

fn mismatch(expected: ElementKind, value: &Dynamic) -> ScriptError {
    ScriptError::ValueMismatch { expected: expected.name().to_string(), found: value.type_name().to_string() }
}

fn number(kind: ElementKind, value: &Dynamic) -> Result<FLOAT, ScriptError> {
    value.as_float().or_else(|_| value.as_int().map(|int| int as FLOAT)).map_err(|_| mismatch(kind, value))
}

impl Marshal for bool {
    const KIND: ElementKind = ElementKind::Bool;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        Ok(Dynamic::from_bool(*self))
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        value.as_bool().map_err(|_| mismatch(Self::KIND, value))
    }
}

impl Marshal for i32 {
    const KIND: ElementKind = ElementKind::Int;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        Ok(Dynamic::from_int(INT::from(*self)))
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        let int = value.as_int().map_err(|_| mismatch(Self::KIND, value))?;
        i32::try_from(int).map_err(|_| mismatch(Self::KIND, value))
    }
}

impl Marshal for i64 {
    const KIND: ElementKind = ElementKind::Long;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        Ok(Dynamic::from_int(*self))
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        value.as_int().map_err(|_| mismatch(Self::KIND, value))
    }
}

impl Marshal for f32 {
    const KIND: ElementKind = ElementKind::Float;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        Ok(Dynamic::from_float(FLOAT::from(*self)))
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        number(Self::KIND, value).map(|float| float as f32)
    }
}

impl Marshal for f64 {
    const KIND: ElementKind = ElementKind::Double;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        Ok(Dynamic::from_float(*self))
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        number(Self::KIND, value)
    }
}

impl Marshal for char {
    const KIND: ElementKind = ElementKind::Char;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        char_to_code_unit(*self).map(Dynamic::from_int)
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        let unit = value
            .as_int()
            .ok()
            .and_then(|int| u16::try_from(int).ok())
            .ok_or_else(|| mismatch(Self::KIND, value))?;
        char::from_u32(u32::from(unit)).ok_or_else(|| mismatch(Self::KIND, value))
    }
}

impl Marshal for String {
    const KIND: ElementKind = ElementKind::String;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        Ok(Dynamic::from(self.clone()))
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        value.clone().into_string().map_err(|_| mismatch(Self::KIND, value))
    }
}

impl Marshal for NativePtr {
    const KIND: ElementKind = ElementKind::Ptr;

    fn to_managed(&self, _host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        Ok(Dynamic::from_int(self.0 as INT))
    }

    fn from_managed(value: &Dynamic, _host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        value.as_int().map(|int| NativePtr(int as u64)).map_err(|_| mismatch(Self::KIND, value))
    }
}

// Entity values never touch the wrapper's bits directly; both directions go through Engine.Entity.
impl Marshal for EntityRef {
    const KIND: ElementKind = ElementKind::Entity;

    fn to_managed(&self, host: &mut ManagedRuntimeHost) -> Result<Dynamic, ScriptError> {
        host.wrap_entity(self.0)
    }

    fn from_managed(value: &Dynamic, host: &mut ManagedRuntimeHost) -> Result<Self, ScriptError> {
        if value.is_unit() {
            return Err(mismatch(Self::KIND, value));
        }
        host.unwrap_entity(value).map(EntityRef)
    }
}

pub(crate) fn items_to_managed<T: Marshal>(items: &[T], host: &mut ManagedRuntimeHost) -> Result<Array, ScriptError> {
    items.iter().map(|item| item.to_managed(host)).collect()
}

pub(crate) fn items_from_managed<T: Marshal>(
    items: &[Dynamic],
    host: &mut ManagedRuntimeHost,
) -> Result<Vec<T>, ScriptError> {
    items.iter().map(|item| T::from_managed(item, host)).collect()
}
