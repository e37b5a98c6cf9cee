use crate::events::ContactPhase;
use bitflags::bitflags;
use std::fmt;
use std::num::NonZeroU32;

/// Opaque reference that keeps (or, for the transient pool, tracks) a managed object. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedHandle(NonZeroU32);

impl ManagedHandle {
    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ManagedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Native pointer-sized token passed through the boundary untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativePtr(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
}

/// A struct-like value boxed into an object map on the managed side. `type_name` is kept under the
/// `__type` key.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxedValue {
    pub type_name: String,
    pub fields: Vec<(String, ScriptArg)>,
}

/// One argument crossing into script code. The caller picks the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Primitive(Primitive),
    Str(String),
    Native(NativePtr),
    Boxed(BoxedValue),
}

impl From<bool> for ScriptArg {
    fn from(value: bool) -> Self {
        ScriptArg::Primitive(Primitive::Bool(value))
    }
}

impl From<i32> for ScriptArg {
    fn from(value: i32) -> Self {
        ScriptArg::Primitive(Primitive::Int(value))
    }
}

impl From<i64> for ScriptArg {
    fn from(value: i64) -> Self {
        ScriptArg::Primitive(Primitive::Long(value))
    }
}

impl From<f32> for ScriptArg {
    fn from(value: f32) -> Self {
        ScriptArg::Primitive(Primitive::Float(value))
    }
}

impl From<f64> for ScriptArg {
    fn from(value: f64) -> Self {
        ScriptArg::Primitive(Primitive::Double(value))
    }
}

impl From<char> for ScriptArg {
    fn from(value: char) -> Self {
        ScriptArg::Primitive(Primitive::Char(value))
    }
}

impl From<&str> for ScriptArg {
    fn from(value: &str) -> Self {
        ScriptArg::Str(value.to_string())
    }
}

impl From<String> for ScriptArg {
    fn from(value: String) -> Self {
        ScriptArg::Str(value)
    }
}

impl From<NativePtr> for ScriptArg {
    fn from(value: NativePtr) -> Self {
        ScriptArg::Native(value)
    }
}

impl From<BoxedValue> for ScriptArg {
    fn from(value: BoxedValue) -> Self {
        ScriptArg::Boxed(value)
    }
}

/// Value kinds the marshalling layer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Bool,
    Int,
    Long,
    Float,
    Double,
    Char,
    String,
    Entity,
    Ptr,
}

impl ElementKind {
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim() {
            "bool" => ElementKind::Bool,
            "int" => ElementKind::Int,
            "long" => ElementKind::Long,
            "float" => ElementKind::Float,
            "double" => ElementKind::Double,
            "char" => ElementKind::Char,
            "string" => ElementKind::String,
            "Entity" => ElementKind::Entity,
            "ptr" => ElementKind::Ptr,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Bool => "bool",
            ElementKind::Int => "int",
            ElementKind::Long => "long",
            ElementKind::Float => "float",
            ElementKind::Double => "double",
            ElementKind::Char => "char",
            ElementKind::String => "string",
            ElementKind::Entity => "Entity",
            ElementKind::Ptr => "ptr",
        }
    }

    /// Kinds allowed as array or list elements.
    pub fn is_sequence_element(self) -> bool {
        !matches!(self, ElementKind::Long)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a managed field, as written in a class's `fields()` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ElementKind),
    /// Fixed array; holds the raw element type name.
    Array(String),
    /// Generic growable list; holds the raw element type name.
    List(String),
    Object(String),
}

impl FieldType {
    pub fn parse(declared: &str) -> Self {
        let declared = declared.trim();
        if let Some(element) = declared.strip_suffix("[]") {
            return FieldType::Array(element.trim().to_string());
        }
        if let Some(element) = declared.strip_prefix("List<").and_then(|rest| rest.strip_suffix('>')) {
            return FieldType::List(element.trim().to_string());
        }
        match ElementKind::parse(declared) {
            Some(kind) => FieldType::Scalar(kind),
            None => FieldType::Object(declared.to_string()),
        }
    }

    pub fn scalar_kind(&self) -> Option<ElementKind> {
        match self {
            FieldType::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, FieldType::Array(_) | FieldType::List(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(kind) => write!(f, "{kind}"),
            FieldType::Array(element) => write!(f, "{element}[]"),
            FieldType::List(element) => write!(f, "List<{element}>"),
            FieldType::Object(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Setup,
    Init,
    Update,
    FixedUpdate,
    End,
}

impl LifecycleStage {
    pub const ALL: [LifecycleStage; 5] =
        [LifecycleStage::Setup, LifecycleStage::Init, LifecycleStage::Update, LifecycleStage::FixedUpdate, LifecycleStage::End];

    pub fn method_name(self) -> &'static str {
        match self {
            LifecycleStage::Setup => "Setup",
            LifecycleStage::Init => "Init",
            LifecycleStage::Update => "Update",
            LifecycleStage::FixedUpdate => "FixedUpdate",
            LifecycleStage::End => "End",
        }
    }

    pub fn flag(self) -> LifecycleOverrides {
        match self {
            LifecycleStage::Setup => LifecycleOverrides::SETUP,
            LifecycleStage::Init => LifecycleOverrides::INIT,
            LifecycleStage::Update => LifecycleOverrides::UPDATE,
            LifecycleStage::FixedUpdate => LifecycleOverrides::FIXED_UPDATE,
            LifecycleStage::End => LifecycleOverrides::END,
        }
    }
}

bitflags! {
    /// Lifecycle methods a concrete script type declares itself rather than inheriting the no-op.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LifecycleOverrides: u8 {
        const SETUP = 1 << 0;
        const INIT = 1 << 1;
        const UPDATE = 1 << 2;
        const FIXED_UPDATE = 1 << 3;
        const END = 1 << 4;
    }
}

impl LifecycleOverrides {
    pub fn overrides(self, stage: LifecycleStage) -> bool {
        self.contains(stage.flag())
    }
}

/// Event payload handed to the managed dispatcher. Entities travel as native integer ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManagedEvent {
    Collision { phase: ContactPhase, a: u64, b: u64, time: f32 },
    Trigger { phase: ContactPhase, a: u64, b: u64, time: f32 },
    EntityCreated { entity: u64 },
    EntityRuntimeChanged { entity: u64 },
    Destroy { entity: u64 },
    Enable { entity: u64 },
    Disable { entity: u64 },
    ApplicationQuit,
}

impl ManagedEvent {
    /// Integer tag identifying the event kind on the managed side.
    pub fn tag(&self) -> i64 {
        match self {
            ManagedEvent::Collision { .. } => 0,
            ManagedEvent::Trigger { .. } => 1,
            ManagedEvent::EntityCreated { .. } => 2,
            ManagedEvent::EntityRuntimeChanged { .. } => 3,
            ManagedEvent::Destroy { .. } => 4,
            ManagedEvent::Enable { .. } => 5,
            ManagedEvent::Disable { .. } => 6,
            ManagedEvent::ApplicationQuit => 7,
        }
    }

    /// Timestamp of a collision or trigger contact. Handlers receive it after the other entity.
    pub fn contact_time(&self) -> Option<f32> {
        match self {
            ManagedEvent::Collision { time, .. } | ManagedEvent::Trigger { time, .. } => Some(*time),
            _ => None,
        }
    }

    pub fn handler_name(&self) -> &'static str {
        match self {
            ManagedEvent::Collision { phase, .. } => match phase {
                ContactPhase::Enter => "OnCollisionEnter",
                ContactPhase::Stay => "OnCollisionStay",
                ContactPhase::Exit => "OnCollisionExit",
            },
            ManagedEvent::Trigger { phase, .. } => match phase {
                ContactPhase::Enter => "OnTriggerEnter",
                ContactPhase::Stay => "OnTriggerStay",
                ContactPhase::Exit => "OnTriggerExit",
            },
            ManagedEvent::EntityCreated { .. } => "OnEntityCreated",
            ManagedEvent::EntityRuntimeChanged { .. } => "OnEntityRuntimeChanged",
            ManagedEvent::Destroy { .. } => "OnDestroy",
            ManagedEvent::Enable { .. } => "OnEnable",
            ManagedEvent::Disable { .. } => "OnDisable",
            ManagedEvent::ApplicationQuit => "OnApplicationQuit",
        }
    }
}
