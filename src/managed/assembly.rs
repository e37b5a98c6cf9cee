use super::bridge::ScriptList;
use super::heap::OBJECT_ID_KEY;
use super::invoke;
use super::types::{ElementKind, FieldType, LifecycleOverrides, LifecycleStage};
use anyhow::{anyhow, bail, Context, Result};
use rhai::{Dynamic, Engine, Map, AST};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const SCRIPT_BASE_CLASS: &str = "Engine.Script";
pub const ENTITY_CLASS: &str = "Engine.Entity";
pub const DISPATCHER_CLASS: &str = "Engine.Dispatcher";

const SCRIPT_EXTENSION: &str = "rhai";

const SCRIPT_BASE_SOURCE: &str = r#"
fn fields() {
    #{ NativePtr: "ptr", EntityId: "long", OwnerEntity: "Entity" }
}

fn get_Owner() { this.OwnerEntity }
fn set_Owner(value) { this.OwnerEntity = value; }

fn BindNative() { bind_native_owner(this.ObjectId, this.EntityId); }
fn UnbindNative() { unbind_native_owner(this.ObjectId); }

fn Setup() {}
fn Init() {}
fn Update() {}
fn FixedUpdate() {}
fn End() {}

fn DestroyEntity(entity) { destroy_entity(entity.id); }
fn SetActive(entity, active) { set_entity_active(entity.id, active); }
fn Log(message) { log_info(`${message}`); }
"#;

const ENTITY_SOURCE: &str = r#"
fn FromNative(id) { entity_from_native(id) }
fn ToNative(entity) { entity.id }
"#;

// Fan-out is implemented natively; the class exists so it can be looked up like any other.
const DISPATCHER_SOURCE: &str = "";

const BUILTIN_CLASSES: [(&str, &str); 3] =
    [(SCRIPT_BASE_CLASS, SCRIPT_BASE_SOURCE), (ENTITY_CLASS, ENTITY_SOURCE), (DISPATCHER_CLASS, DISPATCHER_SOURCE)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    User,
    Engine,
}

impl ClassKind {
    /// Classes under the top-level `Engine` namespace belong to the engine.
    pub fn classify(qualified: &str) -> Self {
        if qualified.split('.').next() == Some("Engine") && qualified.contains('.') {
            ClassKind::Engine
        } else {
            ClassKind::User
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassKind::User => "user",
            ClassKind::Engine => "engine",
        }
    }
}

/// A loaded class with its inheritance chain already folded in.
#[derive(Debug)]
pub struct ClassInfo {
    qualified: String,
    kind: ClassKind,
    base: Option<String>,
    chain: Vec<String>,
    fields: Vec<(String, FieldType)>,
    user_fields: HashSet<String>,
    methods: HashSet<(String, usize)>,
    overrides: LifecycleOverrides,
    ast: AST,
    source: Option<PathBuf>,
}

impl ClassInfo {
    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }

    pub fn namespace(&self) -> &str {
        self.qualified.rfind('.').map(|dot| &self.qualified[..dot]).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.qualified.rfind('.').map(|dot| &self.qualified[dot + 1..]).unwrap_or(&self.qualified)
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// This class followed by its bases, nearest first.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn derives_from(&self, qualified: &str) -> bool {
        self.chain.iter().any(|name| name == qualified)
    }

    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldType> {
        self.fields.iter().find(|(field, _)| field == name).map(|(_, ty)| ty)
    }

    /// Whether the field is declared by a user class rather than inherited from an engine class.
    pub fn is_user_field(&self, name: &str) -> bool {
        self.user_fields.contains(name)
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        self.methods.contains(&(name.to_string(), arity))
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.has_method(&format!("get_{name}"), 0) || self.has_method(&format!("set_{name}"), 1)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Lifecycle stages declared by a user class in the chain.
    pub fn overrides(&self) -> LifecycleOverrides {
        self.overrides
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }

    /// Field map of a freshly allocated instance.
    pub(crate) fn new_state(&self) -> Map {
        self.fields.iter().map(|(name, ty)| (name.as_str().into(), default_value(ty))).collect()
    }

    pub fn describe(&self) -> String {
        format!(
            "{} ({}, base {}, {} field(s), {} method(s))",
            self.qualified,
            self.kind.label(),
            self.base.as_deref().unwrap_or("-"),
            self.fields.len(),
            self.methods.len()
        )
    }
}

fn default_value(ty: &FieldType) -> Dynamic {
    match ty {
        FieldType::Scalar(kind) => match kind {
            ElementKind::Bool => Dynamic::FALSE,
            ElementKind::Int | ElementKind::Long | ElementKind::Char | ElementKind::Ptr => Dynamic::ZERO,
            ElementKind::Float | ElementKind::Double => Dynamic::FLOAT_ZERO,
            ElementKind::String => Dynamic::from(String::new()),
            ElementKind::Entity => Dynamic::UNIT,
        },
        FieldType::Array(_) => Dynamic::from_array(Vec::new()),
        FieldType::List(element) => Dynamic::from(ScriptList::new(element.clone())),
        FieldType::Object(_) => Dynamic::UNIT,
    }
}

struct RawClass {
    ast: AST,
    fields: BTreeMap<String, String>,
    base: Option<String>,
    methods: HashSet<(String, usize)>,
    source: Option<PathBuf>,
}

impl RawClass {
    fn describe(engine: &Engine, qualified: &str, ast: AST, source: Option<PathBuf>) -> Result<Self> {
        let methods: HashSet<(String, usize)> =
            ast.iter_functions().map(|meta| (meta.name.to_string(), meta.params.len())).collect();
        let fields = if methods.contains(&("fields".to_string(), 0)) {
            let value = invoke::call_static(engine, &ast, qualified, "fields", Vec::new())
                .map_err(|err| anyhow!("{qualified}: fields() failed: {err}"))?;
            rhai::serde::from_dynamic::<BTreeMap<String, String>>(&value)
                .map_err(|err| anyhow!("{qualified}: fields() must return a map of type names: {err}"))?
        } else {
            BTreeMap::new()
        };
        if fields.contains_key(OBJECT_ID_KEY) {
            bail!("{qualified}: field name '{OBJECT_ID_KEY}' is reserved for the object's identity");
        }
        let base = if methods.contains(&("base".to_string(), 0)) {
            let value = invoke::call_static(engine, &ast, qualified, "base", Vec::new())
                .map_err(|err| anyhow!("{qualified}: base() failed: {err}"))?;
            let name = value
                .into_string()
                .map_err(|found| anyhow!("{qualified}: base() must return a class name, got {found}"))?;
            Some(name)
        } else if ClassKind::classify(qualified) == ClassKind::User {
            Some(SCRIPT_BASE_CLASS.to_string())
        } else {
            None
        };
        Ok(Self { ast, fields, base, methods, source })
    }
}

/// Every class compiled from one assembly directory, plus the built-in engine classes.
#[derive(Debug)]
pub struct Assembly {
    root: PathBuf,
    classes: HashMap<String, Rc<ClassInfo>>,
    order: Vec<String>,
}

impl Assembly {
    pub fn load(engine: &Engine, root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("assembly directory {} not found", root.display());
        }
        let mut files = Vec::new();
        collect_sources(root, &mut files)?;
        files.sort();

        let mut raw = BTreeMap::new();
        for file in files {
            let qualified = qualified_name(root, &file)?;
            let source = fs::read_to_string(&file).with_context(|| format!("Reading {}", file.display()))?;
            let ast = engine
                .compile(source)
                .map_err(|err| anyhow!("Compiling {}: {err}", file.display()))?;
            let class = RawClass::describe(engine, &qualified, ast, Some(file))?;
            raw.insert(qualified, class);
        }
        for (qualified, source) in BUILTIN_CLASSES {
            if raw.contains_key(qualified) {
                continue;
            }
            let ast = engine.compile(source).map_err(|err| anyhow!("Compiling built-in {qualified}: {err}"))?;
            raw.insert(qualified.to_string(), RawClass::describe(engine, qualified, ast, None)?);
        }

        let mut classes = HashMap::with_capacity(raw.len());
        let mut order = Vec::with_capacity(raw.len());
        for qualified in raw.keys() {
            let info = resolve_class(&raw, qualified)?;
            classes.insert(qualified.clone(), Rc::new(info));
            order.push(qualified.clone());
        }
        Ok(Self { root: root.to_path_buf(), classes, order })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class(&self, qualified: &str) -> Option<&Rc<ClassInfo>> {
        self.classes.get(qualified)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Classes in name order.
    pub fn classes(&self) -> impl Iterator<Item = &Rc<ClassInfo>> {
        self.order.iter().filter_map(|name| self.classes.get(name))
    }
}

fn resolve_class(raw: &BTreeMap<String, RawClass>, qualified: &str) -> Result<ClassInfo> {
    let mut chain: Vec<String> = Vec::new();
    let mut cursor = Some(qualified.to_string());
    while let Some(current) = cursor {
        if chain.contains(&current) {
            bail!("{qualified}: inheritance cycle through {current}");
        }
        let Some(class) = raw.get(&current) else {
            bail!("{qualified}: base class {current} not found");
        };
        cursor = class.base.clone();
        chain.push(current);
    }

    let mut ast: Option<AST> = None;
    let mut fields: Vec<(String, FieldType)> = Vec::new();
    let mut user_methods: HashSet<(String, usize)> = HashSet::new();
    let mut user_fields: HashSet<String> = HashSet::new();
    for name in chain.iter().rev() {
        let Some(class) = raw.get(name) else {
            continue;
        };
        ast = Some(match ast {
            Some(merged) => merged.merge(&class.ast),
            None => class.ast.clone(),
        });
        for (field, declared) in &class.fields {
            let ty = FieldType::parse(declared);
            match fields.iter_mut().find(|(existing, _)| existing == field) {
                Some((_, slot)) => *slot = ty,
                None => fields.push((field.clone(), ty)),
            }
        }
        if ClassKind::classify(name) == ClassKind::User {
            user_methods.extend(class.methods.iter().cloned());
            user_fields.extend(class.fields.keys().cloned());
        }
    }
    let ast = ast.ok_or_else(|| anyhow!("{qualified}: empty inheritance chain"))?;
    let methods: HashSet<(String, usize)> =
        ast.iter_functions().map(|meta| (meta.name.to_string(), meta.params.len())).collect();
    let overrides = LifecycleStage::ALL
        .iter()
        .filter(|stage| user_methods.contains(&(stage.method_name().to_string(), 0)))
        .fold(LifecycleOverrides::empty(), |acc, stage| acc | stage.flag());
    let own = raw.get(qualified).ok_or_else(|| anyhow!("{qualified}: class vanished during resolution"))?;
    Ok(ClassInfo {
        qualified: qualified.to_string(),
        kind: ClassKind::classify(qualified),
        base: own.base.clone(),
        chain,
        fields,
        user_fields,
        methods,
        overrides,
        ast,
        source: own.source.clone(),
    })
}

fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Listing {}", dir.display()))?;
    for entry in entries {
        let path = entry.with_context(|| format!("Listing {}", dir.display()))?.path();
        if path.is_dir() {
            collect_sources(&path, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(SCRIPT_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

/// `Game/Enemy.rhai` under the assembly root becomes `Game.Enemy`.
fn qualified_name(root: &Path, file: &Path) -> Result<String> {
    let relative = file.strip_prefix(root).with_context(|| format!("{} is outside the assembly", file.display()))?;
    let stem = relative.with_extension("");
    let mut segments = Vec::new();
    for component in stem.components() {
        let segment = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| anyhow!("{} is not valid UTF-8", file.display()))?;
        segments.push(segment);
    }
    if segments.is_empty() {
        bail!("{} has no class name", file.display());
    }
    Ok(segments.join("."))
}
