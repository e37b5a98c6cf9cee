#![allow(dead_code)]

use kestrel_logic::config::{HandlePoolConfig, LogicConfig, RuntimeConfig};
use kestrel_logic::managed::ManagedRuntimeHost;
use kestrel_logic::scripts::{LogicSystem, NativeScriptCatalog};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ENEMY: &str = r#"
fn fields() {
    #{
        health: "int",
        speed: "float",
        accuracy: "double",
        alive: "bool",
        initial: "char",
        label: "string",
        target: "Entity",
        waypoints: "Entity[]",
        squad: "List<Entity>",
        scores: "List<int>",
        weights: "float[]",
        updates: "int",
        last_target: "long"
    }
}

fn Update() {
    this.updates += 1;
    if type_of(this.target) == "Entity" {
        this.last_target = this.target.id;
    }
}
"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A throwaway assembly directory of `.rhai` class sources.
pub struct TestAssembly {
    dir: TempDir,
}

impl TestAssembly {
    pub fn new(classes: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("temp assembly dir");
        let assembly = Self { dir };
        for (class, source) in classes {
            assembly.write(class, source);
        }
        assembly
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes class `Game.Enemy` to `Game/Enemy.rhai`.
    pub fn write(&self, class: &str, source: &str) -> PathBuf {
        let mut path = self.dir.path().to_path_buf();
        for segment in class.split('.') {
            path.push(segment);
        }
        path.set_extension("rhai");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("class directory");
        }
        fs::write(&path, source).expect("write class source");
        path
    }

    pub fn remove(&self, class: &str) {
        let mut path = self.dir.path().to_path_buf();
        for segment in class.split('.') {
            path.push(segment);
        }
        path.set_extension("rhai");
        fs::remove_file(path).expect("remove class source");
    }
}

pub fn host_for(assembly: &TestAssembly, limits: HandlePoolConfig) -> ManagedRuntimeHost {
    init_logging();
    let mut host = ManagedRuntimeHost::new(RuntimeConfig::with_assembly(assembly.path()), limits);
    assert!(host.start(), "assembly should load");
    host
}

pub fn logic_for(assembly: &TestAssembly, catalog: NativeScriptCatalog) -> LogicSystem {
    init_logging();
    let mut config = LogicConfig::with_assembly(assembly.path());
    config.hot_reload.enabled = false;
    let mut logic = LogicSystem::new(config, catalog);
    assert!(logic.start_runtime(), "assembly should load");
    logic
}
