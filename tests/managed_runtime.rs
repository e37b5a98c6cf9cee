mod common;

use common::{host_for, init_logging, TestAssembly, ENEMY};
use kestrel_logic::config::{HandlePoolConfig, RuntimeConfig};
use kestrel_logic::managed::{
    ClassKind, FieldType, LifecycleOverrides, ManagedRuntimeHost, PoolKind, ScriptArg, ScriptError,
};
use kestrel_logic::scripts::EntityRef;

const FAULTY: &str = r#"
fn fields() { #{ hits: "int" } }

fn Explode() { throw #{ _message: "boom", code: 7 }; }
fn Fail(reason) { throw `failed: ${reason}`; }
fn Hit() { this.hits += 1; this.hits }
"#;

const FRAGILE: &str = r#"
fn Constructor() { throw "constructor refused"; }
"#;

const MORTAL: &str = r#"
fn fields() { #{ finalized: "bool" } }
fn Finalize() { log_info("mortal finalized"); }
"#;

const SHAPES: &str = r#"
fn fields() {
    #{ scores: "List<int>", weights: "float[]", names: "List<string>", ids: "long[]", blobs: "Thing[]" }
}

fn ScoreKind() { type_of(this.scores) }
fn WeightKind() { type_of(this.weights) }
fn ScoreTotal() {
    let total = 0;
    for score in this.scores { total += score; }
    total
}
"#;

const MATH: &str = r#"
fn Add(a, b) { a + b }
"#;

const TAMPERER: &str = r#"
fn Tamper() { this.ObjectId = 12345; }
"#;

fn limits() -> HandlePoolConfig {
    HandlePoolConfig::default()
}

#[test]
fn missing_assembly_leaves_host_not_ready() {
    init_logging();
    let mut host = ManagedRuntimeHost::new(RuntimeConfig::with_assembly("does/not/exist"), limits());
    assert!(!host.start());
    assert!(!host.is_ready());
    assert_eq!(host.stats().classes, 0);
    assert!(host.get_class("Game", "Enemy").is_none());
    assert!(host.instantiate("Game", "Enemy").is_none());
    host.unload();
    assert!(!host.is_ready());
}

#[test]
fn missing_library_path_is_a_configuration_failure() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    init_logging();
    let mut config = RuntimeConfig::with_assembly(assembly.path());
    config.library_path = Some(assembly.path().join("no-such-lib"));
    let mut host = ManagedRuntimeHost::new(config, limits());
    assert!(!host.start());
    assert!(!host.is_ready());
}

#[test]
fn classes_are_classified_and_inherit_the_script_base() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    let host = host_for(&assembly, limits());
    let enemy = host.get_class("Game", "Enemy").expect("user class");
    assert_eq!(enemy.kind(), ClassKind::User);
    assert_eq!(enemy.base(), Some("Engine.Script"));
    assert!(enemy.has_method("BindNative", 0));
    assert_eq!(enemy.field("target"), Some(&FieldType::parse("Entity")));
    assert!(enemy.field("NativePtr").is_some());
    let base = host.get_class("Engine", "Script").expect("engine base class");
    assert_eq!(base.kind(), ClassKind::Engine);
    assert!(host.get_class("Game", "Ghost").is_none());
}

#[test]
fn object_identity_is_reserved() {
    let assembly = TestAssembly::new(&[("Game.Impostor", r#"fn fields() { #{ ObjectId: "long" } }"#)]);
    init_logging();
    let mut host = ManagedRuntimeHost::new(RuntimeConfig::with_assembly(assembly.path()), limits());
    assert!(!host.start(), "declaring the identity field fails the load");

    let assembly = TestAssembly::new(&[("Game.Tamperer", TAMPERER)]);
    let mut host = host_for(&assembly, limits());
    let handle = host.instantiate("Game", "Tamperer").expect("instance");
    host.set_field(handle, "EntityId", &5_i64).expect("owner id");
    host.try_invoke_method(handle, "BindNative", &[]).expect("bind");
    assert_eq!(host.stats().bound_objects, 1);
    host.try_invoke_method(handle, "Tamper", &[]).expect("tamper");
    host.try_invoke_method(handle, "UnbindNative", &[]).expect("unbind");
    assert_eq!(host.stats().bound_objects, 0);
}

#[test]
fn overrides_report_declared_lifecycle_methods() {
    let assembly = TestAssembly::new(&[
        ("Game.OnlyUpdate", "fn Update() {}"),
        ("Game.Idle", "fn Wander() {}"),
        ("Game.Busy", "fn Setup() {} fn Init() {} fn Update() {} fn FixedUpdate() {} fn End() {}"),
    ]);
    let mut host = host_for(&assembly, limits());
    let only_update = host.instantiate("Game", "OnlyUpdate").expect("instance");
    let idle = host.instantiate("Game", "Idle").expect("instance");
    let busy = host.instantiate("Game", "Busy").expect("instance");
    assert_eq!(host.overrides(only_update), LifecycleOverrides::UPDATE);
    assert_eq!(host.overrides(idle), LifecycleOverrides::empty());
    assert_eq!(host.overrides(busy), LifecycleOverrides::all());
}

#[test]
fn exceptions_are_contained_without_leaking_handles() {
    let assembly = TestAssembly::new(&[("Game.Faulty", FAULTY), ("Game.Fragile", FRAGILE)]);
    let mut host = host_for(&assembly, limits());
    let handle = host.instantiate("Game", "Faulty").expect("instance");
    let before = host.stats();

    assert!(host.invoke_method(handle, "Explode", &[]).is_none());
    match host.try_invoke_method(handle, "Explode", &[]) {
        Err(ScriptError::ManagedException { message, .. }) => assert_eq!(message, "boom"),
        other => panic!("expected a managed exception, got {other:?}"),
    }
    match host.try_invoke_method(handle, "Fail", &[ScriptArg::from("no ammo")]) {
        Err(ScriptError::ManagedException { message, .. }) => assert!(message.contains("failed: no ammo")),
        other => panic!("expected a managed exception, got {other:?}"),
    }
    assert!(matches!(
        host.try_invoke_method(handle, "Fail", &[]),
        Err(ScriptError::MethodNotFound { arity: 0, .. })
    ));

    let after = host.stats();
    assert_eq!(after.transient_handles, before.transient_handles);
    assert_eq!(after.lifetime_handles, before.lifetime_handles);
    assert_eq!(after.live_objects, before.live_objects);
    assert_eq!(host.invoke_method(handle, "Hit", &[]).and_then(|value| value.as_int().ok()), Some(1));

    assert!(host.instantiate("Game", "Fragile").is_none());
    let after_ctor = host.stats();
    assert_eq!(after_ctor.transient_handles, before.transient_handles);
    assert_eq!(after_ctor.live_objects, before.live_objects);
}

#[test]
fn static_methods_match_on_arity() {
    let assembly = TestAssembly::new(&[("Game.Math", MATH)]);
    let mut host = host_for(&assembly, limits());
    let sum = host.try_invoke_static("Game.Math", "Add", &[2_i64.into(), 3_i64.into()]).expect("static call");
    assert_eq!(sum.as_int().ok(), Some(5));
    assert!(matches!(
        host.try_invoke_static("Game.Math", "Add", &[2_i64.into()]),
        Err(ScriptError::MethodNotFound { arity: 1, .. })
    ));
    assert!(host.invoke_static("Game.Nothing", "Add", &[]).is_none());
}

#[test]
fn scalar_fields_and_properties_round_trip() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    let mut host = host_for(&assembly, limits());
    let handle = host.instantiate("Game", "Enemy").expect("instance");

    host.set_field(handle, "health", &75_i32).expect("int field");
    host.set_field(handle, "speed", &2.5_f32).expect("float field");
    host.set_field(handle, "accuracy", &0.125_f64).expect("double field");
    host.set_field(handle, "alive", &true).expect("bool field");
    host.set_field(handle, "label", &"grunt".to_string()).expect("string field");
    host.set_field(handle, "initial", &'Z').expect("char field");
    host.set_field(handle, "target", &EntityRef(9)).expect("entity field");

    assert_eq!(host.get_field::<i32>(handle, "health"), Ok(75));
    assert_eq!(host.get_field::<f32>(handle, "speed"), Ok(2.5));
    assert_eq!(host.get_field::<f64>(handle, "accuracy"), Ok(0.125));
    assert_eq!(host.get_field::<bool>(handle, "alive"), Ok(true));
    assert_eq!(host.get_field::<String>(handle, "label"), Ok("grunt".to_string()));
    assert_eq!(host.get_field::<char>(handle, "initial"), Ok('Z'));
    assert_eq!(host.get_field::<EntityRef>(handle, "target"), Ok(EntityRef(9)));

    assert_eq!(host.set_field(handle, "initial", &'\u{1F600}'), Err(ScriptError::CharOutOfRange('\u{1F600}')));
    assert!(matches!(host.set_field(handle, "health", &1.0_f32), Err(ScriptError::TypeMismatch { .. })));
    assert!(matches!(host.set_field(handle, "mana", &1_i32), Err(ScriptError::FieldNotFound { .. })));

    host.set_property(handle, "Owner", &EntityRef(31)).expect("owner property");
    assert_eq!(host.get_property::<EntityRef>(handle, "Owner"), Ok(EntityRef(31)));
    assert!(matches!(host.get_property::<i32>(handle, "Armor"), Err(ScriptError::PropertyNotFound { .. })));
}

#[test]
fn sequence_shape_follows_the_declared_field() {
    let assembly = TestAssembly::new(&[("Game.Shapes", SHAPES)]);
    let mut host = host_for(&assembly, limits());
    let handle = host.instantiate("Game", "Shapes").expect("instance");

    host.set_sequence_field(handle, "scores", &[1_i32, 2, 3]).expect("list field");
    host.set_sequence_field(handle, "weights", &[0.5_f32, 1.5]).expect("array field");
    host.set_sequence_field(handle, "names", &["a".to_string(), "b".to_string()]).expect("string list");

    let kind_of = |host: &mut ManagedRuntimeHost, method: &str| {
        host.invoke_method(handle, method, &[]).and_then(|value| value.into_string().ok())
    };
    assert_eq!(kind_of(&mut host, "ScoreKind").as_deref(), Some("List"));
    assert_eq!(kind_of(&mut host, "WeightKind").as_deref(), Some("array"));
    assert_eq!(host.invoke_method(handle, "ScoreTotal", &[]).and_then(|value| value.as_int().ok()), Some(6));

    assert_eq!(host.get_sequence_field::<i32>(handle, "scores"), Ok(vec![1, 2, 3]));
    assert_eq!(host.get_sequence_field::<f32>(handle, "weights"), Ok(vec![0.5, 1.5]));
    assert_eq!(
        host.get_sequence_field::<String>(handle, "names"),
        Ok(vec!["a".to_string(), "b".to_string()])
    );
    assert!(matches!(
        host.set_sequence_field(handle, "scores", &[true]),
        Err(ScriptError::TypeMismatch { .. })
    ));
}

#[test]
fn unsupported_element_kinds_are_rejected() {
    let assembly = TestAssembly::new(&[("Game.Shapes", SHAPES)]);
    let mut host = host_for(&assembly, limits());
    let handle = host.instantiate("Game", "Shapes").expect("instance");
    assert_eq!(host.set_sequence_field(handle, "ids", &[1_i64]), Err(ScriptError::Unsupported("long".into())));
    assert_eq!(host.set_sequence_field(handle, "blobs", &[1_i32]), Err(ScriptError::Unsupported("Thing".into())));
    assert_eq!(host.array_marshal(&[1_i64, 2]).err(), Some(ScriptError::Unsupported("long".into())));
    assert!(host.list_marshal(&[EntityRef(4)]).is_ok());
}

#[test]
fn pools_stay_disjoint() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    let mut host = host_for(&assembly, limits());
    let transient = host.instantiate("Game", "Enemy").expect("transient");
    let lifetime = host.instantiate_lifetime("Game", "Enemy").expect("lifetime");
    assert_ne!(transient, lifetime);
    assert_eq!(host.pool_of(transient), Some(PoolKind::Transient));
    assert_eq!(host.pool_of(lifetime), Some(PoolKind::Lifetime));
    let stats = host.stats();
    assert_eq!((stats.transient_handles, stats.lifetime_handles), (1, 1));
    assert!(host.release(lifetime));
    assert!(!host.release(lifetime));
    assert_eq!(host.pool_of(lifetime), None);
}

#[test]
fn collector_reclaims_transient_objects_after_finalizing() {
    let assembly = TestAssembly::new(&[("Game.Mortal", MORTAL)]);
    let mut host = host_for(&assembly, limits());
    let mortal = host.instantiate("Game", "Mortal").expect("transient");
    let keeper = host.instantiate_lifetime("Game", "Mortal").expect("lifetime");

    assert_eq!(host.collect_garbage(), 0, "first pass only finalizes");
    assert!(host.is_alive(mortal));
    assert_eq!(host.collect_garbage(), 1);
    assert!(!host.is_alive(mortal));
    assert!(host.is_alive(keeper));

    assert_eq!(host.stats().transient_handles, 1);
    assert_eq!(host.sweep_stale_handles(), 1);
    assert_eq!(host.stats().transient_handles, 0);
    assert_eq!(host.stats().lifetime_handles, 1);
}

#[test]
fn hard_cap_collects_before_degrading() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    let mut host = host_for(&assembly, HandlePoolConfig { high_water_mark: 2, hard_cap: 3 });
    let first = host.instantiate("Game", "Enemy").expect("first");
    host.instantiate("Game", "Enemy").expect("second");
    let third = host.instantiate("Game", "Enemy").expect("third");
    assert!(!host.is_degraded());
    assert!(!host.is_alive(first));
    assert!(host.is_alive(third));
    assert_eq!(host.stats().transient_handles, 1);
}

#[test]
fn pinned_objects_at_the_hard_cap_degrade_the_runtime() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    let mut host = host_for(&assembly, HandlePoolConfig { high_water_mark: 2, hard_cap: 3 });
    let pinned: Vec<_> =
        (0..3).map(|_| host.instantiate_lifetime("Game", "Enemy").expect("lifetime instance")).collect();
    assert!(host.is_degraded());
    assert!(host.stats().degraded);
    for handle in pinned {
        host.release(handle);
    }
    host.sweep_stale_handles();
    assert!(!host.is_degraded());
}

#[test]
fn unload_releases_everything_and_invalidates_old_handles() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY), ("Game.Mortal", MORTAL)]);
    let mut host = host_for(&assembly, limits());
    let enemy = host.instantiate_lifetime("Game", "Enemy").expect("lifetime");
    host.instantiate("Game", "Mortal").expect("transient");
    host.unload();
    let stats = host.stats();
    assert!(!stats.ready);
    assert_eq!((stats.transient_handles, stats.lifetime_handles, stats.live_objects), (0, 0, 0));

    assert!(host.reload());
    assert!(!host.is_alive(enemy));
    let fresh = host.instantiate("Game", "Enemy").expect("fresh instance");
    assert_ne!(fresh, enemy);
}

#[test]
fn diagnostics_list_types_and_heap() {
    let assembly = TestAssembly::new(&[("Game.Enemy", ENEMY)]);
    let mut host = host_for(&assembly, limits());
    host.instantiate("Game", "Enemy").expect("instance");
    assert!(host.dump_types().iter().any(|line| line.starts_with("Game.Enemy")));
    let heap = host.dump_heap();
    assert_eq!(heap.len(), 1);
    assert!(heap[0].contains("transient"));
}
