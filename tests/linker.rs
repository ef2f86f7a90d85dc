//! Instantiation and linking: unresolved imports leave no allocation
//! behind, signatures match exactly, prior instances' exports resolve
//! first, and argument mismatches are arity errors rather than traps.

use std::sync::{Arc, Mutex};

use waxel::{
    FuncType, HostRegistry, InstantiateError, InvokeError, LinkError, Module, NoSuchExportError,
    Store, StoreConfig, ValType, Value,
};

fn load(wat_src: &str) -> Arc<Module> {
    let bytes = wat::parse_str(wat_src).unwrap();
    waxel::load_module(&bytes).unwrap()
}

#[test]
fn unresolved_import_allocates_nothing() {
    let module = load(
        r#"
        (module
          (import "env" "missing" (func $m))
          (memory 4)
          (table 8 funcref)
          (global (mut i32) (i32.const 0))
          (func (export "f") call $m))
        "#,
    );

    let registry = HostRegistry::new();
    let mut store = Store::new(StoreConfig::default());
    let before = store.object_counts();

    let err = waxel::instantiate(&mut store, module, &registry, &[]).unwrap_err();
    assert!(matches!(
        err,
        InstantiateError::Link(LinkError::UnresolvedImport { .. })
    ));
    assert_eq!(store.object_counts(), before);
}

#[test]
fn import_signature_must_match_exactly() {
    let module = load(
        r#"
        (module
          (import "env" "echo" (func $echo (param i32)))
          (func (export "f") i32.const 0 call $echo))
        "#,
    );

    // registered under the right name, wrong parameter type
    let mut registry = HostRegistry::new();
    registry
        .register(
            "env",
            "echo",
            FuncType::new(vec![ValType::F32], vec![]),
            |_| Ok(vec![]),
        )
        .unwrap();

    let mut store = Store::new(StoreConfig::default());
    let before = store.object_counts();
    let err = waxel::instantiate(&mut store, module, &registry, &[]).unwrap_err();
    assert!(matches!(
        err,
        InstantiateError::Link(LinkError::ImportSignatureMismatch { .. })
    ));
    assert_eq!(store.object_counts(), before);
}

#[test]
fn prior_instance_exports_resolve_function_imports() {
    let provider = load(
        r#"
        (module (func (export "f") (result i32) i32.const 5))
        "#,
    );
    let consumer = load(
        r#"
        (module
          (import "a" "f" (func $f (result i32)))
          (func (export "g") (result i32)
            call $f
            i32.const 1
            i32.add))
        "#,
    );

    let registry = HostRegistry::new();
    let mut store = Store::new(StoreConfig::default());
    let a = waxel::instantiate(&mut store, provider, &registry, &[]).unwrap();
    let b = waxel::instantiate(&mut store, consumer, &registry, &[a]).unwrap();

    assert_eq!(
        waxel::invoke(&mut store, b, "g", &[]).unwrap(),
        vec![Value::I32(6)]
    );
}

#[test]
fn imported_memory_is_shared_between_instances() {
    let provider = load(
        r#"
        (module
          (memory (export "mem") 1)
          (func (export "read") (result i32) i32.const 0 i32.load))
        "#,
    );
    let writer = load(
        r#"
        (module
          (import "x" "mem" (memory 1))
          (func (export "write") i32.const 0 i32.const 42 i32.store))
        "#,
    );

    let registry = HostRegistry::new();
    let mut store = Store::new(StoreConfig::default());
    let a = waxel::instantiate(&mut store, provider, &registry, &[]).unwrap();
    let b = waxel::instantiate(&mut store, writer, &registry, &[a]).unwrap();

    waxel::invoke(&mut store, b, "write", &[]).unwrap();
    assert_eq!(
        waxel::invoke(&mut store, a, "read", &[]).unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn start_function_runs_exactly_once() {
    let module = load(
        r#"
        (module
          (import "env" "note" (func $note))
          (start $go)
          (func $go call $note))
        "#,
    );

    let count = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&count);
    let mut registry = HostRegistry::new();
    registry
        .register("env", "note", FuncType::new(vec![], vec![]), move |_| {
            *sink.lock().unwrap() += 1;
            Ok(vec![])
        })
        .unwrap();

    let mut store = Store::new(StoreConfig::default());
    waxel::instantiate(&mut store, module, &registry, &[]).unwrap();
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn trapping_start_function_fails_instantiation() {
    let module = load(
        r#"
        (module
          (start $go)
          (func $go unreachable))
        "#,
    );

    let registry = HostRegistry::new();
    let mut store = Store::new(StoreConfig::default());
    let err = waxel::instantiate(&mut store, module, &registry, &[]).unwrap_err();
    assert!(matches!(err, InstantiateError::StartTrap(_)));
}

#[test]
fn argument_mismatches_are_arity_errors_never_traps() {
    let module = load(
        r#"
        (module
          (func (export "add") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.add))
        "#,
    );

    let registry = HostRegistry::new();
    let mut store = Store::new(StoreConfig::default());
    let instance = waxel::instantiate(&mut store, module, &registry, &[]).unwrap();

    // wrong count
    let err = waxel::invoke(&mut store, instance, "add", &[Value::I32(1)]).unwrap_err();
    assert!(matches!(err, InvokeError::Arity(_)));

    // right count, wrong type
    let err = waxel::invoke(
        &mut store,
        instance,
        "add",
        &[Value::I32(1), Value::from_f32(2.0)],
    )
    .unwrap_err();
    assert!(matches!(err, InvokeError::Arity(_)));

    // the instance is untouched and still callable
    assert_eq!(
        waxel::invoke(&mut store, instance, "add", &[Value::I32(1), Value::I32(2)]).unwrap(),
        vec![Value::I32(3)]
    );
}

#[test]
fn export_lookup_failures() {
    let module = load(
        r#"
        (module
          (memory (export "mem") 1)
          (func (export "f")))
        "#,
    );

    let registry = HostRegistry::new();
    let mut store = Store::new(StoreConfig::default());
    let instance = waxel::instantiate(&mut store, module, &registry, &[]).unwrap();

    assert!(matches!(
        waxel::get_export(&store, instance, "nope"),
        Err(NoSuchExportError { .. })
    ));
    assert!(matches!(
        waxel::invoke(&mut store, instance, "mem", &[]),
        Err(InvokeError::NotAFunction { .. })
    ));
    // a function handle from get_export is directly callable
    let func = waxel::get_export(&store, instance, "f")
        .unwrap()
        .as_func()
        .unwrap();
    assert!(waxel::call(&mut store, func, &[]).unwrap().is_empty());
}
