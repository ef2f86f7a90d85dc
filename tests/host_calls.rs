//! Host import scenarios: callbacks observing module-supplied values,
//! host results flowing back into module code, and host failures
//! surfacing as traps.

use std::sync::{Arc, Mutex};

use waxel::{
    FuncType, HostError, HostRegistry, InvokeError, Module, Store, StoreConfig, Trap, ValType,
    Value,
};

fn load(wat_src: &str) -> Arc<Module> {
    let bytes = wat::parse_str(wat_src).unwrap();
    waxel::load_module(&bytes).unwrap()
}

#[test]
fn echo_records_each_call_in_order() {
    let _ = env_logger::builder().is_test(true).try_init();

    let module = load(
        r#"
        (module
          (import "env" "echo" (func $echo (param f32)))
          (func (export "main")
            f32.const 1
            call $echo
            f32.const 2
            call $echo))
        "#,
    );

    let recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&recorded);
    let mut registry = HostRegistry::new();
    registry
        .register(
            "env",
            "echo",
            FuncType::new(vec![ValType::F32], vec![]),
            move |args| {
                sink.lock().unwrap().push(args[0].as_f32().unwrap());
                Ok(vec![])
            },
        )
        .unwrap();

    let mut store = Store::new(StoreConfig::default());
    let instance = waxel::instantiate(&mut store, module, &registry, &[]).unwrap();

    let results = waxel::invoke(&mut store, instance, "main", &[]).unwrap();
    assert!(results.is_empty());
    assert_eq!(*recorded.lock().unwrap(), vec![1.0f32, 2.0]);
}

#[test]
fn host_result_feeds_module_arithmetic() {
    let module = load(
        r#"
        (module
          (import "env" "magic" (func $magic (result i32)))
          (export "magic" (func $magic))
          (func (export "plus1") (result i32)
            call $magic
            i32.const 1
            i32.add))
        "#,
    );

    let mut registry = HostRegistry::new();
    registry
        .register(
            "env",
            "magic",
            FuncType::new(vec![], vec![ValType::I32]),
            |_| Ok(vec![Value::I32(41)]),
        )
        .unwrap();

    let mut store = Store::new(StoreConfig::default());
    let instance = waxel::instantiate(&mut store, module, &registry, &[]).unwrap();

    assert_eq!(
        waxel::invoke(&mut store, instance, "plus1", &[]).unwrap(),
        vec![Value::I32(42)]
    );
    // a re-exported host function is callable straight from the embedder
    assert_eq!(
        waxel::invoke(&mut store, instance, "magic", &[]).unwrap(),
        vec![Value::I32(41)]
    );
}

#[test]
fn host_failure_surfaces_as_host_trap() {
    let module = load(
        r#"
        (module
          (import "env" "fail" (func $fail))
          (func (export "main") call $fail))
        "#,
    );

    let mut registry = HostRegistry::new();
    registry
        .register("env", "fail", FuncType::new(vec![], vec![]), |_| {
            Err(HostError::msg("device unplugged"))
        })
        .unwrap();

    let mut store = Store::new(StoreConfig::default());
    let instance = waxel::instantiate(&mut store, module, &registry, &[]).unwrap();

    let err = waxel::invoke(&mut store, instance, "main", &[]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::Host(_))));
}

#[test]
fn mistyped_host_results_trap_instead_of_corrupting_the_stack() {
    let module = load(
        r#"
        (module
          (import "env" "nop" (func $nop))
          (func (export "main") call $nop))
        "#,
    );

    // declared () -> () but returns a value
    let mut registry = HostRegistry::new();
    registry
        .register("env", "nop", FuncType::new(vec![], vec![]), |_| {
            Ok(vec![Value::I32(1)])
        })
        .unwrap();

    let mut store = Store::new(StoreConfig::default());
    let instance = waxel::instantiate(&mut store, module, &registry, &[]).unwrap();

    let err = waxel::invoke(&mut store, instance, "main", &[]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::Host(_))));
}
