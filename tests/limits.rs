//! Resource limits: call depth, fuel, and memory bounds. Traps abort the
//! current call only; the store stays usable afterwards.

use std::sync::Arc;

use waxel::{
    HostRegistry, InvokeError, Module, Store, StoreConfig, Trap, Value, PAGE_SIZE,
};

fn load(wat_src: &str) -> Arc<Module> {
    let bytes = wat::parse_str(wat_src).unwrap();
    waxel::load_module(&bytes).unwrap()
}

fn instantiate(store: &mut Store, module: Arc<Module>) -> waxel::InstanceHandle {
    let registry = HostRegistry::new();
    waxel::instantiate(store, module, &registry, &[]).unwrap()
}

const COUNTDOWN: &str = r#"
(module
  (func $f (export "f") (param i32)
    local.get 0
    i32.const 1
    i32.gt_s
    if
      local.get 0
      i32.const 1
      i32.sub
      call $f
    end))
"#;

#[test]
fn call_depth_limit_is_exact() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut store = Store::new(StoreConfig {
        max_call_depth: 8,
        fuel: None,
    });
    let instance = instantiate(&mut store, load(COUNTDOWN));

    // f(n) occupies n frames: the limit itself succeeds
    waxel::invoke(&mut store, instance, "f", &[Value::I32(8)]).unwrap();

    // one past the limit traps
    let err = waxel::invoke(&mut store, instance, "f", &[Value::I32(9)]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::StackOverflow)));

    // the trap did not poison the store
    waxel::invoke(&mut store, instance, "f", &[Value::I32(3)]).unwrap();
}

#[test]
fn unbounded_recursion_traps_instead_of_crashing() {
    let module = load(
        r#"
        (module (func $r (export "r") call $r))
        "#,
    );
    let mut store = Store::new(StoreConfig::default());
    let instance = instantiate(&mut store, module);

    let err = waxel::invoke(&mut store, instance, "r", &[]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::StackOverflow)));
}

#[test]
fn fuel_exhaustion_interrupts_an_infinite_loop() {
    let module = load(
        r#"
        (module
          (func (export "spin")
            loop
              br 0
            end)
          (func (export "pure") (result i32) i32.const 3))
        "#,
    );
    let mut store = Store::new(StoreConfig {
        max_call_depth: 1024,
        fuel: Some(10_000),
    });
    let instance = instantiate(&mut store, module);

    let err = waxel::invoke(&mut store, instance, "spin", &[]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::OutOfFuel)));
    assert_eq!(store.fuel(), Some(0));

    // refuelling makes the same store usable again
    store.set_fuel(Some(100));
    assert_eq!(
        waxel::invoke(&mut store, instance, "pure", &[]).unwrap(),
        vec![Value::I32(3)]
    );
    assert!(store.fuel().unwrap() < 100);
}

#[test]
fn unmetered_store_never_burns_fuel() {
    let module = load(r#"(module (func (export "f") (result i32) i32.const 1))"#);
    let mut store = Store::new(StoreConfig::default());
    let instance = instantiate(&mut store, module);

    waxel::invoke(&mut store, instance, "f", &[]).unwrap();
    assert_eq!(store.fuel(), None);
}

#[test]
fn memory_access_at_the_page_edge() {
    let module = load(
        r#"
        (module
          (memory 1)
          (func (export "poke") (param i32)
            local.get 0
            i32.const 42
            i32.store))
        "#,
    );
    let mut store = Store::new(StoreConfig::default());
    let instance = instantiate(&mut store, module);

    let edge = PAGE_SIZE as i32;

    // last in-bounds 4-byte slot
    waxel::invoke(&mut store, instance, "poke", &[Value::I32(edge - 4)]).unwrap();

    // first byte past the page
    let err = waxel::invoke(&mut store, instance, "poke", &[Value::I32(edge)]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::MemoryOutOfBounds)));

    // straddling the boundary also traps
    let err = waxel::invoke(&mut store, instance, "poke", &[Value::I32(edge - 3)]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::MemoryOutOfBounds)));

    // the instance survives the trap
    waxel::invoke(&mut store, instance, "poke", &[Value::I32(0)]).unwrap();
}

#[test]
fn memory_grow_is_bounded_by_the_declared_maximum() {
    let module = load(
        r#"
        (module
          (memory 1 2)
          (func (export "grow") (param i32) (result i32)
            local.get 0
            memory.grow)
          (func (export "size") (result i32) memory.size))
        "#,
    );
    let mut store = Store::new(StoreConfig::default());
    let instance = instantiate(&mut store, module);

    assert_eq!(
        waxel::invoke(&mut store, instance, "grow", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(
        waxel::invoke(&mut store, instance, "size", &[]).unwrap(),
        vec![Value::I32(2)]
    );
    assert_eq!(
        waxel::invoke(&mut store, instance, "grow", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(-1)]
    );
}

#[test]
fn integer_division_traps_by_kind() {
    let module = load(
        r#"
        (module
          (func (export "div_s") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.div_s)
          (func (export "div_u") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.div_u))
        "#,
    );
    let mut store = Store::new(StoreConfig::default());
    let instance = instantiate(&mut store, module);

    let err = waxel::invoke(&mut store, instance, "div_s", &[Value::I32(1), Value::I32(0)])
        .unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::IntegerDivideByZero)));

    let err = waxel::invoke(
        &mut store,
        instance,
        "div_s",
        &[Value::I32(i32::MIN), Value::I32(-1)],
    )
    .unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::IntegerOverflow)));

    let err = waxel::invoke(&mut store, instance, "div_u", &[Value::I32(7), Value::I32(0)])
        .unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::IntegerDivideByZero)));

    assert_eq!(
        waxel::invoke(&mut store, instance, "div_s", &[Value::I32(-7), Value::I32(2)]).unwrap(),
        vec![Value::I32(-3)]
    );
}

#[test]
fn unreachable_traps() {
    let module = load(r#"(module (func (export "boom") unreachable))"#);
    let mut store = Store::new(StoreConfig::default());
    let instance = instantiate(&mut store, module);

    let err = waxel::invoke(&mut store, instance, "boom", &[]).unwrap_err();
    assert!(matches!(err, InvokeError::Trap(Trap::Unreachable)));
}
