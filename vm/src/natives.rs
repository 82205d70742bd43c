//! Built-in native functions, installed into the globals table at VM
//! construction. Mirrors the shape of the donor's `src/natives.rs` catalogue,
//! trimmed to the natives this language actually has use for: `clock`
//! (distilled contract) plus `type_of`, carried over from the donor's `نوع`.

use std::sync::OnceLock;
use std::time::Instant;
use vmcore::value::Value;

/// `NativeFn` is a bare function pointer with no captured state, so there is
/// nowhere to stash the instant the VM itself started. Lazily latching the
/// first call's instant is the closest a free function can get to "since
/// process start" — near enough for anything that diffs two `clock()` calls.
fn process_start() -> &'static Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now)
}

pub fn clock(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(process_start().elapsed().as_secs_f64()))
}

pub fn type_of(args: &[Value]) -> Result<Value, String> {
    let value = args.first().ok_or_else(|| "Expected 1 argument but got 0.".to_string())?;
    // Returned as a plain Rust `&'static str`; the VM re-interns it before
    // pushing so the result still satisfies the intern-table identity
    // invariant (see `Vm::call_native`).
    Ok(Value::Obj(vmcore::object::Obj::Str(std::rc::Rc::from(value.type_name()))))
}

pub const NATIVES: &[(&str, u8, vmcore::object::NativeFn)] = &[("clock", 0, clock), ("type_of", 1, type_of)];
