use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;
use crate::vm::Vm;

/// Funzioni native registrate nell'ambiente globale alla costruzione
/// della VM. L'arietà è verificata dalla VM prima della chiamata.
pub fn register_natives(vm: &mut Vm) {
    vm.define_native("relogiu", 0, native_relogiu);
    vm.define_native("absolutu", 1, native_absolutu);
}

/// Secondi dall'epoca Unix, come numero.
fn native_relogiu(_args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(now.as_secs_f64()))
}

fn native_absolutu(args: &[Value]) -> Result<Value, String> {
    match args[0] {
        Value::Number(n) => Ok(Value::Number(n.abs())),
        ref other => Err(format!("absolutu: expected a number, got {}.", other.type_name())),
    }
}
