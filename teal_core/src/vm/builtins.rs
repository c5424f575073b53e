use crate::value::Value;

use super::machine::MachineError;

/// Names resolvable as functions without a compiled definition.
pub const BUILTINS: &[&str] = &["list", "hash", "print"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Invoke a builtin. `output` collects text written by `print`.
pub fn invoke_builtin(
    name: &str,
    args: Vec<Value>,
    output: &mut Vec<String>,
) -> Result<Value, MachineError> {
    match name {
        "list" => Ok(Value::List(args)),
        "hash" => {
            if args.len() % 2 != 0 {
                return Err(MachineError::TypeMismatch(format!(
                    "hash expects key/value pairs, got {} argument(s)",
                    args.len()
                )));
            }
            let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(args.len() / 2);
            let mut iter = args.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                match pairs.iter_mut().find(|(existing, _)| *existing == key) {
                    Some(slot) => slot.1 = value,
                    None => pairs.push((key, value)),
                }
            }
            Ok(Value::Hash(pairs))
        }
        "print" => {
            let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
            output.push(rendered.join(" "));
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        }
        other => Err(MachineError::UnknownFunction(other.to_string())),
    }
}
