#![forbid(unsafe_code)]

//! Deep read used by `deep` watchers.

use ahash::AHashSet;

use crate::value::Value;

/// Read every nested field of `value` so the evaluating computation depends
/// on all of them.
///
/// Each container is visited once, which also terminates cycles.
/// Non-extensible containers are skipped.
pub fn traverse(value: &Value) {
    let mut seen = AHashSet::new();
    visit(value, &mut seen);
}

fn visit(value: &Value, seen: &mut AHashSet<usize>) {
    match value {
        Value::Object(obj) => {
            if !obj.is_extensible() || !seen.insert(obj.addr()) {
                return;
            }
            for key in obj.keys().iter().rev() {
                visit(&obj.get(key), seen);
            }
        }
        Value::Array(arr) => {
            if !arr.is_extensible() || !seen.insert(arr.addr()) {
                return;
            }
            for item in arr.to_vec().iter().rev() {
                visit(item, seen);
            }
        }
        _ => {}
    }
}
