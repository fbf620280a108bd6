#![forbid(unsafe_code)]

//! Dot-delimited watch paths such as `"user.address.city"`.

use std::rc::Rc;

use crate::value::Value;

/// A parsed path. Resolving it reads each segment through the normal
/// (tracked) field access, so a watcher evaluating a path depends on every
/// field along it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGetter {
    segments: Vec<Rc<str>>,
}

impl PathGetter {
    /// Parse `path`. Returns `None` if it contains anything other than ASCII
    /// word characters, `.` and `$`.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let valid = path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'));
        if !valid {
            return None;
        }
        Some(Self {
            segments: path.split('.').map(Rc::from).collect(),
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[Rc<str>] {
        &self.segments
    }

    /// Walk the path from `root`. Yields `Null` as soon as a segment cannot
    /// be resolved.
    #[must_use]
    pub fn resolve(&self, root: &Value) -> Value {
        let mut current = root.clone();
        for segment in &self.segments {
            current = match &current {
                Value::Object(obj) => obj.get(segment),
                Value::Array(arr) => match &**segment {
                    "length" => Value::from(arr.len() as f64),
                    index => index
                        .parse::<usize>()
                        .map_or(Value::Null, |i| arr.get(i)),
                },
                Value::Str(s) if &**segment == "length" => {
                    Value::from(s.chars().count() as f64)
                }
                _ => return Value::Null,
            };
        }
        current
    }
}
