//! Host library namespaces.
//!
//! The [`Library`] is built once at service start and shared read-only by
//! every execution. Scripts reach it only through `import`, and only for the
//! module paths the capability policy admits. Arrays are plain lists: every
//! function accepts any iterable and returns fresh list values.

mod numpy;
mod pandas;
mod scipy;
#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::error::Fault;
use super::interp::{Interpreter, Stream};
use super::value::{CallArgs, NativeFn, Value};

// =============================================================================
// Types
// =============================================================================

/// A host function exposed under a qualified name such as `numpy.mean`.
pub struct NativeFunction {
    pub name: String,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Member {
    Function(Arc<NativeFunction>),
    Constant(f64),
    Module(Arc<LibraryModule>),
}

/// One importable namespace.
#[derive(Debug)]
pub struct LibraryModule {
    pub name: String,
    members: IndexMap<&'static str, Member>,
}

impl LibraryModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: IndexMap::new(),
        }
    }

    pub fn function(mut self, name: &'static str, func: NativeFn) -> Self {
        let qualified = format!("{}.{}", self.name, name);
        self.members.insert(
            name,
            Member::Function(Arc::new(NativeFunction {
                name: qualified,
                func,
            })),
        );
        self
    }

    pub fn constant(mut self, name: &'static str, value: f64) -> Self {
        self.members.insert(name, Member::Constant(value));
        self
    }

    pub fn submodule(mut self, name: &'static str, module: Arc<LibraryModule>) -> Self {
        self.members.insert(name, Member::Module(module));
        self
    }

    /// Script-visible value for attribute `name`, if the module defines it.
    pub fn member(&self, name: &str) -> Option<Value> {
        self.members.get(name).map(|member| match member {
            Member::Function(func) => Value::Native(Arc::clone(func)),
            Member::Constant(value) => Value::Float(*value),
            Member::Module(module) => Value::Module(Arc::clone(module)),
        })
    }

    pub fn member_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.members.keys().copied()
    }
}

/// Immutable table of importable modules, keyed by dotted path.
#[derive(Debug, Default)]
pub struct Library {
    modules: HashMap<String, Arc<LibraryModule>>,
}

impl Library {
    /// numpy, pandas and scipy (with `scipy.stats` and `scipy.signal`).
    pub fn standard() -> Self {
        let stats = Arc::new(scipy::stats());
        let signal = Arc::new(scipy::signal());
        let scipy = Arc::new(
            LibraryModule::new("scipy")
                .submodule("stats", Arc::clone(&stats))
                .submodule("signal", Arc::clone(&signal)),
        );

        let mut library = Self::default();
        library.register(Arc::new(numpy::module()));
        library.register(Arc::new(pandas::module()));
        library.register(scipy);
        library.register(stats);
        library.register(signal);
        library
    }

    pub fn register(&mut self, module: Arc<LibraryModule>) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn module(&self, path: &str) -> Option<Arc<LibraryModule>> {
        self.modules.get(path).cloned()
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

// =============================================================================
// Shared numeric helpers
// =============================================================================

/// Numeric view of one element. `None` reads as NaN, like a missing cell.
pub(crate) fn element_f64(value: &Value, func: &str) -> Result<f64, Fault> {
    match value {
        Value::None => Ok(f64::NAN),
        v => v.as_f64().ok_or_else(|| {
            Fault::type_error(format!(
                "{}() expected numeric data, got '{}'",
                func,
                v.type_name()
            ))
        }),
    }
}

/// Materialise an iterable (or a lone scalar) into floats.
pub(crate) fn floats(
    interp: &mut Interpreter,
    value: &Value,
    func: &str,
) -> Result<Vec<f64>, Fault> {
    if !is_sequence(value) {
        return Ok(vec![element_f64(value, func)?]);
    }
    let items = interp.iterate(value)?;
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        interp.tick()?;
        out.push(element_f64(item, func)?);
    }
    Ok(out)
}

pub(crate) fn float_list(interp: &mut Interpreter, values: Vec<f64>) -> Result<Value, Fault> {
    interp.new_list(values.into_iter().map(Value::Float).collect())
}

pub(crate) fn is_sequence(value: &Value) -> bool {
    matches!(value, Value::List(_) | Value::Range(_))
}

/// Apply `f` to a scalar, or to every element of a sequence.
pub(crate) fn elementwise(
    interp: &mut Interpreter,
    value: &Value,
    f: impl Fn(&Value) -> Result<Value, Fault>,
) -> Result<Value, Fault> {
    if !is_sequence(value) {
        return f(value);
    }
    let items = interp.iterate(value)?;
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        interp.tick()?;
        out.push(f(item)?);
    }
    interp.new_list(out)
}

/// Emit a numpy-style warning on the captured stderr stream.
pub(crate) fn warn(interp: &Interpreter, message: &str) -> Result<(), Fault> {
    interp.write(Stream::Stderr, &format!("RuntimeWarning: {}\n", message))
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn variance(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - ddof) as f64
}

/// Median of a non-empty slice; NaN if any element is NaN.
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.iter().any(|x| x.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Optional integer argument, positional or keyword.
pub(crate) fn int_option(
    args: &CallArgs,
    index: usize,
    name: &str,
    default: i64,
) -> Result<i64, Fault> {
    match args.get(index, name) {
        None | Some(Value::None) => Ok(default),
        Some(Value::Int(i)) => Ok(*i),
        Some(other) => Err(Fault::type_error(format!(
            "'{}' must be an integer, not {}",
            name,
            other.type_name()
        ))),
    }
}

/// Optional string argument, positional or keyword.
pub(crate) fn str_option<'a>(
    args: &'a CallArgs,
    index: usize,
    name: &str,
    default: &'a str,
) -> Result<&'a str, Fault> {
    match args.get(index, name) {
        None | Some(Value::None) => Ok(default),
        Some(Value::Str(s)) => Ok(s.as_ref()),
        Some(other) => Err(Fault::type_error(format!(
            "'{}' must be a string, not {}",
            name,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_library_paths() {
        let library = Library::standard();
        for path in ["numpy", "pandas", "scipy", "scipy.stats", "scipy.signal"] {
            assert!(library.module(path).is_some(), "{} missing", path);
        }
        assert!(library.module("os").is_none());
        assert!(library.module("np").is_none());
    }

    #[test]
    fn test_member_values() {
        let library = Library::standard();
        let numpy = library.module("numpy").unwrap();
        assert!(matches!(numpy.member("pi"), Some(Value::Float(f)) if (f - std::f64::consts::PI).abs() < 1e-12));
        match numpy.member("mean") {
            Some(Value::Native(func)) => assert_eq!(func.name, "numpy.mean"),
            other => panic!("unexpected member {:?}", other),
        }
        assert!(numpy.member("load").is_none());

        let scipy = library.module("scipy").unwrap();
        assert!(matches!(scipy.member("stats"), Some(Value::Module(m)) if m.name == "scipy.stats"));
    }

    #[test]
    fn test_median_and_variance() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[1.0, f64::NAN]).is_nan());
        assert_eq!(variance(&[1.0, 2.0, 3.0, 4.0], 0), 1.25);
        assert!(variance(&[1.0], 1).is_nan());
    }
}
