//! Runtime values.
//!
//! Lists and dicts are shared, mutable references (`Rc<RefCell<..>>`) so that
//! aliasing behaves like the scripting language users expect. Every container
//! is allocated through a [`Heap`], which lets teardown break reference cycles
//! a script may have built, and charges its slots against the execution's
//! element budget.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::IndexMap;

use super::ast::FunctionDef;
use super::error::Fault;
use super::interp::{Interpreter, Scope};
use super::library::{LibraryModule, NativeFunction};

pub type ListRef = Rc<RefCell<Contents<Vec<Value>>>>;
pub type DictRef = Rc<RefCell<Contents<IndexMap<Key, Value>>>>;

/// Signature shared by builtins, methods and library functions.
pub type NativeFn = fn(&mut Interpreter, CallArgs) -> Result<Value, Fault>;

/// Containers nested deeper than this are refused by repr, comparison and
/// JSON conversion.
pub const MAX_NESTING: usize = 512;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Dict(DictRef),
    Range(Range),
    Function(Rc<Function>),
    Builtin(&'static Builtin),
    Method(Rc<BoundMethod>),
    Native(Arc<NativeFunction>),
    Module(Arc<LibraryModule>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Script-defined function or lambda.
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// Evaluated default values, aligned with the trailing parameters.
    pub defaults: Vec<Value>,
    /// Enclosing local scope; `None` for module-level definitions.
    pub closure: Option<Rc<Scope>>,
}

pub struct Builtin {
    pub name: &'static str,
    pub func: NativeFn,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            (self.stop as i128) - (self.start as i128)
        } else {
            (self.start as i128) - (self.stop as i128)
        };
        if span <= 0 {
            return 0;
        }
        let step = (self.step as i128).abs();
        ((span + step - 1) / step) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = (self.start as i128) + (index as i128) * (self.step as i128);
        i64::try_from(value).ok()
    }
}

/// Hashable dict key. `True`/`False` are the same key as `1`/`0`; the key
/// stored first keeps its spelling.
#[derive(Debug, Clone)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
}

impl Key {
    fn canonical(&self) -> CanonicalKey<'_> {
        match self {
            Key::None => CanonicalKey::None,
            Key::Bool(b) => CanonicalKey::Int(i64::from(*b)),
            Key::Int(i) => CanonicalKey::Int(*i),
            Key::Str(s) => CanonicalKey::Str(s),
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
enum CanonicalKey<'a> {
    None,
    Int(i64),
    Str(&'a str),
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Key {}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl Key {
    pub fn from_value(value: &Value) -> Result<Key, Fault> {
        match value {
            Value::None => Ok(Key::None),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Int(i) => Ok(Key::Int(*i)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Key::Int(*f as i64)),
            other => Err(Fault::type_error(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::Str(s.clone()),
        }
    }

    fn json_name(&self) -> String {
        match self {
            Key::None => "null".to_string(),
            Key::Bool(b) => b.to_string(),
            Key::Int(i) => i.to_string(),
            Key::Str(s) => s.to_string(),
        }
    }
}

// =============================================================================
// Container storage
// =============================================================================

/// Element budget shared by every container of one execution.
#[derive(Debug)]
pub struct Meter {
    live: Cell<usize>,
    limit: usize,
}

impl Meter {
    fn new(limit: usize) -> Self {
        Self {
            live: Cell::new(0),
            limit,
        }
    }

    pub fn live(&self) -> usize {
        self.live.get()
    }

    fn admit(&self, slots: usize) -> Result<(), Fault> {
        let live = self.live.get().saturating_add(slots);
        if live > self.limit {
            return Err(Fault::LimitExceeded(format!(
                "memory limit of {} container elements exceeded",
                self.limit
            )));
        }
        self.live.set(live);
        Ok(())
    }

    fn charge(&self, slots: usize) {
        self.live.set(self.live.get().saturating_add(slots));
    }

    fn refund(&self, slots: usize) {
        self.live.set(self.live.get().saturating_sub(slots));
    }
}

/// Payload types a container can hold.
pub trait Slots: Default {
    fn slots(&self) -> usize;
    /// Move every contained value into `out`.
    fn drain_into(&mut self, out: &mut Vec<Value>);
}

impl Slots for Vec<Value> {
    fn slots(&self) -> usize {
        self.len()
    }

    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.append(self);
    }
}

impl Slots for IndexMap<Key, Value> {
    fn slots(&self) -> usize {
        self.len()
    }

    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.extend(self.drain(..).map(|(_, v)| v));
    }
}

/// Payload of a list or dict.
///
/// Slots are charged to the [`Meter`] at their high-water mark and refunded
/// when the container is dropped. Dropping releases nested containers with an
/// explicit worklist, so nesting depth never reaches the native stack.
pub struct Contents<T: Slots> {
    items: T,
    reserved: Cell<usize>,
    meter: Rc<Meter>,
}

impl<T: Slots> Contents<T> {
    /// Grow the reservation to `len` slots.
    pub fn reserve_slots(&self, len: usize) -> Result<(), Fault> {
        let reserved = self.reserved.get();
        if len > reserved {
            self.meter.admit(len - reserved)?;
            self.reserved.set(len);
        }
        Ok(())
    }
}

impl<T: Slots + fmt::Debug> fmt::Debug for Contents<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.items.fmt(f)
    }
}

impl<T: Slots> Deref for Contents<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.items
    }
}

impl<T: Slots> DerefMut for Contents<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.items
    }
}

impl<T: Slots> Drop for Contents<T> {
    fn drop(&mut self) {
        self.meter.refund(self.reserved.get());
        let mut pending = Vec::new();
        self.items.drain_into(&mut pending);
        while let Some(value) = pending.pop() {
            match value {
                Value::List(list) => release(list, &mut pending),
                Value::Dict(dict) => release(dict, &mut pending),
                Value::Method(method) => {
                    if let Ok(method) = Rc::try_unwrap(method) {
                        pending.push(method.receiver);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Empty a container about to be freed so its own drop stays shallow.
fn release<T: Slots>(cell: Rc<RefCell<Contents<T>>>, pending: &mut Vec<Value>) {
    if Rc::strong_count(&cell) != 1 {
        return;
    }
    let Ok(mut contents) = cell.try_borrow_mut() else {
        return;
    };
    contents.items.drain_into(pending);
}

// =============================================================================
// Heap
// =============================================================================

/// Tracks every container a script allocates so teardown can clear them.
pub struct Heap {
    lists: Vec<Weak<RefCell<Contents<Vec<Value>>>>>,
    dicts: Vec<Weak<RefCell<Contents<IndexMap<Key, Value>>>>>,
    scopes: Vec<Weak<Scope>>,
    meter: Rc<Meter>,
    compact_at: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Heap whose live containers may hold at most `limit` elements in total.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            lists: Vec::new(),
            dicts: Vec::new(),
            scopes: Vec::new(),
            meter: Rc::new(Meter::new(limit)),
            compact_at: 4096,
        }
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    fn contents<T: Slots>(&self, items: T) -> Rc<RefCell<Contents<T>>> {
        let slots = items.slots();
        Rc::new(RefCell::new(Contents {
            items,
            reserved: Cell::new(slots),
            meter: self.meter.clone(),
        }))
    }

    /// Allocate a list. Its slots are charged even past the budget; use
    /// [`Heap::try_list`] where the script controls the size.
    pub fn list(&mut self, items: Vec<Value>) -> Value {
        self.meter.charge(items.len());
        self.track_list(items)
    }

    pub fn dict(&mut self, map: IndexMap<Key, Value>) -> Value {
        self.meter.charge(map.len());
        self.track_dict(map)
    }

    pub fn try_list(&mut self, items: Vec<Value>) -> Result<Value, Fault> {
        self.meter.admit(items.len())?;
        Ok(self.track_list(items))
    }

    pub fn try_dict(&mut self, map: IndexMap<Key, Value>) -> Result<Value, Fault> {
        self.meter.admit(map.len())?;
        Ok(self.track_dict(map))
    }

    fn track_list(&mut self, items: Vec<Value>) -> Value {
        let list = self.contents(items);
        self.lists.push(Rc::downgrade(&list));
        self.maybe_compact();
        Value::List(list)
    }

    fn track_dict(&mut self, map: IndexMap<Key, Value>) -> Value {
        let dict = self.contents(map);
        self.dicts.push(Rc::downgrade(&dict));
        self.maybe_compact();
        Value::Dict(dict)
    }

    /// Remember a scope captured by a closure.
    pub fn track_scope(&mut self, scope: &Rc<Scope>) {
        if self
            .scopes
            .last()
            .map_or(false, |last| std::ptr::eq(last.as_ptr(), Rc::as_ptr(scope)))
        {
            return;
        }
        self.scopes.push(Rc::downgrade(scope));
        self.maybe_compact();
    }

    fn tracked(&self) -> usize {
        self.lists.len() + self.dicts.len() + self.scopes.len()
    }

    fn maybe_compact(&mut self) {
        if self.tracked() < self.compact_at {
            return;
        }
        self.lists.retain(|w| w.strong_count() > 0);
        self.dicts.retain(|w| w.strong_count() > 0);
        self.scopes.retain(|w| w.strong_count() > 0);
        self.compact_at = (self.tracked() * 2).max(4096);
    }

    /// Empty every live container and scope, releasing any cycles.
    pub fn sweep(&mut self) {
        for weak in self.scopes.drain(..) {
            if let Some(scope) = weak.upgrade() {
                scope.clear();
            }
        }
        for weak in self.lists.drain(..) {
            if let Some(list) = weak.upgrade() {
                let items = std::mem::take(&mut **list.borrow_mut());
                drop(items);
            }
        }
        for weak in self.dicts.drain(..) {
            if let Some(dict) = weak.upgrade() {
                let entries = std::mem::take(&mut **dict.borrow_mut());
                drop(entries);
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Call arguments
// =============================================================================

/// Evaluated arguments for a native call.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    /// Reject arity outside `min..=max` and any keyword not in `allowed`.
    pub fn check(&self, name: &str, min: usize, max: usize, allowed: &[&str]) -> Result<(), Fault> {
        let n = self.positional.len();
        if n < min || n > max {
            let (qualifier, count) = if min == max {
                ("exactly", min)
            } else if n < min {
                ("at least", min)
            } else {
                ("at most", max)
            };
            let noun = if count == 1 { "argument" } else { "arguments" };
            return Err(Fault::type_error(format!(
                "{}() takes {} {} {} ({} given)",
                name, qualifier, count, noun, n
            )));
        }
        for (key, _) in &self.keywords {
            if !allowed.contains(&key.as_str()) {
                return Err(Fault::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, key
                )));
            }
        }
        Ok(())
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Positional argument `index`, falling back to keyword `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.arg(index).or_else(|| self.keyword(name))
    }
}

// =============================================================================
// Behaviour
// =============================================================================

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::Native(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Module(_) => "module",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::Native(_)
        )
    }

    /// Numeric view used by arithmetic and the numeric library.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Identity comparison for `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural equality used by lookups (`in`, `index`, `count`). Values
    /// nested past [`MAX_NESTING`] compare unequal unless identical.
    pub fn py_eq(&self, other: &Value) -> bool {
        self.eq_at(other, 0).unwrap_or_else(|_| self.is_same(other))
    }

    /// `==`, raising `RecursionError` for values nested past [`MAX_NESTING`].
    pub fn try_eq(&self, other: &Value) -> Result<bool, Fault> {
        self.eq_at(other, 0)
    }

    fn eq_at(&self, other: &Value, depth: usize) -> Result<bool, Fault> {
        if depth > MAX_NESTING {
            return Err(too_deep("comparison"));
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.eq_at(y, depth + 1)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (k, v) in a.iter() {
                    match b.get(k) {
                        Some(other) if v.eq_at(other, depth + 1)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Value::Range(a), Value::Range(b)) => Ok(a == b),
            (Value::Int(a), Value::Int(b)) => Ok(a == b),
            (Value::None, Value::None) => Ok(true),
            (a, b) => Ok(match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.is_same(b),
            }),
        }
    }

    /// Ordering for `<` and friends. `Ok(None)` means unordered (NaN).
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>, Fault> {
        self.compare_at(other, 0)
    }

    fn compare_at(&self, other: &Value, depth: usize) -> Result<Option<Ordering>, Fault> {
        if depth > MAX_NESTING {
            return Err(too_deep("comparison"));
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(Some(Ordering::Equal));
                }
                let a = a.borrow().clone();
                let b = b.borrow().clone();
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.eq_at(y, depth + 1)? {
                        return x.compare_at(y, depth + 1);
                    }
                }
                Ok(Some(a.len().cmp(&b.len())))
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
                _ => Err(Fault::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    /// `repr()` text.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        Renderer::default().render(self, &mut out);
        out
    }

    /// `str()` text: strings render raw, everything else as `repr`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    // ===== JSON =====

    pub fn from_json(json: &serde_json::Value, heap: &mut Heap) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::str(s),
            serde_json::Value::Array(items) => {
                let items = items.iter().map(|v| Value::from_json(v, heap)).collect();
                heap.list(items)
            }
            serde_json::Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| (Key::Str(Rc::from(k.as_str())), Value::from_json(v, heap)))
                    .collect();
                heap.dict(entries)
            }
        }
    }

    /// Convert to JSON. NaN and infinities have no JSON form and are refused.
    pub fn to_json(&self) -> Result<serde_json::Value, JsonError> {
        let mut active = Vec::new();
        self.to_json_at(&mut active)
    }

    fn to_json_at(&self, active: &mut Vec<*const ()>) -> Result<serde_json::Value, JsonError> {
        use serde_json::Value as J;
        match self {
            Value::None => Ok(J::Null),
            Value::Bool(b) => Ok(J::Bool(*b)),
            Value::Int(i) => Ok(J::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .ok_or(JsonError::NonFinite),
            Value::Str(s) => Ok(J::String(s.to_string())),
            Value::List(list) => {
                let ptr = Rc::as_ptr(list) as *const ();
                enter(active, ptr)?;
                let items = list.borrow().clone();
                let out = items
                    .iter()
                    .map(|v| v.to_json_at(active))
                    .collect::<Result<Vec<_>, _>>();
                active.pop();
                Ok(J::Array(out?))
            }
            Value::Dict(dict) => {
                let ptr = Rc::as_ptr(dict) as *const ();
                enter(active, ptr)?;
                let entries = dict.borrow().clone();
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (k, v) in &entries {
                    match v.to_json_at(active) {
                        Ok(json) => {
                            map.insert(k.json_name(), json);
                        }
                        Err(err) => {
                            active.pop();
                            return Err(err);
                        }
                    }
                }
                active.pop();
                Ok(J::Object(map))
            }
            other => Err(JsonError::Unsupported(other.type_name())),
        }
    }
}

fn too_deep(operation: &str) -> Fault {
    Fault::runtime(
        "RecursionError",
        format!("maximum recursion depth exceeded in {}", operation),
    )
}

fn enter(active: &mut Vec<*const ()>, ptr: *const ()) -> Result<(), JsonError> {
    if active.contains(&ptr) {
        return Err(JsonError::Circular);
    }
    if active.len() >= MAX_NESTING {
        return Err(JsonError::TooDeep);
    }
    active.push(ptr);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonError {
    #[error("Object of type {0} is not JSON serializable")]
    Unsupported(&'static str),
    #[error("Out of range float values are not JSON compliant")]
    NonFinite,
    #[error("Circular reference detected")]
    Circular,
    #[error("Value is nested too deeply to serialize")]
    TooDeep,
}

// =============================================================================
// Rendering
// =============================================================================

#[derive(Default)]
struct Renderer {
    active: Vec<*const ()>,
}

impl Renderer {
    fn render(&mut self, value: &Value, out: &mut String) {
        match value {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => quote_into(s, out),
            Value::List(list) => {
                let ptr = Rc::as_ptr(list) as *const ();
                if self.active.contains(&ptr) || self.active.len() >= MAX_NESTING {
                    out.push_str("[...]");
                    return;
                }
                self.active.push(ptr);
                out.push('[');
                let items = list.borrow().clone();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render(item, out);
                }
                out.push(']');
                self.active.pop();
            }
            Value::Dict(dict) => {
                let ptr = Rc::as_ptr(dict) as *const ();
                if self.active.contains(&ptr) || self.active.len() >= MAX_NESTING {
                    out.push_str("{...}");
                    return;
                }
                self.active.push(ptr);
                out.push('{');
                let entries = dict.borrow().clone();
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render(&k.to_value(), out);
                    out.push_str(": ");
                    self.render(v, out);
                }
                out.push('}');
                self.active.pop();
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Value::Native(n) => out.push_str(&format!("<built-in function {}>", n.name)),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
        }
    }
}

fn quote_into(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// Shortest round-trip float text with Python's conventions
/// (`1.0`, `1e+16`, `1.5e-05`, `nan`, `inf`).
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        let (mantissa, exponent) = match text.split_once('e') {
            Some(parts) => parts,
            None => return text,
        };
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exponent),
        };
        return format!("{}e{}{:0>2}", mantissa, sign, digits);
    }
    let text = format!("{}", f);
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(heap: &mut Heap, items: Vec<Value>) -> Value {
        heap.list(items)
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_repr() {
        let mut heap = Heap::new();
        let inner = list(&mut heap, vec![Value::Int(1), Value::str("a")]);
        let mut map = IndexMap::new();
        map.insert(Key::Str(Rc::from("k")), inner);
        map.insert(Key::Int(2), Value::None);
        let dict = heap.dict(map);
        assert_eq!(dict.repr(), "{'k': [1, 'a'], 2: None}");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("plain").to_str(), "plain");
    }

    #[test]
    fn test_cyclic_repr_and_json() {
        let mut heap = Heap::new();
        let value = list(&mut heap, vec![Value::Int(1)]);
        if let Value::List(inner) = &value {
            inner.borrow_mut().push(value.clone());
        }
        assert_eq!(value.repr(), "[1, [...]]");
        assert_eq!(value.to_json(), Err(JsonError::Circular));
        heap.sweep();
        assert_eq!(value.repr(), "[]");
    }

    #[test]
    fn test_shared_but_acyclic_is_serializable() {
        let mut heap = Heap::new();
        let shared = list(&mut heap, vec![Value::Int(1)]);
        let outer = list(&mut heap, vec![shared.clone(), shared]);
        assert_eq!(outer.to_json().unwrap(), serde_json::json!([[1], [1]]));
    }

    #[test]
    fn test_json_round_trip_keeps_order_and_types() {
        let mut heap = Heap::new();
        let json = serde_json::json!([{"b": 1, "a": 2.5, "c": null, "d": true, "e": "x"}]);
        let value = Value::from_json(&json, &mut heap);
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn test_unsupported_json() {
        let err = Value::Range(Range {
            start: 0,
            stop: 3,
            step: 1,
        })
        .to_json()
        .unwrap_err();
        assert_eq!(err.to_string(), "Object of type range is not JSON serializable");
        assert_eq!(Value::Float(f64::NAN).to_json(), Err(JsonError::NonFinite));
        assert_eq!(
            Value::Float(f64::INFINITY).to_json().unwrap_err().to_string(),
            "Out of range float values are not JSON compliant"
        );
    }

    #[test]
    fn test_numeric_equality_and_ordering() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(1).py_eq(&Value::str("1")));
        assert_eq!(
            Value::Int(1).compare(&Value::Float(2.0)).unwrap(),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Float(f64::NAN).compare(&Value::Int(0)).unwrap(), None);
        assert!(Value::Int(1).compare(&Value::str("a")).is_err());
    }

    #[test]
    fn test_range_len() {
        let r = |start, stop, step| Range { start, stop, step };
        assert_eq!(r(0, 5, 1).len(), 5);
        assert_eq!(r(0, 5, 2).len(), 3);
        assert_eq!(r(5, 0, -1).len(), 5);
        assert_eq!(r(5, 0, 1).len(), 0);
        assert_eq!(r(0, 10, 3).get(3), Some(9));
    }

    fn nest(heap: &mut Heap, depth: usize) -> Value {
        let mut value = list(heap, vec![]);
        for _ in 0..depth {
            value = list(heap, vec![value]);
        }
        value
    }

    #[test]
    fn test_deep_nesting_is_refused_not_overflowed() {
        let mut heap = Heap::new();
        let a = nest(&mut heap, 200_000);
        let b = nest(&mut heap, 200_000);
        assert_eq!(a.to_json(), Err(JsonError::TooDeep));
        assert!(a.repr().contains("[...]"));
        let fault = a.try_eq(&b).unwrap_err();
        assert!(matches!(fault, Fault::Runtime(f) if f.type_name == "RecursionError"));
        assert!(a.compare(&b).is_err());
        assert!(!a.py_eq(&b));
    }

    #[test]
    fn test_deep_nesting_drops_iteratively() {
        let mut heap = Heap::new();
        let value = nest(&mut heap, 1_000_000);
        assert_eq!(heap.meter().live(), 1_000_000);
        drop(value);
        assert_eq!(heap.meter().live(), 0);
    }

    #[test]
    fn test_meter_tracks_high_water_and_refunds() {
        let mut heap = Heap::with_limit(10);
        let value = heap.try_list(vec![Value::Int(0); 6]).unwrap();
        assert!(heap.try_list(vec![Value::Int(0); 5]).is_err());
        if let Value::List(cell) = &value {
            cell.borrow().reserve_slots(8).unwrap();
            assert!(cell.borrow().reserve_slots(11).is_err());
            cell.borrow().reserve_slots(4).unwrap();
        }
        assert_eq!(heap.meter().live(), 8);
        drop(value);
        assert_eq!(heap.meter().live(), 0);
        assert!(heap.try_list(vec![Value::Int(0); 10]).is_ok());
    }

    #[test]
    fn test_bool_and_int_keys_collide() {
        let mut map = IndexMap::new();
        map.insert(Key::Int(1), Value::str("a"));
        map.insert(Key::Bool(true), Value::str("b"));
        map.insert(Key::Bool(false), Value::str("c"));
        assert_eq!(map.len(), 2);
        let mut heap = Heap::new();
        assert_eq!(heap.dict(map).repr(), "{1: 'b', False: 'c'}");
    }

    #[test]
    fn test_key_conversion() {
        assert_eq!(Key::from_value(&Value::Float(2.0)).unwrap(), Key::Int(2));
        assert!(Key::from_value(&Value::Float(2.5)).is_err());
        let mut heap = Heap::new();
        let l = list(&mut heap, vec![]);
        assert!(Key::from_value(&l).is_err());
    }
}
