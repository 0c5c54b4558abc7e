//! Tree-walking interpreter.
//!
//! One `Interpreter` runs one script on one thread. Everything the script can
//! reach comes through the [`Host`]: the capability table, the library
//! namespaces, the console sink and the watchdog's interrupt flag.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use indexmap::IndexMap;

use super::ast::*;
use super::builtins;
use super::error::{Fault, TraceFrame};
use super::format::format_value;
use super::library::Library;
use super::methods;
use super::value::{BoundMethod, CallArgs, Function, Heap, Key, Range, Value};

// =============================================================================
// Host seams
// =============================================================================

/// Decides which operations and imports a script may resolve.
pub trait Capabilities: Send + Sync {
    fn operation_allowed(&self, name: &str) -> bool;
    fn import_allowed(&self, module: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Sink for the script's console writes.
pub trait Console: Send + Sync {
    /// An `Err` aborts the script (fatal output overflow).
    fn write(&self, stream: Stream, text: &str) -> Result<(), Fault>;
}

/// Watchdog flag, shared between the worker and whoever enforces the deadline.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterpreterLimits {
    pub max_call_depth: usize,
    pub max_collection_len: usize,
    /// Elements all live lists and dicts may hold together.
    pub max_live_elements: usize,
}

impl Default for InterpreterLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 100,
            max_collection_len: 10_000_000,
            max_live_elements: 25_000_000,
        }
    }
}

pub struct Host {
    pub capabilities: Arc<dyn Capabilities>,
    pub library: Arc<Library>,
    pub console: Arc<dyn Console>,
    pub interrupt: Interrupt,
    pub limits: InterpreterLimits,
}

// =============================================================================
// Scopes and frames
// =============================================================================

/// Variable scope. Function scopes chain to their closure, never to globals.
#[derive(Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Self {
        Self {
            vars: RefCell::new(HashMap::new()),
            parent,
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }
}

struct Frame {
    function: Rc<str>,
    line: usize,
    scope: Rc<Scope>,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

const MODULE_FRAME: &str = "<module>";

// =============================================================================
// Interpreter
// =============================================================================

pub struct Interpreter {
    host: Host,
    heap: Heap,
    globals: Rc<Scope>,
    frames: Vec<Frame>,
}

impl Interpreter {
    pub fn new(host: Host) -> Self {
        let globals = Rc::new(Scope::new(None));
        let frames = vec![Frame {
            function: Rc::from(MODULE_FRAME),
            line: 0,
            scope: globals.clone(),
        }];
        let heap = Heap::with_limit(host.limits.max_live_elements);
        Self {
            host,
            heap,
            globals,
            frames,
        }
    }

    pub fn heap(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.host.library
    }

    pub fn capabilities(&self) -> &Arc<dyn Capabilities> {
        &self.host.capabilities
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals.set(name, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    /// Run a whole program at module level.
    pub fn run(&mut self, program: &Program) -> Result<(), Fault> {
        match self.exec_block(&program.body) {
            Ok(_) => Ok(()),
            Err(Fault::Runtime(mut fault)) => {
                let line = self.frames.last().map_or(0, |f| f.line);
                fault.frames.push(TraceFrame {
                    function: MODULE_FRAME.to_string(),
                    line,
                });
                Err(Fault::Runtime(fault))
            }
            Err(other) => Err(other),
        }
    }

    /// Drop every binding and container the script created.
    pub fn teardown(&mut self) {
        self.frames.truncate(1);
        self.globals.clear();
        self.heap.sweep();
    }

    // ===== Services for builtins and library code =====

    /// Watchdog checkpoint.
    pub fn tick(&self) -> Result<(), Fault> {
        if self.host.interrupt.is_triggered() {
            return Err(Fault::Interrupted);
        }
        Ok(())
    }

    pub fn check_len(&self, len: usize) -> Result<(), Fault> {
        if len > self.host.limits.max_collection_len {
            return Err(Fault::LimitExceeded(format!(
                "collection size limit of {} elements exceeded",
                self.host.limits.max_collection_len
            )));
        }
        Ok(())
    }

    pub fn write(&self, stream: Stream, text: &str) -> Result<(), Fault> {
        self.host.console.write(stream, text)
    }

    /// Check that `container` may grow to `len` elements and charge the
    /// growth to the execution's element budget.
    pub fn grow(&self, container: &Value, len: usize) -> Result<(), Fault> {
        self.check_len(len)?;
        match container {
            Value::List(list) => list.borrow().reserve_slots(len),
            Value::Dict(dict) => dict.borrow().reserve_slots(len),
            _ => Ok(()),
        }
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> Result<Value, Fault> {
        self.check_len(items.len())?;
        self.heap.try_list(items)
    }

    pub fn new_dict(&mut self, entries: IndexMap<Key, Value>) -> Result<Value, Fault> {
        self.check_len(entries.len())?;
        self.heap.try_dict(entries)
    }

    /// Materialise an iterable into a vector of items.
    pub fn iterate(&mut self, value: &Value) -> Result<Vec<Value>, Fault> {
        match value {
            Value::List(list) => Ok(list.borrow().clone()),
            Value::Dict(dict) => Ok(dict.borrow().keys().map(Key::to_value).collect()),
            Value::Str(s) => {
                self.check_len(s.len())?;
                Ok(s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect())
            }
            Value::Range(range) => {
                let len = range.len();
                self.check_len(len)?;
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    if i % 4096 == 0 {
                        self.tick()?;
                    }
                    if let Some(v) = range.get(i) {
                        items.push(Value::Int(v));
                    }
                }
                Ok(items)
            }
            other => Err(Fault::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Call any callable value.
    pub fn call(&mut self, func: &Value, args: CallArgs) -> Result<Value, Fault> {
        self.tick()?;
        match func {
            Value::Function(function) => self.call_function(function.clone(), args),
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::Native(native) => (native.func)(self, args),
            Value::Method(method) => {
                let method = method.clone();
                methods::call(self, &method.receiver, method.name, args)
            }
            other => Err(Fault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: Rc<Function>, args: CallArgs) -> Result<Value, Fault> {
        if self.frames.len() > self.host.limits.max_call_depth {
            return Err(Fault::runtime(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        let def = function.def.clone();
        let scope = Rc::new(Scope::new(function.closure.clone()));
        self.bind_params(&function, &scope, args)?;

        self.frames.push(Frame {
            function: Rc::from(def.name.as_str()),
            line: def.line,
            scope,
        });
        let result = match &def.body {
            FunctionBody::Block(body) => self.exec_block(body).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::None,
            }),
            FunctionBody::Expr(expr) => self.eval(expr),
        };
        let frame = self.frames.pop();

        result.map_err(|fault| match fault {
            Fault::Runtime(mut runtime) => {
                if let Some(frame) = frame {
                    runtime.frames.push(TraceFrame {
                        function: frame.function.to_string(),
                        line: frame.line,
                    });
                }
                Fault::Runtime(runtime)
            }
            other => other,
        })
    }

    fn bind_params(&self, function: &Function, scope: &Scope, args: CallArgs) -> Result<(), Fault> {
        let def = &function.def;
        let params = &def.params;
        let CallArgs {
            positional,
            keywords,
        } = args;

        if positional.len() > params.len() {
            return Err(Fault::type_error(format!(
                "{}() takes {} positional argument{} but {} were given",
                def.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                positional.len()
            )));
        }

        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(positional) {
            *slot = Some(value);
        }
        for (name, value) in keywords {
            let Some(index) = params.iter().position(|p| p.name == name) else {
                return Err(Fault::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                )));
            };
            if bound[index].is_some() {
                return Err(Fault::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
            bound[index] = Some(value);
        }

        let first_default = params.len() - function.defaults.len();
        let mut missing = Vec::new();
        for (index, (param, slot)) in params.iter().zip(bound).enumerate() {
            let value = match slot {
                Some(value) => value,
                None if index >= first_default => function.defaults[index - first_default].clone(),
                None => {
                    missing.push(format!("'{}'", param.name));
                    continue;
                }
            };
            scope.set(&param.name, value);
        }
        if !missing.is_empty() {
            return Err(Fault::type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                def.name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(" and ")
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn scope(&self) -> Result<Rc<Scope>, Fault> {
        self.frames
            .last()
            .map(|frame| frame.scope.clone())
            .ok_or_else(|| Fault::internal("frame stack is empty"))
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, Fault> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, Fault> {
        self.tick()?;
        if let Some(frame) = self.frames.last_mut() {
            frame.line = stmt.line;
        }

        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    self.tick()?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                return self.exec_for(target, &iterable, body);
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Def(def) => {
                let function = self.make_function(def)?;
                self.scope()?.set(&def.name, function);
            }
            StmtKind::Import(names) => {
                for import in names {
                    self.exec_import(import)?;
                }
            }
            StmtKind::FromImport { module, names } => self.exec_from_import(module, names)?,
            StmtKind::Try { body, handlers } => return self.exec_try(body, handlers),
            StmtKind::Assert { test, message } => {
                if !self.eval(test)?.truthy() {
                    let text = match message {
                        Some(expr) => self.eval(expr)?.to_str(),
                        None => String::new(),
                    };
                    return Err(Fault::runtime("AssertionError", text));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, target: &Target, iterable: &Value, body: &[Stmt]) -> Result<Flow, Fault> {
        // ranges stay lazy so `for i in range(10**12)` is only bounded by the watchdog
        if let Value::Range(range) = iterable {
            let range = *range;
            let mut index = 0;
            while let Some(item) = range.get(index) {
                index += 1;
                self.tick()?;
                self.assign(target, Value::Int(item))?;
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            }
            return Ok(Flow::Normal);
        }

        for item in self.iterate(iterable)? {
            self.tick()?;
            self.assign(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(&mut self, body: &[Stmt], handlers: &[Handler]) -> Result<Flow, Fault> {
        let fault = match self.exec_block(body) {
            Err(Fault::Runtime(fault)) => fault,
            other => return other,
        };
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => handler_matches(kind, fault.type_name),
            };
            if !matched {
                continue;
            }
            if let Some(binding) = &handler.binding {
                self.scope()?.set(binding, Value::str(&fault.message));
            }
            return self.exec_block(&handler.body);
        }
        Err(Fault::Runtime(fault))
    }

    fn exec_import(&mut self, import: &ImportName) -> Result<(), Fault> {
        let module = self.import_module(&import.path)?;
        let scope = self.scope()?;
        match &import.alias {
            Some(alias) => scope.set(alias, module),
            None => {
                // `import a.b` binds `a`
                let top = import.path.split('.').next().unwrap_or(&import.path);
                let top_module = self.import_module(top)?;
                scope.set(top, top_module);
            }
        }
        Ok(())
    }

    fn exec_from_import(
        &mut self,
        module: &str,
        names: &[(String, Option<String>)],
    ) -> Result<(), Fault> {
        let Value::Module(library_module) = self.import_module(module)? else {
            return Err(Fault::internal("library import did not yield a module"));
        };
        let scope = self.scope()?;
        for (name, alias) in names {
            let qualified = format!("{}.{}", module, name);
            if name.starts_with("__") || !self.host.capabilities.import_allowed(&qualified) {
                return Err(Fault::capability(qualified));
            }
            let value = library_module
                .member(name)
                .ok_or_else(|| Fault::capability(qualified))?;
            scope.set(alias.as_deref().unwrap_or(name), value);
        }
        Ok(())
    }

    fn import_module(&self, path: &str) -> Result<Value, Fault> {
        if !self.host.capabilities.import_allowed(path) {
            return Err(Fault::capability(path));
        }
        self.host
            .library
            .module(path)
            .map(Value::Module)
            .ok_or_else(|| {
                Fault::runtime("ModuleNotFoundError", format!("No module named '{}'", path))
            })
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Result<Value, Fault> {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(expr) = &param.default {
                defaults.push(self.eval(expr)?);
            }
        }
        let scope = self.scope()?;
        let closure = if Rc::ptr_eq(&scope, &self.globals) {
            None
        } else {
            self.heap.track_scope(&scope);
            Some(scope)
        };
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            closure,
        })))
    }

    // ===== Assignment =====

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                self.scope()?.set(name, value);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.set_item(&object, &index, value)
            }
            Target::Unpack(targets) => {
                let items = self.iterate(&value)?;
                if items.len() < targets.len() {
                    return Err(Fault::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(Fault::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name).ok_or_else(|| Fault::name_error(name))?;
                let rhs = self.eval(value)?;
                let result = self.augmented(op, current, rhs)?;
                self.scope()?.set(name, result);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                let result = self.augmented(op, current, rhs)?;
                self.set_item(&object, &index, result)
            }
            Target::Unpack(_) => Err(Fault::internal("augmented assignment to a target list")),
        }
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn augmented(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value, Fault> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let extra = self.iterate(&rhs)?;
            let new_len = list.borrow().len() + extra.len();
            self.grow(&current, new_len)?;
            list.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binary(op, &current, &rhs)
    }

    fn set_item(&mut self, object: &Value, index: &Value, value: Value) -> Result<(), Fault> {
        match object {
            Value::List(list) => {
                let len = list.borrow().len();
                let i = list_index(index, len, "list assignment index out of range")?;
                list.borrow_mut()[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                let key = Key::from_value(index)?;
                let len = dict.borrow().len();
                if !dict.borrow().contains_key(&key) {
                    self.grow(object, len + 1)?;
                }
                dict.borrow_mut().insert(key, value);
                Ok(())
            }
            other => Err(Fault::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Resolve a bare name: local chain, globals, then permitted operations.
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.scope.get(name) {
                return Some(value);
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Some(value);
        }
        if !self.host.capabilities.operation_allowed(name) {
            return None;
        }
        builtins::lookup(name).map(Value::Builtin)
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, Fault> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field { expr, spec } => {
                            let value = self.eval(expr)?;
                            match spec {
                                Some(spec) => out.push_str(&format_value(&value, spec)?),
                                None => out.push_str(&value.to_str()),
                            }
                        }
                    }
                }
                self.check_len(out.len())?;
                Ok(Value::str(&out))
            }
            Expr::Name(name) => self.lookup(name).ok_or_else(|| Fault::name_error(name)),
            Expr::List(items) | Expr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                self.new_list(values)
            }
            Expr::Dict(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = Key::from_value(&self.eval(key)?)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                self.new_dict(map)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, &value)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::Compare { left, rest } => {
                let mut current = self.eval(left)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !self.compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = match func.as_ref() {
                    // an unresolvable callee is an attempt to reach a capability
                    Expr::Name(name) => self.lookup(name).ok_or_else(|| Fault::capability(name))?,
                    other => self.eval(other)?,
                };
                let mut call_args = CallArgs::default();
                for arg in args {
                    call_args.positional.push(self.eval(arg)?);
                }
                for (name, arg) in kwargs {
                    let value = self.eval(arg)?;
                    call_args.keywords.push((name.clone(), value));
                }
                self.call(&callee, call_args)
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                self.get_attr(&object, name)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.get_item(&object, &index)
            }
            Expr::Slice {
                object,
                start,
                stop,
            } => {
                let object = self.eval(object)?;
                let start = self.eval_bound(start.as_deref())?;
                let stop = self.eval_bound(stop.as_deref())?;
                self.slice(&object, start, stop)
            }
            Expr::ListComp {
                element,
                target,
                iter,
                cond,
            } => self.eval_comprehension(element, target, iter, cond.as_deref()),
            Expr::Lambda(def) => self.make_function(def),
        }
    }

    fn eval_comprehension(
        &mut self,
        element: &Expr,
        target: &Target,
        iter: &Expr,
        cond: Option<&Expr>,
    ) -> Result<Value, Fault> {
        let iterable = self.eval(iter)?;
        let items = self.iterate(&iterable)?;

        // the loop variable lives in its own scope and does not leak
        let outer = self.scope()?;
        let inner = Rc::new(Scope::new(Some(outer.clone())));
        self.swap_scope(inner);
        let result = self.comprehension_loop(element, target, cond, items);
        self.swap_scope(outer);

        let values = result?;
        self.new_list(values)
    }

    fn comprehension_loop(
        &mut self,
        element: &Expr,
        target: &Target,
        cond: Option<&Expr>,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, Fault> {
        let mut out = Vec::new();
        for item in items {
            self.tick()?;
            self.assign(target, item)?;
            if let Some(cond) = cond {
                if !self.eval(cond)?.truthy() {
                    continue;
                }
            }
            out.push(self.eval(element)?);
            self.check_len(out.len())?;
        }
        Ok(out)
    }

    fn swap_scope(&mut self, scope: Rc<Scope>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scope = scope;
        }
    }

    fn eval_bound(&mut self, expr: Option<&Expr>) -> Result<Option<i64>, Fault> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                Fault::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn get_attr(&mut self, object: &Value, name: &str) -> Result<Value, Fault> {
        if name.starts_with("__") {
            return Err(Fault::capability(name));
        }
        if let Value::Module(module) = object {
            let qualified = format!("{}.{}", module.name, name);
            return module.member(name).ok_or_else(|| Fault::capability(qualified));
        }
        match methods::resolve(object, name) {
            Some(method) => Ok(Value::Method(Rc::new(BoundMethod {
                receiver: object.clone(),
                name: method,
            }))),
            None => Err(Fault::attribute_error(format!(
                "'{}' object has no attribute '{}'",
                object.type_name(),
                name
            ))),
        }
    }

    pub fn get_item(&mut self, object: &Value, index: &Value) -> Result<Value, Fault> {
        match object {
            Value::List(list) => {
                let list = list.borrow();
                let i = list_index(index, list.len(), "list index out of range")?;
                Ok(list[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = list_index(index, chars.len(), "string index out of range")?;
                Ok(Value::str(chars[i].encode_utf8(&mut [0; 4])))
            }
            Value::Range(range) => {
                let i = list_index(index, range.len(), "range object index out of range")?;
                range
                    .get(i)
                    .map(Value::Int)
                    .ok_or_else(|| Fault::index_error("range object index out of range"))
            }
            Value::Dict(dict) => {
                let key = Key::from_value(index)?;
                dict.borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| Fault::key_error(index.repr()))
            }
            other => Err(Fault::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn slice(&mut self, object: &Value, start: Option<i64>, stop: Option<i64>) -> Result<Value, Fault> {
        match object {
            Value::List(list) => {
                let items = list.borrow();
                let (from, to) = slice_bounds(start, stop, items.len());
                let sliced = items[from..to].to_vec();
                drop(items);
                self.new_list(sliced)
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (from, to) = slice_bounds(start, stop, chars.len());
                Ok(Value::str(&chars[from..to].iter().collect::<String>()))
            }
            Value::Range(range) => {
                let (from, to) = slice_bounds(start, stop, range.len());
                let at = |i: usize| {
                    let v = range.start as i128 + i as i128 * range.step as i128;
                    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
                };
                Ok(Value::Range(Range {
                    start: at(from),
                    stop: at(to),
                    step: range.step,
                }))
            }
            other => Err(Fault::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    // ===== Operators =====

    pub fn binary(&mut self, op: BinOp, left: &Value, right: &Value) -> Result<Value, Fault> {
        match (op, left, right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.check_len(a.len() + b.len())?;
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Ok(Value::str(&out))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                self.new_list(items)
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s))
                if n.as_int().is_some() && !matches!(n, Value::Str(_)) =>
            {
                let count = n.as_int().unwrap_or(0).max(0) as usize;
                self.check_len(s.len().saturating_mul(count))?;
                Ok(Value::str(&s.repeat(count)))
            }
            (BinOp::Mul, Value::List(list), n) | (BinOp::Mul, n, Value::List(list))
                if n.as_int().is_some() =>
            {
                let count = n.as_int().unwrap_or(0).max(0) as usize;
                let items = list.borrow().clone();
                self.check_len(items.len().saturating_mul(count))?;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                self.new_list(out)
            }
            _ => arithmetic(op, left, right),
        }
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, Fault> {
        use std::cmp::Ordering::*;
        Ok(match op {
            CmpOp::Eq => left.try_eq(right)?,
            CmpOp::NotEq => !left.try_eq(right)?,
            CmpOp::Is => left.is_same(right),
            CmpOp::IsNot => !left.is_same(right),
            CmpOp::In => contains(right, left)?,
            CmpOp::NotIn => !contains(right, left)?,
            CmpOp::Lt => ordering(op, left, right)? == Some(Less),
            CmpOp::LtE => matches!(ordering(op, left, right)?, Some(Less | Equal)),
            CmpOp::Gt => ordering(op, left, right)? == Some(Greater),
            CmpOp::GtE => matches!(ordering(op, left, right)?, Some(Greater | Equal)),
        })
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.teardown();
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn handler_matches(kind: &str, raised: &str) -> bool {
    match kind {
        "Exception" | "BaseException" => true,
        "ArithmeticError" => matches!(raised, "ZeroDivisionError" | "OverflowError"),
        "LookupError" => matches!(raised, "IndexError" | "KeyError"),
        "ImportError" => raised == "ModuleNotFoundError",
        other => other == raised,
    }
}

fn ordering(op: CmpOp, left: &Value, right: &Value) -> Result<Option<std::cmp::Ordering>, Fault> {
    left.compare(right).map_err(|fault| match fault {
        Fault::Runtime(raised) if raised.type_name == "TypeError" => Fault::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )),
        other => other,
    })
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> Result<bool, Fault> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(Fault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(list) => Ok(list.borrow().iter().any(|v| v.py_eq(item))),
        Value::Dict(dict) => {
            let key = Key::from_value(item)?;
            Ok(dict.borrow().contains_key(&key))
        }
        Value::Range(range) => {
            let Some(n) = item.as_int() else {
                return Ok(false);
            };
            let len = range.len();
            if len == 0 {
                return Ok(false);
            }
            let offset = (n as i128) - (range.start as i128);
            let step = range.step as i128;
            Ok(offset % step == 0 && offset / step >= 0 && (offset / step) < len as i128)
        }
        other => Err(Fault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Resolve a possibly negative index against `len`.
pub fn list_index(index: &Value, len: usize, out_of_range: &str) -> Result<usize, Fault> {
    let Some(raw) = index.as_int() else {
        return Err(Fault::type_error(format!(
            "indices must be integers, not {}",
            index.type_name()
        )));
    };
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(Fault::index_error(out_of_range));
    }
    Ok(resolved as usize)
}

/// Clamp `[start:stop]` the way sequence slicing does.
pub fn slice_bounds(start: Option<i64>, stop: Option<i64>, len: usize) -> (usize, usize) {
    let clamp = |raw: i64| -> usize {
        let resolved = if raw < 0 { raw + len as i64 } else { raw };
        resolved.clamp(0, len as i64) as usize
    };
    let from = start.map_or(0, clamp);
    let to = stop.map_or(len, clamp);
    (from, to.max(from))
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, Fault> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(|| Fault::overflow("integer overflow")),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (op, v) => Err(Fault::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}

/// Numeric binary operators.
pub fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value, Fault> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return int_arithmetic(op, a, b);
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(Fault::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )));
    };
    float_arithmetic(op, a, b)
}

fn int_arithmetic(op: BinOp, a: i64, b: i64) -> Result<Value, Fault> {
    let overflow = || Fault::overflow("integer overflow");
    match op {
        BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Div => {
            if b == 0 {
                return Err(Fault::zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(Fault::zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            let adjust = (a % b != 0) && ((a < 0) != (b < 0));
            Ok(Value::Int(if adjust { q - 1 } else { q }))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Fault::zero_division("integer division or modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(Fault::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
        }
    }
}

fn float_arithmetic(op: BinOp, a: f64, b: f64) -> Result<Value, Fault> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Fault::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(Fault::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Fault::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(Fault::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(Fault::value_error("math domain error"));
            }
            a.powf(b)
        }
    };
    if result.is_infinite() && a.is_finite() && b.is_finite() {
        return Err(Fault::overflow("Numerical result out of range"));
    }
    Ok(Value::Float(result))
}
