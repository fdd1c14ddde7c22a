//! Tree-walking evaluator with a per-statement step hook.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::ast::{
    BinOp, ClassDef, Comprehension, Const, Expr, FStringPart, FunctionDef, Handler, Stmt,
    StmtKind,
};
use super::builtins;
use super::ops;
use super::value::{
    exception_matches, BoundMethod, ClassObj, DictFlavor, Exc, HashKey, Instance, PyDict, PyIter,
    RangeValue, Table, Value, MAX_SEQUENCE,
};
use crate::domain::{ExecutionTrace, StepSnapshot};

/// Deadline checks happen once per this many units of work.
const CHECK_INTERVAL: u64 = 1024;

/// Name bound to `__name__`; never `"__main__"`, so script guards stay inert.
const MODULE_NAME: &str = "aligner";

/// Resource limits enforced cooperatively by the evaluator.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub budget: Duration,
    pub max_steps: usize,
    pub max_depth: usize,
}

/// Names a function body binds, resolved once per definition.
#[derive(Debug, Default)]
pub struct FrameLayout {
    locals: HashSet<String>,
    globals: HashSet<String>,
    nonlocals: HashSet<String>,
}

impl FrameLayout {
    fn of(def: &FunctionDef) -> Self {
        let mut layout = FrameLayout::default();
        for param in &def.params {
            layout.locals.insert(param.name.clone());
        }
        layout.collect_block(&def.body);
        let declared: Vec<String> = layout
            .globals
            .iter()
            .chain(layout.nonlocals.iter())
            .cloned()
            .collect();
        for name in declared {
            layout.locals.remove(&name);
        }
        layout
    }

    fn collect_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.collect_stmt(stmt);
        }
    }

    fn collect_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().for_each(|t| self.collect_target(t)),
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                self.collect_target(target)
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                self.collect_target(target);
                self.collect_block(body);
                self.collect_block(orelse);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                self.collect_block(body);
                self.collect_block(orelse);
            }
            StmtKind::FunctionDef(def) => {
                self.locals.insert(def.name.clone());
            }
            StmtKind::ClassDef(class) => {
                self.locals.insert(class.name.clone());
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.collect_block(body);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        self.locals.insert(name.clone());
                    }
                    self.collect_block(&handler.body);
                }
                self.collect_block(orelse);
                self.collect_block(finalbody);
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let bound = alias
                        .asname
                        .clone()
                        .unwrap_or_else(|| alias.name.split('.').next().unwrap_or_default().to_string());
                    self.locals.insert(bound);
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names.iter().filter(|a| a.name != "*") {
                    self.locals
                        .insert(alias.asname.clone().unwrap_or_else(|| alias.name.clone()));
                }
            }
            StmtKind::Global(names) => self.globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => self.nonlocals.extend(names.iter().cloned()),
            StmtKind::Delete(targets) => targets.iter().for_each(|t| self.collect_target(t)),
            _ => {}
        }
    }

    fn collect_target(&mut self, target: &Expr) {
        match target {
            Expr::Name(name) => {
                self.locals.insert(name.clone());
            }
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().for_each(|item| self.collect_target(item))
            }
            Expr::Starred(inner) => self.collect_target(inner),
            _ => {}
        }
    }
}

/// A user-defined function together with its defining environment.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub scope: Rc<Scope>,
    pub qualname: String,
    layout: Rc<FrameLayout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Class,
    Comprehension,
}

pub struct Scope {
    kind: ScopeKind,
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    /// Qualified-name prefix for definitions made inside this scope.
    label: String,
    layout: Option<Rc<FrameLayout>>,
}

impl Scope {
    fn module() -> Rc<Self> {
        let vars = HashMap::from([("__name__".to_string(), Value::str(MODULE_NAME))]);
        Rc::new(Scope {
            kind: ScopeKind::Module,
            vars: RefCell::new(vars),
            parent: None,
            label: String::new(),
            layout: None,
        })
    }

    fn child(kind: ScopeKind, parent: &Rc<Scope>, label: String) -> Rc<Self> {
        Rc::new(Scope {
            kind,
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            label,
            layout: None,
        })
    }

    fn frame(closure: &Closure, vars: HashMap<String, Value>) -> Rc<Self> {
        Rc::new(Scope {
            kind: ScopeKind::Function,
            vars: RefCell::new(vars),
            parent: Some(closure.scope.clone()),
            label: closure.qualname.clone(),
            layout: Some(closure.layout.clone()),
        })
    }

    fn binds_locally(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
            || self.layout.as_ref().is_some_and(|l| l.locals.contains(name))
    }
}

/// Control flow out of a statement.
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// A resolved subscript.
pub enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

/// A call whose arguments are already bound, so binding errors surface before execution.
pub enum PreparedCall {
    Frame { closure: Rc<Closure>, scope: Rc<Scope> },
    Direct { callee: Value, args: Vec<Value> },
}

enum Cursor {
    List(Rc<RefCell<Vec<Value>>>, usize),
    Range(RangeValue, usize),
    Iter(Rc<RefCell<PyIter>>),
    Items(std::vec::IntoIter<Value>),
    /// Dicts, sets and deques refuse to continue once their size changes.
    Sized {
        source: Value,
        len: usize,
        items: std::vec::IntoIter<Value>,
    },
}

fn live_len(value: &Value) -> usize {
    match value {
        Value::Dict(dict) => dict.borrow().table.len(),
        Value::Set(table) => table.borrow().len(),
        Value::Deque(items) => items.borrow().len(),
        _ => 0,
    }
}

impl Cursor {
    fn over(value: &Value) -> Result<Self, Exc> {
        Ok(match value {
            Value::List(items) => Cursor::List(items.clone(), 0),
            Value::Range(range) => Cursor::Range(*range, 0),
            Value::Iter(it) => Cursor::Iter(it.clone()),
            Value::Dict(_) | Value::Set(_) | Value::Deque(_) => Cursor::Sized {
                source: value.clone(),
                len: live_len(value),
                items: builtins::iterate(value)?.into_iter(),
            },
            other => Cursor::Items(builtins::iterate(other)?.into_iter()),
        })
    }

    fn next_item(&mut self) -> Result<Option<Value>, Exc> {
        if let Cursor::Sized { source, len, items } = self {
            if live_len(source) != *len {
                let message = match source {
                    Value::Dict(_) => "dictionary changed size during iteration",
                    Value::Set(_) => "Set changed size during iteration",
                    _ => "deque mutated during iteration",
                };
                return Err(Exc::new("RuntimeError", message));
            }
            return Ok(items.next());
        }
        Ok(match self {
            Cursor::List(items, pos) => {
                let item = items.borrow().get(*pos).cloned();
                *pos += 1;
                item
            }
            Cursor::Range(range, pos) => {
                if *pos < range.len() {
                    let value = range.get(*pos);
                    *pos += 1;
                    Some(Value::Int(value))
                } else {
                    None
                }
            }
            Cursor::Iter(it) => it.borrow_mut().next_item(),
            Cursor::Items(items) | Cursor::Sized { items, .. } => items.next(),
        })
    }
}

enum CompBody<'a> {
    Element(&'a Expr),
    Entry(&'a Expr, &'a Expr),
}

enum CompSink {
    List(Vec<Value>),
    Set(Table),
    Dict(PyDict),
}

impl CompSink {
    fn finish(self) -> Value {
        match self {
            CompSink::List(items) => Value::list(items),
            CompSink::Set(table) => Value::set(table),
            CompSink::Dict(dict) => Value::dict(dict),
        }
    }
}

/// Python-style `slice.indices(len)`.
pub fn slice_bounds(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<(i64, i64, i64), Exc> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Exc::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let adjust = |bound: i64| {
        if bound < 0 {
            let shifted = bound + len;
            if shifted < 0 {
                if step < 0 {
                    -1
                } else {
                    0
                }
            } else {
                shifted
            }
        } else if bound >= len {
            if step < 0 {
                len - 1
            } else {
                len
            }
        } else {
            bound
        }
    };
    let (start, stop) = if step > 0 {
        (lower.map_or(0, adjust), upper.map_or(len, adjust))
    } else {
        (lower.map_or(len - 1, adjust), upper.map_or(-1, adjust))
    };
    Ok((start, stop, step))
}

fn slice_positions((start, stop, step): (i64, i64, i64)) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    positions
}

fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let adjusted = if index < 0 { index + len } else { index };
    (0..len).contains(&adjusted).then_some(adjusted as usize)
}

fn join_names(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

fn snapshot(scope: &Scope) -> BTreeMap<String, String> {
    scope
        .vars
        .borrow()
        .iter()
        .filter(|(name, _)| !name.starts_with('_') && name.as_str() != "self")
        .map(|(name, value)| (name.clone(), value.repr()))
        .collect()
}

pub struct Interp {
    globals: Rc<Scope>,
    scope: Rc<Scope>,
    hook: Option<ExecutionTrace>,
    /// Exceptions currently being handled, innermost last.
    handling: Vec<Exc>,
    depth: usize,
    steps: usize,
    /// Line of the most recent step.
    line: u32,
    work: u64,
    next_check: u64,
    deadline: Option<Instant>,
    limits: Limits,
}

impl Interp {
    pub fn new(limits: Limits) -> Self {
        let globals = Scope::module();
        Self {
            scope: globals.clone(),
            globals,
            hook: None,
            handling: Vec::new(),
            depth: 0,
            steps: 0,
            line: 0,
            work: 0,
            next_check: 0,
            deadline: Instant::now().checked_add(limits.budget),
            limits,
        }
    }

    /// Executes module-level code in the global namespace.
    pub fn exec_module(&mut self, body: &[Stmt]) -> Result<(), Exc> {
        self.exec_block(body).map(|_| ())
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.vars.borrow().get(name).cloned()
    }

    /// Starts recording a fresh trace; the step budget restarts with it.
    pub fn install_hook(&mut self) {
        self.steps = 0;
        self.hook = Some(ExecutionTrace::new());
    }

    pub fn remove_hook(&mut self) -> ExecutionTrace {
        self.hook.take().unwrap_or_default()
    }

    // ----- budget ------------------------------------------------------------

    fn tick(&mut self, line: u32) -> Result<(), Exc> {
        self.steps += 1;
        self.line = line;
        if self.steps > self.limits.max_steps {
            return Err(Exc::timeout(format!(
                "execution exceeded the step budget of {} steps",
                self.limits.max_steps
            ))
            .at(line));
        }
        self.charge(1).map_err(|e| e.at(line))?;
        if let Some(trace) = &mut self.hook {
            trace.push(StepSnapshot {
                line,
                variables: snapshot(&self.scope),
            });
        }
        Ok(())
    }

    fn charge(&mut self, units: u64) -> Result<(), Exc> {
        self.work += units;
        if self.work < self.next_check {
            return Ok(());
        }
        self.next_check = self.work + CHECK_INTERVAL;
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Exc::timeout(format!(
                "execution exceeded the deadline of {:?}",
                self.limits.budget
            ))),
            _ => Ok(()),
        }
    }

    // ----- names -------------------------------------------------------------

    fn load(&self, name: &str) -> Result<Value, Exc> {
        let scope = &self.scope;
        if let Some(value) = scope.vars.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(layout) = &scope.layout {
            if layout.globals.contains(name) {
                return self.load_global(name);
            }
            if layout.locals.contains(name) {
                return Err(Exc::new(
                    "UnboundLocalError",
                    format!(
                        "cannot access local variable '{name}' where it is not associated with a value"
                    ),
                ));
            }
        }
        let mut current = scope.parent.clone();
        while let Some(ancestor) = current {
            if ancestor.kind != ScopeKind::Class {
                if let Some(value) = ancestor.vars.borrow().get(name) {
                    return Ok(value.clone());
                }
            }
            current = ancestor.parent.clone();
        }
        self.load_global(name)
    }

    fn load_global(&self, name: &str) -> Result<Value, Exc> {
        if let Some(value) = self.globals.vars.borrow().get(name) {
            return Ok(value.clone());
        }
        builtins::lookup_builtin(name)
            .ok_or_else(|| Exc::new("NameError", format!("name '{name}' is not defined")))
    }

    fn store(&mut self, name: &str, value: Value) -> Result<(), Exc> {
        let scope = self.scope.clone();
        if let Some(layout) = &scope.layout {
            if layout.globals.contains(name) {
                self.globals.vars.borrow_mut().insert(name.to_string(), value);
                return Ok(());
            }
            if layout.nonlocals.contains(name) {
                let mut current = scope.parent.clone();
                while let Some(ancestor) = current {
                    if ancestor.kind == ScopeKind::Function && ancestor.binds_locally(name) {
                        ancestor.vars.borrow_mut().insert(name.to_string(), value);
                        return Ok(());
                    }
                    current = ancestor.parent.clone();
                }
                return Err(Exc::new(
                    "SyntaxError",
                    format!("no binding for nonlocal '{name}' found"),
                ));
            }
        }
        scope.vars.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn unbind(&mut self, name: &str) -> Result<(), Exc> {
        let target = match &self.scope.layout {
            Some(layout) if layout.globals.contains(name) => self.globals.clone(),
            _ => self.scope.clone(),
        };
        let removed = target.vars.borrow_mut().remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(Exc::new("NameError", format!("name '{name}' is not defined"))),
        }
    }

    fn qualify(&self, name: &str) -> String {
        match self.scope.kind {
            ScopeKind::Module => name.to_string(),
            ScopeKind::Class => format!("{}.{name}", self.scope.label),
            ScopeKind::Function | ScopeKind::Comprehension => {
                format!("{}.<locals>.{name}", self.scope.label)
            }
        }
    }

    // ----- statements --------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, Exc> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, Exc> {
        self.tick(stmt.line)?;
        self.exec_kind(stmt).map_err(|e| e.at(stmt.line))
    }

    fn exec_kind(&mut self, stmt: &Stmt) -> Result<Flow, Exc> {
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
            StmtKind::AnnAssign { target, value } => {
                if let Some(value) = value {
                    let value = self.eval(value)?;
                    self.assign(target, value)?;
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body, orelse } => {
                let mut first = true;
                loop {
                    if !first {
                        self.tick(stmt.line)?;
                    }
                    first = false;
                    if !self.eval(test)?.truthy() {
                        return self.exec_block(orelse);
                    }
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Normal | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let mut cursor = Cursor::over(&iterable)?;
                let mut first = true;
                loop {
                    if !first {
                        self.tick(stmt.line)?;
                    }
                    first = false;
                    let Some(item) = cursor.next_item()? else {
                        return self.exec_block(orelse);
                    };
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Normal | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::FunctionDef(def) => {
                let decorators = def
                    .decorators
                    .iter()
                    .map(|d| self.eval(d))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut value = self.make_function(def)?;
                for decorator in decorators.iter().rev() {
                    value = self.call_value(decorator, vec![value], Vec::new())?;
                }
                self.store(&def.name, value)?;
            }
            StmtKind::ClassDef(class) => {
                let value = self.make_class(class)?;
                self.store(&class.name, value)?;
            }
            StmtKind::Raise(value) => {
                let exc = match value {
                    Some(expr) => {
                        let value = self.eval(expr)?;
                        self.make_exception(value)?
                    }
                    None => match self.handling.last() {
                        Some(active) => active.clone(),
                        None => Exc::new("RuntimeError", "No active exception to reraise"),
                    },
                };
                return Err(exc);
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(expr) => self.eval(expr)?.to_str(),
                        None => String::new(),
                    };
                    return Err(Exc::new("AssertionError", message));
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = builtins::import_module(&alias.name)?;
                    let bound = alias.asname.as_deref().unwrap_or(&alias.name);
                    self.store(bound, module)?;
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let Value::Module(module) = builtins::import_module(module)? else {
                    return Ok(Flow::Normal);
                };
                for alias in names {
                    if alias.name == "*" {
                        for (name, value) in builtins::module_exports(module) {
                            self.store(&name, value)?;
                        }
                        continue;
                    }
                    let value = builtins::module_attr(module, &alias.name).ok_or_else(|| {
                        Exc::new(
                            "ImportError",
                            format!("cannot import name '{}' from '{module}'", alias.name),
                        )
                    })?;
                    self.store(alias.asname.as_deref().unwrap_or(&alias.name), value)?;
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Result<Flow, Exc> {
        let result = match self.exec_block(body) {
            Ok(Flow::Normal) => self.exec_block(orelse),
            Ok(flow) => Ok(flow),
            Err(exc) if exc.fatal => return Err(exc),
            Err(exc) => self.handle(exc, handlers),
        };
        if finalbody.is_empty() {
            return result;
        }
        if let Err(exc) = &result {
            if exc.fatal {
                return result;
            }
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => result,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, exc: Exc, handlers: &[Handler]) -> Result<Flow, Exc> {
        for handler in handlers {
            self.tick(handler.line)?;
            let matched = match &handler.exc_type {
                None => true,
                Some(expr) => {
                    let filter = self.eval(expr).map_err(|e| e.at(handler.line))?;
                    self.handler_matches(&exc, &filter)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store(name, exc.clone().into_value())?;
            }
            self.handling.push(exc);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                // The name may already have been deleted by the handler body.
                let _ = self.unbind(name);
            }
            return result;
        }
        Err(exc)
    }

    fn handler_matches(&self, exc: &Exc, filter: &Value) -> Result<bool, Exc> {
        Ok(match filter {
            Value::ExceptionType(handler) => {
                let kind = match &exc.value {
                    Some(Value::Instance(inst)) => {
                        inst.class.exception_base().unwrap_or("Exception")
                    }
                    _ => exc.kind.as_str(),
                };
                exception_matches(kind, handler)
            }
            Value::Class(class) => {
                matches!(&exc.value, Some(Value::Instance(inst)) if inst.class.is_subclass_of(class))
            }
            Value::Tuple(filters) => {
                for filter in filters.iter() {
                    if self.handler_matches(exc, filter)? {
                        return Ok(true);
                    }
                }
                false
            }
            _ => {
                return Err(Exc::type_error(
                    "catching classes that do not inherit from BaseException is not allowed",
                ))
            }
        })
    }

    fn make_exception(&mut self, value: Value) -> Result<Exc, Exc> {
        match &value {
            Value::Exception(obj) => Ok(Exc {
                value: Some(value.clone()),
                ..Exc::new(obj.kind.clone(), obj.message())
            }),
            Value::ExceptionType(kind) => Ok(Exc::new(*kind, "")),
            Value::Class(class) if class.exception_base().is_some() => {
                let instance = self.instantiate(class, Vec::new(), Vec::new())?;
                self.make_exception(instance)
            }
            Value::Instance(inst) if inst.class.exception_base().is_some() => Ok(Exc {
                value: Some(value.clone()),
                ..Exc::new(inst.class.name.clone(), inst.exception_message())
            }),
            _ => Err(Exc::type_error("exceptions must derive from BaseException")),
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Result<Value, Exc> {
        let defaults = def
            .params
            .iter()
            .map(|param| param.default.as_ref().map(|d| self.eval(d)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        let scope = match self.scope.kind {
            ScopeKind::Class => self.scope.parent.clone().unwrap_or_else(|| self.globals.clone()),
            _ => self.scope.clone(),
        };
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            defaults,
            scope,
            qualname: self.qualify(&def.name),
            layout: Rc::new(FrameLayout::of(def)),
        })))
    }

    fn make_class(&mut self, class: &ClassDef) -> Result<Value, Exc> {
        let bases = class
            .bases
            .iter()
            .map(|b| self.eval(b))
            .filter(|b| !matches!(b, Ok(Value::Builtin("object"))))
            .collect::<Result<Vec<_>, _>>()?;
        let body_scope = Scope::child(ScopeKind::Class, &self.scope, self.qualify(&class.name));
        let saved = std::mem::replace(&mut self.scope, body_scope.clone());
        let result = self.exec_block(&class.body);
        self.scope = saved;
        result?;
        let attrs = body_scope.vars.take();
        Ok(Value::Class(Rc::new(ClassObj {
            name: class.name.clone(),
            bases,
            attrs: RefCell::new(attrs),
        })))
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Result<(), Exc> {
        match target {
            Expr::Name(name) => {
                let current = self.load(name)?;
                let rhs = self.eval(value)?;
                let updated = self.in_place(op, current, rhs)?;
                self.store(name, updated)
            }
            Expr::Attribute(object, attr) => {
                let object = self.eval(object)?;
                let current = self.getattr(&object, attr)?;
                let rhs = self.eval(value)?;
                let updated = self.in_place(op, current, rhs)?;
                self.setattr(&object, attr, updated)
            }
            Expr::Subscript(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                let updated = self.in_place(op, current, rhs)?;
                self.set_item(&object, index, updated)
            }
            _ => Err(Exc::new(
                "SyntaxError",
                "illegal expression for augmented assignment",
            )),
        }
    }

    /// Augmented operators mutate lists, deques, sets and dicts in place.
    fn in_place(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value, Exc> {
        match (&current, op) {
            (Value::List(items), BinOp::Add) => {
                let extra = builtins::iterate(&rhs)?;
                items.borrow_mut().extend(extra);
                Ok(current)
            }
            (Value::Deque(items), BinOp::Add) => {
                let extra = builtins::iterate(&rhs)?;
                items.borrow_mut().extend(extra);
                Ok(current)
            }
            (Value::List(items), BinOp::Mul) => {
                if let Value::List(repeated) = ops::binary(op, &current, &rhs)? {
                    let repeated = repeated.take();
                    *items.borrow_mut() = repeated;
                }
                Ok(current)
            }
            (Value::Set(table), BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor) => {
                if let Value::Set(result) = ops::binary(op, &current, &rhs)? {
                    let result = result.take();
                    *table.borrow_mut() = result;
                }
                Ok(current)
            }
            (Value::Dict(dict), BinOp::BitOr | BinOp::Add | BinOp::Sub) => {
                if let Value::Dict(result) = ops::binary(op, &current, &rhs)? {
                    let table = result.borrow().table.clone();
                    dict.borrow_mut().table = table;
                }
                Ok(current)
            }
            _ => ops::binary(op, &current, &rhs),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), Exc> {
        match target {
            Expr::Name(name) => self.store(name, value),
            Expr::Attribute(object, attr) => {
                let object = self.eval(object)?;
                self.setattr(&object, attr, value)
            }
            Expr::Subscript(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.set_item(&object, index, value)
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let values = builtins::iterate(&value).map_err(|_| {
                    Exc::type_error(format!(
                        "cannot unpack non-iterable {} object",
                        value.type_name()
                    ))
                })?;
                if let Some(star) = targets.iter().position(|t| matches!(t, Expr::Starred(_))) {
                    return self.assign_starred(targets, star, values);
                }
                if values.len() != targets.len() {
                    let message = if values.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            values.len()
                        )
                    };
                    return Err(Exc::value_error(message));
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(())
            }
            _ => Err(Exc::new("SyntaxError", "cannot assign to expression")),
        }
    }

    /// `a, *rest, z = values`: the starred target takes a list of the middle.
    fn assign_starred(
        &mut self,
        targets: &[Expr],
        star: usize,
        mut values: Vec<Value>,
    ) -> Result<(), Exc> {
        let required = targets.len() - 1;
        if values.len() < required {
            return Err(Exc::value_error(format!(
                "not enough values to unpack (expected at least {required}, got {})",
                values.len()
            )));
        }
        let tail = values.split_off(values.len() - (required - star));
        let middle = values.split_off(star);
        for (target, value) in targets[..star].iter().zip(values) {
            self.assign(target, value)?;
        }
        if let Expr::Starred(inner) = &targets[star] {
            self.assign(inner, Value::list(middle))?;
        }
        for (target, value) in targets[star + 1..].iter().zip(tail) {
            self.assign(target, value)?;
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr) -> Result<(), Exc> {
        match target {
            Expr::Name(name) => self.unbind(name),
            Expr::Subscript(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.del_item(&object, index)
            }
            Expr::Attribute(object, attr) => match self.eval(object)? {
                Value::Instance(inst) => match inst.attrs.borrow_mut().remove(attr.as_str()) {
                    Some(_) => Ok(()),
                    None => Err(Exc::attribute_error(&Value::Instance(inst.clone()), attr)),
                },
                other => Err(Exc::attribute_error(&other, attr)),
            },
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete(item)?;
                }
                Ok(())
            }
            _ => Err(Exc::new("SyntaxError", "cannot delete expression")),
        }
    }

    // ----- expressions -------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> Result<Value, Exc> {
        match expr {
            Expr::Const(constant) => Ok(match constant {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::BigInt(i) => Value::from_bigint(i.clone()),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.load(name),
            Expr::List(items) => Ok(Value::list(self.eval_elements(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_elements(items)?)),
            Expr::Set(items) => {
                let mut table = Table::default();
                for item in self.eval_elements(items)? {
                    table.insert(item.hash_key()?, item, Value::None);
                }
                Ok(Value::set(table))
            }
            Expr::Dict(pairs) => {
                let mut dict = PyDict::new(DictFlavor::Plain);
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.table.insert(key.hash_key()?, key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::BinOp(left, op, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Compare { left, ops: chain } => {
                let mut left = self.eval(left)?;
                for (op, right) in chain {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let args = self.eval_elements(args)?;
                let kwargs = kwargs
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.eval(value)?)))
                    .collect::<Result<Vec<_>, Exc>>()?;
                self.call_value(&callee, args, kwargs)
            }
            Expr::Attribute(object, attr) => {
                let object = self.eval(object)?;
                self.getattr(&object, attr)
            }
            Expr::Subscript(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.get_item(&object, &index)
            }
            Expr::Slice { .. } | Expr::Starred(_) => Err(Exc::new(
                "SyntaxError",
                "starred or slice expression used outside a subscript or call",
            )),
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp(element, generators) => self.comprehension(
                CompBody::Element(element),
                generators,
                CompSink::List(Vec::new()),
            ),
            Expr::SetComp(element, generators) => self.comprehension(
                CompBody::Element(element),
                generators,
                CompSink::Set(Table::default()),
            ),
            Expr::DictComp(key, value, generators) => self.comprehension(
                CompBody::Entry(key, value),
                generators,
                CompSink::Dict(PyDict::new(DictFlavor::Plain)),
            ),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field { expr, repr, spec } => {
                            let mut value = self.eval(expr)?;
                            if *repr {
                                value = Value::str(&value.repr());
                            }
                            match spec {
                                Some(spec) => out.push_str(&builtins::format_value(&value, spec)?),
                                None => out.push_str(&value.to_str()),
                            }
                        }
                    }
                }
                Ok(Value::str(&out))
            }
        }
    }

    fn eval_elements(&mut self, items: &[Expr]) -> Result<Vec<Value>, Exc> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => {
                    let inner = self.eval(inner)?;
                    values.extend(builtins::iterate(&inner)?);
                }
                other => values.push(self.eval(other)?),
            }
        }
        Ok(values)
    }

    fn eval_index(&mut self, index: &Expr) -> Result<Index, Exc> {
        let Expr::Slice { lower, upper, step } = index else {
            return Ok(Index::Item(self.eval(index)?));
        };
        let mut bound = |part: &Option<Box<Expr>>| -> Result<Option<i64>, Exc> {
            match part {
                None => Ok(None),
                Some(expr) => match self.eval(expr)? {
                    Value::None => Ok(None),
                    value => value.as_int().map(Some).ok_or_else(|| {
                        Exc::type_error(
                            "slice indices must be integers or None or have an __index__ method",
                        )
                    }),
                },
            }
        };
        Ok(Index::Slice(bound(lower)?, bound(upper)?, bound(step)?))
    }

    fn comprehension(
        &mut self,
        body: CompBody<'_>,
        generators: &[Comprehension],
        mut sink: CompSink,
    ) -> Result<Value, Exc> {
        let Some(first) = generators.first() else {
            return Ok(sink.finish());
        };
        // The outermost iterable is evaluated in the enclosing scope.
        let outer = self.eval(&first.iter)?;
        let label = match self.scope.kind {
            ScopeKind::Module => "<listcomp>".to_string(),
            _ => format!("{}.<locals>.<listcomp>", self.scope.label),
        };
        let scope = Scope::child(ScopeKind::Comprehension, &self.scope, label);
        let saved = std::mem::replace(&mut self.scope, scope);
        // Entering the comprehension and every item it pulls count as steps on the enclosing line.
        let line = self.line;
        let result = self.tick(line).and_then(|()| {
            self.comprehension_level(&body, generators, 0, Some(outer), &mut sink, line)
        });
        self.scope = saved;
        result.map(|()| sink.finish())
    }

    fn comprehension_level(
        &mut self,
        body: &CompBody<'_>,
        generators: &[Comprehension],
        level: usize,
        iterable: Option<Value>,
        sink: &mut CompSink,
        line: u32,
    ) -> Result<(), Exc> {
        let Some(generator) = generators.get(level) else {
            return Ok(());
        };
        let iterable = match iterable {
            Some(value) => value,
            None => self.eval(&generator.iter)?,
        };
        let mut cursor = Cursor::over(&iterable)?;
        'items: while let Some(item) = cursor.next_item()? {
            self.tick(line)?;
            self.assign(&generator.target, item)?;
            for condition in &generator.ifs {
                if !self.eval(condition)?.truthy() {
                    continue 'items;
                }
            }
            if level + 1 < generators.len() {
                self.comprehension_level(body, generators, level + 1, None, sink, line)?;
                continue;
            }
            match (body, &mut *sink) {
                (CompBody::Element(element), CompSink::List(items)) => {
                    if items.len() >= MAX_SEQUENCE {
                        return Err(Exc::new("MemoryError", "comprehension too large"));
                    }
                    items.push(self.eval(element)?);
                }
                (CompBody::Element(element), CompSink::Set(table)) => {
                    let value = self.eval(element)?;
                    table.insert(value.hash_key()?, value, Value::None);
                }
                (CompBody::Entry(key, value), CompSink::Dict(dict)) => {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.table.insert(key.hash_key()?, key, value);
                }
                _ => {
                    return Err(Exc::new(
                        "SyntaxError",
                        "comprehension body does not match its display",
                    ))
                }
            }
        }
        Ok(())
    }

    // ----- calls -------------------------------------------------------------

    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Exc> {
        match callee {
            Value::Function(closure) => {
                let scope = self.bind_arguments(closure, args, kwargs)?;
                self.run_frame(closure, scope)
            }
            Value::BoundMethod(method) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(method.receiver.clone());
                full.extend(args);
                self.call_value(&method.function, full, kwargs)
            }
            Value::Class(class) => self.instantiate(class, args, kwargs),
            Value::Builtin(name) => builtins::call_builtin(self, *name, args, kwargs),
            Value::Method(receiver, name) => {
                builtins::call_method(self, receiver, *name, args, kwargs)
            }
            Value::ExceptionType(kind) => {
                if let Some((key, _)) = kwargs.first() {
                    return Err(Exc::type_error(format!(
                        "{kind}() takes no keyword arguments, got '{key}'"
                    )));
                }
                Ok(builtins::exception_object(kind, args))
            }
            Value::Memo(memo) => {
                let mut parts = args
                    .iter()
                    .map(Value::hash_key)
                    .collect::<Result<Vec<_>, _>>()?;
                for (name, value) in &kwargs {
                    parts.push(HashKey::Str(Rc::from(name.as_str())));
                    parts.push(value.hash_key()?);
                }
                let key = HashKey::Tuple(parts);
                let cached = memo.cache.borrow().get(&key).cloned();
                if let Some(value) = cached {
                    return Ok(value);
                }
                let value = self.call_value(&memo.function, args, kwargs)?;
                memo.cache.borrow_mut().insert(key, value.clone());
                Ok(value)
            }
            other => Err(Exc::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// Binds arguments without running anything.
    pub fn prepare_call(&mut self, callee: &Value, args: Vec<Value>) -> Result<PreparedCall, Exc> {
        match callee {
            Value::Function(closure) => Ok(PreparedCall::Frame {
                closure: closure.clone(),
                scope: self.bind_arguments(closure, args, Vec::new())?,
            }),
            Value::BoundMethod(method) => match &method.function {
                Value::Function(closure) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(method.receiver.clone());
                    full.extend(args);
                    Ok(PreparedCall::Frame {
                        closure: closure.clone(),
                        scope: self.bind_arguments(closure, full, Vec::new())?,
                    })
                }
                _ => Ok(PreparedCall::Direct {
                    callee: callee.clone(),
                    args,
                }),
            },
            other => Ok(PreparedCall::Direct {
                callee: other.clone(),
                args,
            }),
        }
    }

    pub fn finish_call(&mut self, prepared: PreparedCall) -> Result<Value, Exc> {
        match prepared {
            PreparedCall::Frame { closure, scope } => self.run_frame(&closure, scope),
            PreparedCall::Direct { callee, args } => self.call_value(&callee, args, Vec::new()),
        }
    }

    fn bind_arguments(
        &mut self,
        closure: &Closure,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Rc<Scope>, Exc> {
        let params = &closure.def.params;
        let name = &closure.qualname;
        if args.len() > params.len() {
            let required = closure.defaults.iter().filter(|d| d.is_none()).count();
            let takes = if required == params.len() {
                plural(params.len(), "positional argument")
            } else {
                format!("from {required} to {} positional arguments", params.len())
            };
            let given = args.len();
            let verb = if given == 1 { "was" } else { "were" };
            return Err(Exc::type_error(format!(
                "{name}() takes {takes} but {given} {verb} given"
            )));
        }
        let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        slots.resize(params.len(), None);
        for (key, value) in kwargs {
            let Some(position) = params.iter().position(|p| p.name == key) else {
                return Err(Exc::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            };
            if slots[position].is_some() {
                return Err(Exc::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            slots[position] = Some(value);
        }
        let mut missing = Vec::new();
        let mut vars = HashMap::with_capacity(params.len());
        for ((param, slot), default) in params.iter().zip(slots).zip(&closure.defaults) {
            match slot.or_else(|| default.clone()) {
                Some(value) => {
                    vars.insert(param.name.clone(), value);
                }
                None => missing.push(param.name.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(Exc::type_error(format!(
                "{name}() missing {}: {}",
                plural(missing.len(), "required positional argument"),
                join_names(&missing)
            )));
        }
        Ok(Scope::frame(closure, vars))
    }

    fn run_frame(&mut self, closure: &Closure, scope: Rc<Scope>) -> Result<Value, Exc> {
        if self.depth >= self.limits.max_depth {
            return Err(Exc::new("RecursionError", "maximum recursion depth exceeded"));
        }
        self.charge(1)?;
        self.depth += 1;
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = self.exec_block(&closure.def.body);
        self.scope = saved;
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn instantiate(
        &mut self,
        class: &Rc<ClassObj>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Exc> {
        let instance = Value::Instance(Rc::new(Instance {
            class: class.clone(),
            attrs: RefCell::new(HashMap::new()),
        }));
        match class.lookup("__init__") {
            Some(init) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(instance.clone());
                full.extend(args);
                self.call_value(&init, full, kwargs)?;
            }
            None if class.exception_base().is_some() => {
                if let Value::Instance(inst) = &instance {
                    inst.attrs
                        .borrow_mut()
                        .insert("args".to_string(), Value::tuple(args));
                }
            }
            None if !args.is_empty() || !kwargs.is_empty() => {
                return Err(Exc::type_error(format!("{}() takes no arguments", class.name)));
            }
            None => {}
        }
        Ok(instance)
    }

    // ----- attributes --------------------------------------------------------

    pub fn getattr(&mut self, object: &Value, name: &str) -> Result<Value, Exc> {
        match object {
            Value::Instance(inst) => {
                if let Some(value) = inst.attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                match inst.class.lookup(name) {
                    Some(function @ (Value::Function(_) | Value::Memo(_))) => {
                        Ok(Value::BoundMethod(Rc::new(BoundMethod {
                            receiver: object.clone(),
                            function,
                        })))
                    }
                    Some(other) => Ok(other),
                    None => Err(Exc::attribute_error(object, name)),
                }
            }
            Value::Class(class) => class.lookup(name).ok_or_else(|| {
                Exc::new(
                    "AttributeError",
                    format!("type object '{}' has no attribute '{name}'", class.name),
                )
            }),
            Value::Module(module) => builtins::module_attr(module, name).ok_or_else(|| {
                Exc::new(
                    "AttributeError",
                    format!("module '{module}' has no attribute '{name}'"),
                )
            }),
            Value::Exception(exc) if name == "args" => Ok(Value::tuple(exc.args.clone())),
            other => match builtins::method_name(other, name) {
                Some(method) => Ok(Value::Method(Rc::new(other.clone()), method)),
                None => Err(Exc::attribute_error(other, name)),
            },
        }
    }

    fn setattr(&mut self, object: &Value, name: &str, value: Value) -> Result<(), Exc> {
        match object {
            Value::Instance(inst) => {
                inst.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(Exc::attribute_error(other, name)),
        }
    }

    // ----- subscripts --------------------------------------------------------

    fn call_dunder(
        &mut self,
        inst: &Rc<Instance>,
        name: &str,
        args: Vec<Value>,
    ) -> Option<Result<Value, Exc>> {
        let function = inst.class.lookup(name)?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Instance(inst.clone()));
        full.extend(args);
        Some(self.call_value(&function, full, Vec::new()))
    }

    fn index_error(kind: &str) -> Exc {
        Exc::index_error(format!("{kind} index out of range"))
    }

    fn int_index(container: &Value, index: &Value) -> Result<i64, Exc> {
        index.as_int().ok_or_else(|| {
            let message = match container {
                Value::Str(_) => format!("string indices must be integers, not '{}'", index.type_name()),
                Value::Deque(_) => format!("sequence index must be integer, not '{}'", index.type_name()),
                other => format!(
                    "{} indices must be integers or slices, not {}",
                    other.type_name(),
                    index.type_name()
                ),
            };
            Exc::type_error(message)
        })
    }

    pub fn get_item(&mut self, container: &Value, index: &Index) -> Result<Value, Exc> {
        match (container, index) {
            (Value::Dict(dict), Index::Item(key)) => {
                let hash = key.hash_key()?;
                let (found, flavor) = {
                    let dict = dict.borrow();
                    (dict.table.get(&hash).cloned(), dict.flavor.clone())
                };
                match (found, flavor) {
                    (Some(value), _) => Ok(value),
                    (None, DictFlavor::Counter) => Ok(Value::Int(0)),
                    (None, DictFlavor::Default(factory)) if !matches!(factory, Value::None) => {
                        let value = self.call_value(&factory, Vec::new(), Vec::new())?;
                        dict.borrow_mut().table.insert(hash, key.clone(), value.clone());
                        Ok(value)
                    }
                    (None, _) => Err(Exc::key_error(key)),
                }
            }
            (Value::List(items), Index::Item(i)) => {
                let i = Self::int_index(container, i)?;
                let items = items.borrow();
                normalize(i, items.len())
                    .map(|p| items[p].clone())
                    .ok_or_else(|| Self::index_error("list"))
            }
            (Value::Tuple(items), Index::Item(i)) => {
                let i = Self::int_index(container, i)?;
                normalize(i, items.len())
                    .map(|p| items[p].clone())
                    .ok_or_else(|| Self::index_error("tuple"))
            }
            (Value::Str(text), Index::Item(i)) => {
                let i = Self::int_index(container, i)?;
                let len = text.chars().count();
                normalize(i, len)
                    .and_then(|p| text.chars().nth(p))
                    .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                    .ok_or_else(|| Self::index_error("string"))
            }
            (Value::Deque(items), Index::Item(i)) => {
                let i = Self::int_index(container, i)?;
                let items = items.borrow();
                normalize(i, items.len())
                    .and_then(|p| items.get(p).cloned())
                    .ok_or_else(|| Self::index_error("deque"))
            }
            (Value::Range(range), Index::Item(i)) => {
                let i = Self::int_index(container, i)?;
                normalize(i, range.len())
                    .map(|p| Value::Int(range.get(p)))
                    .ok_or_else(|| Self::index_error("range object"))
            }
            (Value::List(items), Index::Slice(lo, hi, step)) => {
                let items = items.borrow();
                let bounds = slice_bounds(items.len(), *lo, *hi, *step)?;
                Ok(Value::list(
                    slice_positions(bounds).into_iter().map(|p| items[p].clone()).collect(),
                ))
            }
            (Value::Tuple(items), Index::Slice(lo, hi, step)) => {
                let bounds = slice_bounds(items.len(), *lo, *hi, *step)?;
                Ok(Value::tuple(
                    slice_positions(bounds).into_iter().map(|p| items[p].clone()).collect(),
                ))
            }
            (Value::Str(text), Index::Slice(lo, hi, step)) => {
                let chars: Vec<char> = text.chars().collect();
                let bounds = slice_bounds(chars.len(), *lo, *hi, *step)?;
                let sliced: String = slice_positions(bounds).into_iter().map(|p| chars[p]).collect();
                Ok(Value::str(&sliced))
            }
            (Value::Range(range), Index::Slice(lo, hi, step)) => {
                let (start, stop, step) = slice_bounds(range.len(), *lo, *hi, *step)?;
                let at = |i: i64| i128::from(range.start) + i128::from(i) * i128::from(range.step);
                let narrow = |v: i128| i64::try_from(v).map_err(|_| Exc::overflow());
                Ok(Value::Range(RangeValue {
                    start: narrow(at(start))?,
                    stop: narrow(at(stop))?,
                    step: narrow(i128::from(range.step) * i128::from(step))?,
                }))
            }
            (Value::Instance(inst), Index::Item(key)) => {
                match self.call_dunder(inst, "__getitem__", vec![key.clone()]) {
                    Some(result) => result,
                    None => Err(Exc::type_error(format!(
                        "'{}' object is not subscriptable",
                        container.type_name()
                    ))),
                }
            }
            (Value::Dict(_) | Value::Deque(_), Index::Slice(..)) => Err(Exc::type_error(format!(
                "'{}' object is not subscriptable by a slice",
                container.type_name()
            ))),
            _ => Err(Exc::type_error(format!(
                "'{}' object is not subscriptable",
                container.type_name()
            ))),
        }
    }

    pub fn set_item(&mut self, container: &Value, index: Index, value: Value) -> Result<(), Exc> {
        match (container, index) {
            (Value::Dict(dict), Index::Item(key)) => {
                let hash = key.hash_key()?;
                dict.borrow_mut().table.insert(hash, key, value);
                Ok(())
            }
            (Value::List(items), Index::Item(i)) => {
                let i = Self::int_index(container, &i)?;
                let mut items = items.borrow_mut();
                let position = normalize(i, items.len())
                    .ok_or_else(|| Exc::index_error("list assignment index out of range"))?;
                items[position] = value;
                Ok(())
            }
            (Value::Deque(items), Index::Item(i)) => {
                let i = Self::int_index(container, &i)?;
                let mut items = items.borrow_mut();
                let position = normalize(i, items.len())
                    .ok_or_else(|| Self::index_error("deque"))?;
                items[position] = value;
                Ok(())
            }
            (Value::List(items), Index::Slice(lo, hi, step)) => {
                let replacement = builtins::iterate(&value)?;
                let mut items = items.borrow_mut();
                let (start, stop, step) = slice_bounds(items.len(), lo, hi, step)?;
                if step == 1 {
                    let start = start as usize;
                    let stop = (stop.max(start as i64)) as usize;
                    items.splice(start..stop, replacement);
                    return Ok(());
                }
                let positions = slice_positions((start, stop, step));
                if positions.len() != replacement.len() {
                    return Err(Exc::value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        positions.len()
                    )));
                }
                for (position, item) in positions.into_iter().zip(replacement) {
                    items[position] = item;
                }
                Ok(())
            }
            (Value::Instance(inst), Index::Item(key)) => {
                match self.call_dunder(inst, "__setitem__", vec![key, value]) {
                    Some(result) => result.map(|_| ()),
                    None => Err(Exc::type_error(format!(
                        "'{}' object does not support item assignment",
                        container.type_name()
                    ))),
                }
            }
            _ => Err(Exc::type_error(format!(
                "'{}' object does not support item assignment",
                container.type_name()
            ))),
        }
    }

    fn del_item(&mut self, container: &Value, index: Index) -> Result<(), Exc> {
        match (container, index) {
            (Value::Dict(dict), Index::Item(key)) => {
                let hash = key.hash_key()?;
                let removed = dict.borrow_mut().table.remove(&hash);
                removed.map(|_| ()).ok_or_else(|| Exc::key_error(&key))
            }
            (Value::List(items), Index::Item(i)) => {
                let i = Self::int_index(container, &i)?;
                let mut items = items.borrow_mut();
                let position = normalize(i, items.len())
                    .ok_or_else(|| Exc::index_error("list assignment index out of range"))?;
                items.remove(position);
                Ok(())
            }
            (Value::Deque(items), Index::Item(i)) => {
                let i = Self::int_index(container, &i)?;
                let mut items = items.borrow_mut();
                let position = normalize(i, items.len())
                    .ok_or_else(|| Self::index_error("deque"))?;
                items.remove(position);
                Ok(())
            }
            (Value::List(items), Index::Slice(lo, hi, step)) => {
                let mut items = items.borrow_mut();
                let bounds = slice_bounds(items.len(), lo, hi, step)?;
                let mut positions = slice_positions(bounds);
                positions.sort_unstable_by(|a, b| b.cmp(a));
                for position in positions {
                    items.remove(position);
                }
                Ok(())
            }
            _ => Err(Exc::type_error(format!(
                "'{}' object does not support item deletion",
                container.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::parser::parse_module;

    fn limits() -> Limits {
        Limits {
            budget: Duration::from_secs(5),
            max_steps: 100_000,
            max_depth: 60,
        }
    }

    fn run(source: &str) -> Interp {
        let mut interp = Interp::new(limits());
        let module = parse_module(source).unwrap();
        interp.exec_module(&module).unwrap();
        interp
    }

    fn run_err(source: &str) -> Exc {
        let mut interp = Interp::new(limits());
        let module = parse_module(source).unwrap();
        interp.exec_module(&module).unwrap_err()
    }

    fn global_repr(interp: &Interp, name: &str) -> String {
        interp.global(name).map(|v| v.repr()).unwrap_or_default()
    }

    #[test]
    fn test_arithmetic_and_control_flow() {
        let interp = run(
            "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    total += i\nelse:\n    done = True\n",
        );
        assert_eq!(global_repr(&interp, "total"), "25");
        assert_eq!(global_repr(&interp, "done"), "True");
    }

    #[test]
    fn test_closures_and_nonlocal() {
        let interp = run(
            "def counter():\n    n = 0\n    def bump():\n        nonlocal n\n        n += 1\n        return n\n    return bump\nc = counter()\nc()\nc()\nresult = c()\n",
        );
        assert_eq!(global_repr(&interp, "result"), "3");
        assert_eq!(global_repr(&interp, "c"), "<function counter.<locals>.bump>");
    }

    #[test]
    fn test_unbound_local_error() {
        let err = run_err("x = 1\ndef f():\n    x += 1\n    return x\nf()\n");
        assert_eq!(err.kind, "UnboundLocalError");
        assert_eq!(
            err.message,
            "cannot access local variable 'x' where it is not associated with a value"
        );
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_global_declaration_writes_module_scope() {
        let interp = run("count = 0\ndef f():\n    global count\n    count += 5\nf()\n");
        assert_eq!(global_repr(&interp, "count"), "5");
    }

    #[test]
    fn test_class_methods_and_inheritance() {
        let interp = run(
            "class Base:\n    def greet(self):\n        return 'hi ' + self.name\nclass Child(Base):\n    def __init__(self, name):\n        self.name = name\nmsg = Child('bob').greet()\nok = isinstance(Child('x'), Base)\n",
        );
        assert_eq!(global_repr(&interp, "msg"), "'hi bob'");
        assert_eq!(global_repr(&interp, "ok"), "True");
    }

    #[test]
    fn test_try_except_finally_ordering() {
        let interp = run(
            "log = []\ntry:\n    log.append('body')\n    1 / 0\nexcept ZeroDivisionError as e:\n    log.append(str(e))\nelse:\n    log.append('else')\nfinally:\n    log.append('finally')\n",
        );
        assert_eq!(
            global_repr(&interp, "log"),
            "['body', 'division by zero', 'finally']"
        );
        assert!(interp.global("e").is_none());
    }

    #[test]
    fn test_user_exception_subclass_is_caught_by_base() {
        let interp = run(
            "class Bad(ValueError):\n    pass\ntry:\n    raise Bad('nope')\nexcept ValueError as e:\n    caught = str(e)\n",
        );
        assert_eq!(global_repr(&interp, "caught"), "'nope'");
    }

    #[test]
    fn test_bare_raise_rethrows_active_exception() {
        let err = run_err("try:\n    [][1]\nexcept IndexError:\n    raise\n");
        assert_eq!(err.kind, "IndexError");
        assert_eq!(err.message, "list index out of range");
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_slices_and_slice_assignment() {
        let interp = run(
            "a = [0, 1, 2, 3, 4, 5]\nb = a[::-2]\nc = a[1:4]\na[1:3] = ['x']\nd = 'hello'[-3:]\nr = range(10)[2:8:3]\ndel a[0]\n",
        );
        assert_eq!(global_repr(&interp, "b"), "[5, 3, 1]");
        assert_eq!(global_repr(&interp, "c"), "[1, 2, 3]");
        assert_eq!(global_repr(&interp, "a"), "['x', 3, 4, 5]");
        assert_eq!(global_repr(&interp, "d"), "'llo'");
        assert_eq!(global_repr(&interp, "r"), "range(2, 8, 3)");
    }

    #[test]
    fn test_comprehensions_do_not_leak_targets() {
        let interp = run(
            "squares = [x * x for x in range(5) if x % 2 == 0]\npairs = {k: v for k, v in zip('ab', [1, 2])}\nflat = [y for row in [[1, 2], [3]] for y in row]\n",
        );
        assert_eq!(global_repr(&interp, "squares"), "[0, 4, 16]");
        assert_eq!(global_repr(&interp, "pairs"), "{'a': 1, 'b': 2}");
        assert_eq!(global_repr(&interp, "flat"), "[1, 2, 3]");
        assert!(interp.global("x").is_none());
    }

    #[test]
    fn test_augmented_assignment_mutates_aliases() {
        let interp = run("a = [1]\nb = a\nb += [2]\ns = {1}\nt = s\nt |= {2}\n");
        assert_eq!(global_repr(&interp, "a"), "[1, 2]");
        assert_eq!(global_repr(&interp, "s"), "{1, 2}");
    }

    #[test]
    fn test_defaultdict_and_counter_lookups() {
        let interp = run(
            "from collections import defaultdict, Counter\ng = defaultdict(list)\ng['a'].append(1)\nc = Counter('abca')\nmissing = c['z']\n",
        );
        assert_eq!(global_repr(&interp, "g"), "defaultdict(<class 'list'>, {'a': [1]})");
        assert_eq!(global_repr(&interp, "missing"), "0");
    }

    #[test]
    fn test_lru_cache_memoizes() {
        let interp = run(
            "from functools import lru_cache\ncalls = []\n@lru_cache(maxsize=None)\ndef fib(n):\n    calls.append(n)\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\nv = fib(30)\nn = len(calls)\n",
        );
        assert_eq!(global_repr(&interp, "v"), "832040");
        assert_eq!(global_repr(&interp, "n"), "31");
    }

    #[test]
    fn test_recursion_limit_is_catchable() {
        let interp = run(
            "def f(n):\n    return f(n + 1)\ntry:\n    f(0)\nexcept RecursionError as e:\n    msg = str(e)\n",
        );
        assert_eq!(global_repr(&interp, "msg"), "'maximum recursion depth exceeded'");
    }

    #[test]
    fn test_step_budget_is_fatal() {
        let mut interp = Interp::new(Limits {
            max_steps: 50,
            ..limits()
        });
        let module = parse_module("try:\n    while True:\n        pass\nexcept Exception:\n    pass\n")
            .unwrap();
        let err = interp.exec_module(&module).unwrap_err();
        assert!(err.fatal);
        assert_eq!(err.kind, "TimeoutError");
    }

    #[test]
    fn test_binding_error_messages() {
        let err = run_err("def f(a, b):\n    pass\nf(1)\n");
        assert_eq!(err.message, "f() missing 1 required positional argument: 'b'");
        let err = run_err("def f(a, b, c):\n    pass\nf()\n");
        assert_eq!(
            err.message,
            "f() missing 3 required positional arguments: 'a', 'b', and 'c'"
        );
        let err = run_err("def f(a):\n    pass\nf(1, 2)\n");
        assert_eq!(err.message, "f() takes 1 positional argument but 2 were given");
        let err = run_err("def f(a, b=1):\n    pass\nf(1, 2, 3)\n");
        assert_eq!(
            err.message,
            "f() takes from 1 to 2 positional arguments but 3 were given"
        );
        let err = run_err("class S:\n    def m(self):\n        pass\nS().m(1)\n");
        assert_eq!(err.message, "S.m() takes 1 positional argument but 2 were given");
    }

    #[test]
    fn test_hook_records_lines_and_filters_private_names() {
        let mut interp = run(
            "def f(a):\n    _hidden = 1\n    total = 0\n    for x in a:\n        total += x\n    return total\n",
        );
        interp.install_hook();
        let function = interp.global("f").unwrap();
        let result = interp
            .call_value(&function, vec![Value::list(vec![Value::Int(1), Value::Int(2)])], Vec::new())
            .unwrap();
        let trace = interp.remove_hook();
        assert_eq!(result.repr(), "3");
        assert_eq!(trace.lines(), vec![2, 3, 4, 5, 4, 5, 4, 6]);
        let last = trace.last().unwrap();
        assert_eq!(last.variables.get("total").map(String::as_str), Some("3"));
        assert!(!last.variables.contains_key("_hidden"));
    }

    #[test]
    fn test_slice_bounds_match_python() {
        assert_eq!(slice_bounds(5, None, None, Some(-1)).unwrap(), (4, -1, -1));
        assert_eq!(slice_bounds(5, Some(-10), Some(10), None).unwrap(), (0, 5, 1));
        assert!(slice_bounds(5, None, None, Some(0)).is_err());
        assert_eq!(slice_positions((4, -1, -2)), vec![4, 2, 0]);
    }
}
