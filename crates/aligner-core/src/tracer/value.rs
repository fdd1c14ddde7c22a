//! Runtime values, hashing, equality, ordering and `repr` rendering.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use super::interp::Closure;

/// Largest container a single builtin may materialize.
pub const MAX_SEQUENCE: usize = 10_000_000;

/// Nesting depth past which acyclic structures render as `...`.
const MAX_REPR_DEPTH: usize = 200;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integers outside the `i64` range; never holds a value that fits.
    Long(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<PyDict>>),
    Set(Rc<RefCell<Table>>),
    Deque(Rc<RefCell<VecDeque<Value>>>),
    Range(RangeValue),
    Iter(Rc<RefCell<PyIter>>),
    Function(Rc<Closure>),
    Class(Rc<ClassObj>),
    Instance(Rc<Instance>),
    BoundMethod(Rc<BoundMethod>),
    Builtin(&'static str),
    Method(Rc<Value>, &'static str),
    Module(&'static str),
    Exception(Rc<ExceptionObj>),
    ExceptionType(&'static str),
    Memo(Rc<Memo>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let span = if step > 0 {
            (stop - start + step - 1) / step
        } else {
            (start - stop - step - 1) / (-step)
        };
        span.clamp(0, usize::MAX as i128) as usize
    }

    pub fn get(&self, index: usize) -> i64 {
        self.start + self.step * index as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

/// An eagerly materialized iterator (`enumerate`, `zip`, `map`, `iter`, ...).
pub struct PyIter {
    pub kind: &'static str,
    pub items: Vec<Value>,
    pub pos: usize,
}

impl PyIter {
    pub fn new(kind: &'static str, items: Vec<Value>) -> Self {
        Self { kind, items, pos: 0 }
    }

    pub fn next_item(&mut self) -> Option<Value> {
        let item = self.items.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    pub fn drain_rest(&mut self) -> Vec<Value> {
        let rest = self.items[self.pos.min(self.items.len())..].to_vec();
        self.pos = self.items.len();
        rest
    }
}

pub struct ClassObj {
    pub name: String,
    pub bases: Vec<Value>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

impl ClassObj {
    /// Attribute lookup through the class and then its bases, depth first.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(found) = self.attrs.borrow().get(name) {
            return Some(found.clone());
        }
        self.bases.iter().find_map(|base| match base {
            Value::Class(class) => class.lookup(name),
            _ => None,
        })
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<ClassObj>) -> bool {
        Rc::ptr_eq(self, other)
            || self.bases.iter().any(|base| match base {
                Value::Class(class) => class.is_subclass_of(other),
                _ => false,
            })
    }

    /// The builtin exception type this class ultimately derives from, if any.
    pub fn exception_base(&self) -> Option<&'static str> {
        self.bases.iter().find_map(|base| match base {
            Value::ExceptionType(kind) => Some(*kind),
            Value::Class(class) => class.exception_base(),
            _ => None,
        })
    }
}

pub struct Instance {
    pub class: Rc<ClassObj>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

impl Instance {
    /// `str()` of an instance of a user-defined exception class.
    pub fn exception_message(&self) -> String {
        match self.attrs.borrow().get("args") {
            Some(Value::Tuple(args)) => match args.as_slice() {
                [] => String::new(),
                [single] => single.to_str(),
                _ => Value::Tuple(args.clone()).repr(),
            },
            Some(other) => other.to_str(),
            None => String::new(),
        }
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

pub struct ExceptionObj {
    pub kind: String,
    pub args: Vec<Value>,
}

impl ExceptionObj {
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] => single.to_str(),
            many => Value::Tuple(Rc::new(many.to_vec())).repr(),
        }
    }
}

/// A function wrapped by `functools.lru_cache` / `functools.cache`.
pub struct Memo {
    pub function: Value,
    pub cache: RefCell<HashMap<HashKey, Value>>,
}

#[derive(Clone)]
pub enum DictFlavor {
    Plain,
    Default(Value),
    Counter,
}

#[derive(Clone)]
pub struct PyDict {
    pub table: Table,
    pub flavor: DictFlavor,
}

impl PyDict {
    pub fn new(flavor: DictFlavor) -> Self {
        Self {
            table: Table::default(),
            flavor,
        }
    }
}

/// Hashable projection of a value used as a dict/set key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Big(BigInt),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Identity(usize),
}

const HASH_MODULUS: u64 = (1 << 61) - 1;
const HASH_BITS: u32 = 61;

fn fold_hash(hash: i64) -> i64 {
    if hash == -1 {
        -2
    } else {
        hash
    }
}

fn hash_float(value: f64) -> i64 {
    if value.is_infinite() {
        return if value > 0.0 { 314_159 } else { -314_159 };
    }
    if value.is_nan() {
        return 0;
    }
    let (mut mantissa, mut exponent) = frexp(value);
    let sign = if mantissa < 0.0 {
        mantissa = -mantissa;
        -1
    } else {
        1
    };
    let mut x: u64 = 0;
    while mantissa != 0.0 {
        x = ((x << 28) & HASH_MODULUS) | (x >> (HASH_BITS - 28));
        mantissa *= 268_435_456.0;
        exponent -= 28;
        let digit = mantissa as u64;
        mantissa -= digit as f64;
        x += digit;
        if x >= HASH_MODULUS {
            x -= HASH_MODULUS;
        }
    }
    let bits = HASH_BITS as i32;
    let shift = if exponent >= 0 {
        exponent % bits
    } else {
        bits - 1 - ((-1 - exponent) % bits)
    } as u32;
    x = ((x << shift) & HASH_MODULUS) | (x >> (HASH_BITS - shift));
    fold_hash(x as i64 * sign)
}

/// `(m, e)` with `value == m * 2**e` and `0.5 <= |m| < 1`.
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 {
        return (value, 0);
    }
    let bits = value.to_bits();
    let raw_exponent = ((bits >> 52) & 0x7ff) as i32;
    if raw_exponent == 0 {
        let (m, e) = frexp(value * f64::from_bits(0x4350_0000_0000_0000));
        return (m, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, raw_exponent - 1022)
}

impl HashKey {
    /// The value CPython's `hash()` gives the equivalent object. Strings use
    /// a fixed-key SipHash so layouts are reproducible between runs.
    pub fn py_hash(&self) -> i64 {
        match self {
            HashKey::None => 0xFCA8_6420,
            HashKey::Int(i) => {
                let folded = (i.unsigned_abs() % HASH_MODULUS) as i64;
                fold_hash(if *i < 0 { -folded } else { folded })
            }
            HashKey::Big(n) => {
                let folded = (n.magnitude() % HASH_MODULUS).to_i64().unwrap_or(0);
                fold_hash(if n.sign() == num_bigint::Sign::Minus {
                    -folded
                } else {
                    folded
                })
            }
            HashKey::Float(bits) => hash_float(f64::from_bits(*bits)),
            HashKey::Str(text) => {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                fold_hash(hasher.finish() as i64)
            }
            HashKey::Tuple(items) => {
                const PRIME_1: u64 = 11_400_714_785_074_694_791;
                const PRIME_2: u64 = 14_029_467_366_897_019_727;
                const PRIME_5: u64 = 2_870_177_450_012_600_261;
                let mut acc = PRIME_5;
                for item in items {
                    let lane = item.py_hash() as u64;
                    acc = acc.wrapping_add(lane.wrapping_mul(PRIME_2));
                    acc = acc.rotate_left(31);
                    acc = acc.wrapping_mul(PRIME_1);
                }
                acc = acc.wrapping_add(items.len() as u64 ^ (PRIME_5 ^ 3_527_539));
                if acc == u64::MAX {
                    1_546_275_796
                } else {
                    acc as i64
                }
            }
            HashKey::Identity(address) => fold_hash((*address as u64).rotate_right(4) as i64),
        }
    }
}

const LINEAR_RUN: usize = 9;
const PERTURB_SHIFT: u32 = 5;
const SET_MINSIZE: usize = 8;

#[derive(Clone)]
enum Slot {
    Empty,
    Dummy,
    Full(u64, HashKey),
}

/// Slot geometry of CPython's set table; iteration walks the slots in order.
#[derive(Clone)]
struct SetLayout {
    slots: Vec<Slot>,
    fill: usize,
    used: usize,
    finger: usize,
}

impl SetLayout {
    fn with_size(size: usize) -> Self {
        Self {
            slots: vec![Slot::Empty; size],
            fill: 0,
            used: 0,
            finger: 0,
        }
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Slot search shared by insertion and lookup; stops at the first
    /// slot for which `stop` returns true.
    fn seek(&self, hash: u64, mut stop: impl FnMut(usize, &Slot) -> bool) -> usize {
        let mask = self.mask();
        let mut perturb = hash;
        let mut i = hash as usize & mask;
        loop {
            let run = if i + LINEAR_RUN <= mask { LINEAR_RUN } else { 0 };
            for offset in 0..=run {
                if stop(i + offset, &self.slots[i + offset]) {
                    return i + offset;
                }
            }
            perturb >>= PERTURB_SHIFT;
            i = (i.wrapping_mul(5).wrapping_add(1).wrapping_add(perturb as usize)) & mask;
        }
    }

    /// Insert a key known to be absent. The last dummy passed on the way to
    /// an empty slot is reused without growing `fill`.
    fn insert(&mut self, key: HashKey) {
        let hash = key.py_hash() as u64;
        let mut freed = None;
        let slot = self.seek(hash, |index, slot| match slot {
            Slot::Empty => true,
            Slot::Dummy => {
                freed = Some(index);
                false
            }
            Slot::Full(..) => false,
        });
        self.used += 1;
        if let Some(reused) = freed {
            self.slots[reused] = Slot::Full(hash, key);
            return;
        }
        self.slots[slot] = Slot::Full(hash, key);
        self.fill += 1;
        if self.fill * 5 >= self.mask() * 3 {
            let minused = if self.used > 50_000 { self.used * 2 } else { self.used * 4 };
            self.resize(minused);
        }
    }

    fn resize(&mut self, minused: usize) {
        let mut size = SET_MINSIZE;
        while size <= minused {
            size <<= 1;
        }
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; size]);
        self.fill = self.used;
        for slot in old {
            if let Slot::Full(hash, key) = slot {
                let target = self.seek(hash, |_, slot| matches!(slot, Slot::Empty));
                self.slots[target] = Slot::Full(hash, key);
            }
        }
    }

    fn remove(&mut self, key: &HashKey) {
        let hash = key.py_hash() as u64;
        let slot = self.seek(hash, |_, slot| match slot {
            Slot::Empty => true,
            Slot::Full(h, k) => *h == hash && k == key,
            Slot::Dummy => false,
        });
        if matches!(self.slots[slot], Slot::Full(..)) {
            self.slots[slot] = Slot::Dummy;
            self.used -= 1;
        }
    }

    /// The key `set.pop()` removes: first live slot at or after the finger.
    fn next_popped(&mut self) -> Option<HashKey> {
        if self.used == 0 {
            return None;
        }
        let size = self.slots.len();
        let mut i = self.finger % size;
        loop {
            if let Slot::Full(_, key) = &self.slots[i] {
                self.finger = i + 1;
                return Some(key.clone());
            }
            i = (i + 1) % size;
        }
    }

    fn keys(&self) -> impl Iterator<Item = &HashKey> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Full(_, key) => Some(key),
            _ => None,
        })
    }
}

/// Hash table backing dicts and sets. Dicts iterate in insertion order;
/// once converted with [`Table::hashed`], sets iterate in CPython slot order.
#[derive(Clone, Default)]
pub struct Table {
    entries: Vec<Option<(Value, Value)>>,
    index: HashMap<HashKey, usize>,
    layout: Option<SetLayout>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Switch to set iteration order, replaying the current keys in insertion order.
    pub fn hashed(mut self) -> Self {
        if self.layout.is_none() {
            let mut layout = SetLayout::with_size(SET_MINSIZE);
            for (key, _) in self.entries.iter().flatten() {
                if let Ok(hash) = key.hash_key() {
                    layout.insert(hash);
                }
            }
            self.layout = Some(layout);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        let slot = *self.index.get(key)?;
        self.entries[slot].as_ref().map(|(_, v)| v)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    /// Existing keys keep their original key object and position.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        if let Some(&slot) = self.index.get(&hash) {
            if let Some(entry) = self.entries[slot].as_mut() {
                entry.1 = value;
            }
            return;
        }
        if let Some(layout) = self.layout.as_mut() {
            layout.insert(hash.clone());
        }
        self.index.insert(hash, self.entries.len());
        self.entries.push(Some((key, value)));
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Value, Value)> {
        let slot = self.index.remove(hash)?;
        if let Some(layout) = self.layout.as_mut() {
            layout.remove(hash);
        }
        let entry = self.entries[slot].take();
        if self.entries.len() > 32 && self.index.len() * 2 < self.entries.len() {
            self.compact();
        }
        entry
    }

    pub fn pop_first(&mut self) -> Option<(Value, Value)> {
        let hash = match self.layout.as_mut() {
            Some(layout) => layout.next_popped()?,
            None => self.entries.iter().flatten().next()?.0.hash_key().ok()?,
        };
        self.remove(&hash)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let hash = self.entries.iter().rev().flatten().next()?.0.hash_key().ok()?;
        self.remove(&hash)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        if let Some(layout) = self.layout.as_mut() {
            *layout = SetLayout::with_size(SET_MINSIZE);
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &(Value, Value)> + '_> {
        match &self.layout {
            None => Box::new(self.entries.iter().flatten()),
            Some(layout) => Box::new(layout.keys().filter_map(move |key| {
                let slot = *self.index.get(key)?;
                self.entries[slot].as_ref()
            })),
        }
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        self.index.clear();
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some((key, _)) = entry {
                if let Ok(hash) = key.hash_key() {
                    self.index.insert(hash, slot);
                }
            }
        }
    }
}

/// A raised exception travelling up the interpreter stack.
#[derive(Clone)]
pub struct Exc {
    pub kind: String,
    pub message: String,
    pub line: Option<u32>,
    /// Resource-limit violations cannot be caught by `except`.
    pub fatal: bool,
    pub value: Option<Value>,
}

impl fmt::Debug for Exc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (line {:?})", self.kind, self.message, self.line)
    }
}

impl Exc {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            line: None,
            fatal: false,
            value: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new("IndexError", message)
    }

    pub fn key_error(key: &Value) -> Self {
        Self::new("KeyError", key.repr())
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new("ZeroDivisionError", message)
    }

    pub fn attribute_error(value: &Value, name: &str) -> Self {
        Self::new(
            "AttributeError",
            format!("'{}' object has no attribute '{name}'", value.type_name()),
        )
    }

    pub fn overflow() -> Self {
        Self::new("OverflowError", "integer result exceeds 64 bits")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::new("TimeoutError", message)
        }
    }

    pub fn at(mut self, line: u32) -> Self {
        self.line.get_or_insert(line);
        self
    }

    pub fn into_value(self) -> Value {
        match self.value {
            Some(value) => value,
            None => Value::Exception(Rc::new(ExceptionObj {
                kind: self.kind,
                args: if self.message.is_empty() {
                    Vec::new()
                } else {
                    vec![Value::str(&self.message)]
                },
            })),
        }
    }
}

pub const EXCEPTION_TYPES: &[&str] = &[
    "BaseException",
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "MemoryError",
    "ModuleNotFoundError",
    "NameError",
    "NotImplementedError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "StopIteration",
    "TimeoutError",
    "TypeError",
    "UnboundLocalError",
    "ValueError",
    "ZeroDivisionError",
];

fn exception_parent(kind: &str) -> Option<&'static str> {
    Some(match kind {
        "BaseException" => return None,
        "Exception" => "BaseException",
        "ZeroDivisionError" | "OverflowError" => "ArithmeticError",
        "IndexError" | "KeyError" => "LookupError",
        "RecursionError" | "NotImplementedError" => "RuntimeError",
        "UnboundLocalError" => "NameError",
        "ModuleNotFoundError" => "ImportError",
        _ => "Exception",
    })
}

/// `except handler:` matches `kind` or any of its ancestors.
pub fn exception_matches(kind: &str, handler: &str) -> bool {
    let mut current = Some(kind);
    while let Some(name) = current {
        if name == handler {
            return true;
        }
        current = exception_parent(name);
    }
    false
}

pub enum Num {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

impl Num {
    pub fn as_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Big(n) => n.to_f64().unwrap_or(f64::NAN),
            Num::Float(f) => *f,
        }
    }

    /// Exact integer value, `None` for floats.
    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Num::Int(i) => Some(BigInt::from(*i)),
            Num::Big(n) => Some(n.clone()),
            Num::Float(_) => None,
        }
    }
}

impl Value {
    pub fn str(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: PyDict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(table: Table) -> Value {
        Value::Set(Rc::new(RefCell::new(table.hashed())))
    }

    /// Normalizes back to `Int` when the value fits in 64 bits.
    pub fn from_bigint(n: BigInt) -> Value {
        match i64::try_from(&n) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Long(Rc::new(n)),
        }
    }

    pub fn as_num(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Long(n) => Some(Num::Big(n.as_ref().clone())),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(i64::from(b)),
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) | Value::Long(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(d) => match d.borrow().flavor {
                DictFlavor::Plain => "dict".into(),
                DictFlavor::Default(_) => "collections.defaultdict".into(),
                DictFlavor::Counter => "Counter".into(),
            },
            Value::Set(_) => "set".into(),
            Value::Deque(_) => "collections.deque".into(),
            Value::Range(_) => "range".into(),
            Value::Iter(it) => it.borrow().kind.into(),
            Value::Function(_) | Value::Memo(_) => "function".into(),
            Value::Class(_) | Value::ExceptionType(_) => "type".into(),
            Value::Instance(inst) => inst.class.name.clone(),
            Value::BoundMethod(_) => "method".into(),
            Value::Builtin(name) if is_type_builtin(name) => "type".into(),
            Value::Builtin(_) | Value::Method(..) => "builtin_function_or_method".into(),
            Value::Module(_) => "module".into(),
            Value::Exception(e) => e.kind.clone(),
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
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().table.is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Deque(d) => !d.borrow().is_empty(),
            Value::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    pub fn hash_key(&self) -> Result<HashKey, Exc> {
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(i) => HashKey::Int(*i),
            Value::Long(n) => HashKey::Big(n.as_ref().clone()),
            Value::Float(f) => match BigInt::from_f64(*f).filter(|_| f.fract() == 0.0) {
                Some(whole) => match i64::try_from(&whole) {
                    Ok(i) => HashKey::Int(i),
                    Err(_) => HashKey::Big(whole),
                },
                None => HashKey::Float(f.to_bits()),
            },
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(Value::hash_key)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Range(r) => HashKey::Tuple(vec![
                HashKey::Str(Rc::from("range")),
                HashKey::Int(r.start),
                HashKey::Int(r.stop),
                HashKey::Int(r.step),
            ]),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Deque(_) => {
                return Err(Exc::type_error(format!(
                    "unhashable type: '{}'",
                    self.type_name()
                )))
            }
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as *const u8 as usize),
            Value::Class(c) => HashKey::Identity(Rc::as_ptr(c) as *const u8 as usize),
            Value::Instance(i) => HashKey::Identity(Rc::as_ptr(i) as *const u8 as usize),
            Value::BoundMethod(m) => HashKey::Identity(Rc::as_ptr(m) as *const u8 as usize),
            Value::Exception(e) => HashKey::Identity(Rc::as_ptr(e) as *const u8 as usize),
            Value::Memo(m) => HashKey::Identity(Rc::as_ptr(m) as *const u8 as usize),
            Value::Iter(it) => HashKey::Identity(Rc::as_ptr(it) as *const u8 as usize),
            Value::Builtin(name) | Value::Module(name) | Value::ExceptionType(name) => {
                HashKey::Str(Rc::from(format!("<{name}>").as_str()))
            }
            Value::Method(receiver, name) => HashKey::Tuple(vec![
                receiver.hash_key()?,
                HashKey::Str(Rc::from(*name)),
            ]),
        })
    }

    /// `str(value)`
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message(),
            Value::Instance(inst) if inst.class.exception_base().is_some() => {
                inst.exception_message()
            }
            _ => self.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0, &mut Vec::new());
        out
    }

    /// `active` holds the containers currently being rendered; meeting one
    /// again prints the placeholder Python uses for recursive structures.
    fn write_repr(&self, out: &mut String, depth: usize, active: &mut Vec<usize>) {
        if depth > MAX_REPR_DEPTH {
            out.push_str("...");
            return;
        }
        let identity = match self {
            Value::List(items) => Some((Rc::as_ptr(items) as *const u8 as usize, "[...]")),
            Value::Dict(dict) => Some((Rc::as_ptr(dict) as *const u8 as usize, "{...}")),
            Value::Deque(items) => Some((Rc::as_ptr(items) as *const u8 as usize, "[...]")),
            _ => None,
        };
        let Some((id, placeholder)) = identity else {
            self.write_repr_inner(out, depth, active);
            return;
        };
        if active.contains(&id) {
            out.push_str(placeholder);
            return;
        }
        active.push(id);
        self.write_repr_inner(out, depth, active);
        active.pop();
    }

    fn write_repr_inner(&self, out: &mut String, depth: usize, active: &mut Vec<usize>) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Long(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => repr_str(s, out),
            Value::List(items) => {
                out.push('[');
                write_items(&items.borrow(), out, depth, active);
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(items, out, depth, active);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(dict) => {
                let dict = dict.borrow();
                match &dict.flavor {
                    DictFlavor::Plain => write_dict(dict.table.iter(), out, depth, active),
                    DictFlavor::Default(factory) => {
                        out.push_str("defaultdict(");
                        factory.write_repr(out, depth + 1, active);
                        out.push_str(", ");
                        write_dict(dict.table.iter(), out, depth, active);
                        out.push(')');
                    }
                    DictFlavor::Counter => {
                        out.push_str("Counter(");
                        if !dict.table.is_empty() {
                            write_dict(most_common(&dict.table).into_iter(), out, depth, active);
                        }
                        out.push(')');
                    }
                }
            }
            Value::Set(table) => {
                let table = table.borrow();
                if table.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    write_items(&table.keys(), out, depth, active);
                    out.push('}');
                }
            }
            Value::Deque(items) => {
                out.push_str("deque([");
                let items: Vec<Value> = items.borrow().iter().cloned().collect();
                write_items(&items, out, depth, active);
                out.push_str("])");
            }
            Value::Range(r) => {
                if r.step == 1 {
                    let _ = write!(out, "range({}, {})", r.start, r.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
                }
            }
            Value::Iter(it) => {
                let _ = write!(out, "<{} object>", it.borrow().kind);
            }
            Value::Function(f) => {
                let _ = write!(out, "<function {}>", f.qualname);
            }
            Value::Memo(m) => {
                out.push_str("<cached ");
                m.function.write_repr(out, depth + 1, active);
                out.push('>');
            }
            Value::Class(c) => {
                let _ = write!(out, "<class '{}'>", c.name);
            }
            Value::Instance(inst) => {
                let _ = write!(out, "<{} object>", inst.class.name);
            }
            Value::BoundMethod(m) => {
                out.push_str("<bound method ");
                match &m.function {
                    Value::Function(f) => out.push_str(&f.qualname),
                    other => other.write_repr(out, depth + 1, active),
                }
                out.push_str(" of ");
                m.receiver.write_repr(out, depth + 1, active);
                out.push('>');
            }
            Value::Builtin(name) if is_type_builtin(name) => {
                let _ = write!(out, "<class '{name}'>");
            }
            Value::Builtin(name) => {
                let _ = write!(out, "<built-in function {name}>");
            }
            Value::Method(receiver, name) => {
                let _ = write!(
                    out,
                    "<built-in method {name} of {} object>",
                    receiver.type_name()
                );
            }
            Value::Module(name) => {
                let _ = write!(out, "<module '{name}'>");
            }
            Value::Exception(e) => {
                out.push_str(&e.kind);
                out.push('(');
                write_items(&e.args, out, depth, active);
                out.push(')');
            }
            Value::ExceptionType(name) => {
                let _ = write!(out, "<class '{name}'>");
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

pub fn is_type_builtin(name: &str) -> bool {
    matches!(
        name,
        "int" | "float" | "str" | "bool" | "list" | "tuple" | "dict" | "set" | "object"
    )
}

fn write_items(items: &[Value], out: &mut String, depth: usize, active: &mut Vec<usize>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1, active);
    }
}

fn write_dict<'a>(
    entries: impl Iterator<Item = &'a (Value, Value)>,
    out: &mut String,
    depth: usize,
    active: &mut Vec<usize>,
) {
    out.push('{');
    for (i, (key, value)) in entries.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        key.write_repr(out, depth + 1, active);
        out.push_str(": ");
        value.write_repr(out, depth + 1, active);
    }
    out.push('}');
}

/// Counter entries ordered by descending count, ties in insertion order.
pub fn most_common(table: &Table) -> Vec<&(Value, Value)> {
    let mut entries: Vec<&(Value, Value)> = table.iter().collect();
    entries.sort_by(|a, b| py_cmp(&b.1, &a.1).unwrap_or(Ordering::Equal));
    entries
}

/// Python's `float.__repr__`: shortest round-trip digits, exponent beyond 1e16 / below 1e-4.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let text = format!("{f:?}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

fn repr_str(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
}

/// `a == b`
pub fn py_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return num_cmp(&x, &y) == Some(Ordering::Equal);
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow())
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::Deque(x), Value::Deque(y)) => {
            let x: Vec<Value> = x.borrow().iter().cloned().collect();
            let y: Vec<Value> = y.borrow().iter().cloned().collect();
            seq_eq(&x, &y)
        }
        (Value::Range(x), Value::Range(y)) => {
            x.len() == y.len() && (x.len() == 0 || (x.start == y.start && (x.len() == 1 || x.step == y.step)))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.table.len() == y.table.len()
                && x.table.iter().all(|(key, value)| {
                    key.hash_key()
                        .ok()
                        .and_then(|hash| y.table.get(&hash))
                        .is_some_and(|other| py_eq(value, other))
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(key, _)| key.hash_key().is_ok_and(|hash| y.contains(&hash)))
        }
        (Value::Builtin(x), Value::Builtin(y))
        | (Value::Module(x), Value::Module(y))
        | (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        _ => py_is(a, b),
    }
}

/// `a is b`
pub fn py_is(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Deque(x), Value::Deque(y)) => Rc::ptr_eq(x, y),
        (Value::Iter(x), Value::Iter(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(x, y),
        (Value::Instance(x), Value::Instance(y)) => Rc::ptr_eq(x, y),
        (Value::BoundMethod(x), Value::BoundMethod(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::Memo(x), Value::Memo(y)) => Rc::ptr_eq(x, y),
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y))
        | (Value::Module(x), Value::Module(y))
        | (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        _ => false,
    }
}

/// Integers compare exactly; any float involvement compares as `f64`.
/// `None` when a NaN is involved.
fn num_cmp(x: &Num, y: &Num) -> Option<Ordering> {
    match (x, y) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(y)),
        (Num::Float(_), _) | (_, Num::Float(_)) => x.as_f64().partial_cmp(&y.as_f64()),
        _ => Some(x.to_bigint()?.cmp(&y.to_bigint()?)),
    }
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !py_eq(x, y) {
            return py_cmp(x, y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// Ordering for `<`, `sorted`, `min`/`max` and heaps. `None` when the
/// operands are not orderable.
pub fn py_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return Some(num_cmp(&x, &y).unwrap_or(Ordering::Equal));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            seq_cmp(&x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y),
        _ => None,
    }
}

pub fn compare_error(op: &str, a: &Value, b: &Value) -> Exc {
    Exc::type_error(format!(
        "'{op}' not supported between instances of '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr_matches_python() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(2.5e-7), "2.5e-07");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(-0.0), "-0.0");
    }

    #[test]
    fn test_string_repr_quoting() {
        assert_eq!(Value::str("abc").repr(), "'abc'");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::str("both ' and \"").repr(), "'both \\' and \"'");
    }

    #[test]
    fn test_container_repr() {
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::tuple(vec![]).repr(), "()");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::str("x"), Value::None]).repr(),
            "[1, 'x', None]"
        );
        assert_eq!(Value::set(Table::default()).repr(), "set()");

        let mut dict = PyDict::new(DictFlavor::Plain);
        dict.table
            .insert(HashKey::Int(1), Value::Int(1), Value::Bool(true));
        assert_eq!(Value::dict(dict).repr(), "{1: True}");
    }

    #[test]
    fn test_bool_and_int_share_keys() {
        assert_eq!(Value::Bool(true).hash_key().unwrap(), HashKey::Int(1));
        assert_eq!(Value::Float(2.0).hash_key().unwrap(), HashKey::Int(2));
        assert!(Value::list(vec![]).hash_key().is_err());
    }

    #[test]
    fn test_table_keeps_insertion_order_after_removal() {
        let mut table = Table::default();
        for i in 0..40 {
            table.insert(HashKey::Int(i), Value::Int(i), Value::None);
        }
        for i in 0..30 {
            table.remove(&HashKey::Int(i));
        }
        table.insert(HashKey::Int(5), Value::Int(5), Value::None);
        let keys: Vec<String> = table.keys().iter().map(Value::repr).collect();
        assert_eq!(keys.first().map(String::as_str), Some("30"));
        assert_eq!(keys.last().map(String::as_str), Some("5"));
        assert_eq!(table.len(), 11);
    }

    fn int_set(values: impl IntoIterator<Item = i64>) -> Table {
        let mut table = Table::default().hashed();
        for v in values {
            table.insert(HashKey::Int(v), Value::Int(v), Value::None);
        }
        table
    }

    fn set_repr(table: Table) -> String {
        Value::set(table).repr()
    }

    #[test]
    fn test_set_iterates_in_slot_order() {
        assert_eq!(set_repr(int_set([3, 1, 2])), "{1, 2, 3}");
        assert_eq!(set_repr(int_set([-1, 1])), "{1, -1}");
        assert_eq!(
            set_repr(int_set((1..=10).rev())),
            "{1, 2, 3, 4, 5, 6, 7, 8, 9, 10}"
        );
        // a plain table replays its insertion order into the layout
        let mut plain = Table::default();
        for v in [30, 10, 20] {
            plain.insert(HashKey::Int(v), Value::Int(v), Value::None);
        }
        assert_eq!(set_repr(plain), "{10, 20, 30}");
    }

    #[test]
    fn test_set_reuses_freed_slots() {
        let mut table = int_set([7, 27, 29]);
        assert_eq!(set_repr(table.clone()), "{27, 29, 7}");
        table.remove(&HashKey::Int(27));
        table.remove(&HashKey::Int(29));
        for v in [37, 38, 5, 36] {
            table.insert(HashKey::Int(v), Value::Int(v), Value::None);
        }
        assert_eq!(set_repr(table), "{36, 37, 5, 38, 7}");
    }

    #[test]
    fn test_set_pop_walks_from_finger() {
        let mut table = int_set([5, 3, 9]);
        let popped = table.pop_first().map(|(key, _)| key.repr());
        assert_eq!(popped.as_deref(), Some("9"));
        let popped = table.pop_first().map(|(key, _)| key.repr());
        assert_eq!(popped.as_deref(), Some("3"));
    }

    #[test]
    fn test_hash_values_match_python() {
        assert_eq!(HashKey::Int(-1).py_hash(), -2);
        assert_eq!(HashKey::Float(1.5f64.to_bits()).py_hash(), 1_152_921_504_606_846_977);
        let pair = HashKey::Tuple(vec![HashKey::Int(1), HashKey::Int(2)]);
        assert_eq!(pair.py_hash(), -3_550_055_125_485_641_917);
        let big = HashKey::Big(BigInt::from(1u8) << 64u32);
        assert_eq!(big.py_hash(), 8);
    }

    #[test]
    fn test_self_referencing_containers_repr() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");

        let dict = Value::dict(PyDict::new(DictFlavor::Plain));
        if let Value::Dict(inner) = &dict {
            inner
                .borrow_mut()
                .table
                .insert(HashKey::Str("k".into()), Value::str("k"), dict.clone());
        }
        assert_eq!(dict.repr(), "{'k': {...}}");

        // shared but acyclic references print in full
        let shared = Value::list(vec![Value::Int(2)]);
        let outer = Value::list(vec![shared.clone(), shared]);
        assert_eq!(outer.repr(), "[[2], [2]]");
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::Int(1), &Value::str("1")));
    }

    #[test]
    fn test_sequence_ordering() {
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(py_cmp(&a, &b), Some(Ordering::Less));
        assert_eq!(py_cmp(&Value::Int(1), &Value::str("a")), None);
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = RangeValue { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let down = RangeValue { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert_eq!(down.get(2), 1);
    }

    #[test]
    fn test_exception_hierarchy() {
        assert!(exception_matches("KeyError", "LookupError"));
        assert!(exception_matches("ZeroDivisionError", "Exception"));
        assert!(!exception_matches("ValueError", "LookupError"));
    }
}
