//! Builtin functions, container methods and the supported standard modules.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, One, Signed};

use super::ast::BinOp;
use super::interp::Interp;
use super::ops;
use super::value::{
    compare_error, most_common, py_cmp, py_eq, ClassObj, DictFlavor, Exc, ExceptionObj,
    Instance, Memo, Num, PyDict, PyIter, RangeValue, Table, Value, EXCEPTION_TYPES,
    MAX_SEQUENCE,
};

type Kwargs = Vec<(String, Value)>;

const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bin", "bool", "chr", "dict", "divmod", "enumerate", "filter",
    "float", "hex", "int", "isinstance", "iter", "len", "list", "map", "max", "min", "next",
    "object", "oct", "ord", "pow", "print", "range", "reversed", "round", "set", "sorted",
    "str", "sum", "tuple", "zip",
];

const MODULES: &[&str] = &[
    "bisect",
    "collections",
    "functools",
    "heapq",
    "math",
    "string",
    "sys",
    "typing",
];

const MATH_FUNCTIONS: &[&str] = &[
    "math.ceil", "math.comb", "math.exp", "math.fabs", "math.factorial", "math.floor",
    "math.gcd", "math.isinf", "math.isnan", "math.isqrt", "math.lcm", "math.log",
    "math.log10", "math.log2", "math.sqrt", "math.trunc",
];

const HEAPQ_FUNCTIONS: &[&str] = &[
    "heapq.heapify", "heapq.heappop", "heapq.heappush", "heapq.heappushpop",
    "heapq.heapreplace", "heapq.nlargest", "heapq.nsmallest",
];

const BISECT_FUNCTIONS: &[&str] = &[
    "bisect.bisect", "bisect.bisect_left", "bisect.bisect_right", "bisect.insort",
    "bisect.insort_left", "bisect.insort_right",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove",
    "reverse", "sort",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const STR_METHODS: &[&str] = &[
    "capitalize", "count", "endswith", "find", "format", "index", "isalnum", "isalpha",
    "isdigit", "islower", "isnumeric", "isspace", "isupper", "join", "lower", "lstrip",
    "replace", "rfind", "rsplit", "rstrip", "split", "startswith", "strip", "title", "upper",
    "zfill",
];
const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update",
    "values",
];
const COUNTER_METHODS: &[&str] = &["most_common", "total"];
const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "discard", "intersection", "isdisjoint",
    "issubset", "issuperset", "pop", "remove", "symmetric_difference", "union", "update",
];
const DEQUE_METHODS: &[&str] = &[
    "append", "appendleft", "clear", "copy", "extend", "extendleft", "pop", "popleft",
    "rotate",
];

fn find_static(table: &'static [&'static str], name: &str) -> Option<&'static str> {
    table.iter().copied().find(|candidate| *candidate == name)
}

pub fn lookup_builtin(name: &str) -> Option<Value> {
    if let Some(found) = find_static(BUILTINS, name) {
        return Some(Value::Builtin(found));
    }
    find_static(EXCEPTION_TYPES, name).map(Value::ExceptionType)
}

pub fn import_module(name: &str) -> Result<Value, Exc> {
    find_static(MODULES, name)
        .map(Value::Module)
        .ok_or_else(|| Exc::new("ModuleNotFoundError", format!("No module named '{name}'")))
}

pub fn module_attr(module: &str, name: &str) -> Option<Value> {
    let qualified = format!("{module}.{name}");
    let function = |table: &'static [&'static str]| find_static(table, &qualified).map(Value::Builtin);
    match module {
        "math" => match name {
            "inf" => Some(Value::Float(f64::INFINITY)),
            "pi" => Some(Value::Float(std::f64::consts::PI)),
            "e" => Some(Value::Float(std::f64::consts::E)),
            _ => function(MATH_FUNCTIONS),
        },
        "heapq" => function(HEAPQ_FUNCTIONS),
        "bisect" => function(BISECT_FUNCTIONS),
        "collections" => match name {
            "defaultdict" => Some(Value::Builtin("defaultdict")),
            "deque" => Some(Value::Builtin("deque")),
            "Counter" => Some(Value::Builtin("Counter")),
            "OrderedDict" => Some(Value::Builtin("dict")),
            _ => None,
        },
        "functools" => match name {
            "lru_cache" => Some(Value::Builtin("lru_cache")),
            "cache" => Some(Value::Builtin("cache")),
            "reduce" => Some(Value::Builtin("functools.reduce")),
            _ => None,
        },
        "sys" => match name {
            "maxsize" => Some(Value::Int(i64::MAX)),
            "setrecursionlimit" => Some(Value::Builtin("sys.setrecursionlimit")),
            _ => None,
        },
        "string" => match name {
            "ascii_lowercase" => Some(Value::str("abcdefghijklmnopqrstuvwxyz")),
            "ascii_uppercase" => Some(Value::str("ABCDEFGHIJKLMNOPQRSTUVWXYZ")),
            "ascii_letters" => Some(Value::str(
                "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
            )),
            "digits" => Some(Value::str("0123456789")),
            _ => None,
        },
        // Annotations are never evaluated; the names only need to bind.
        "typing" => Some(Value::Builtin("typing")),
        _ => None,
    }
}

/// Names bound by `from module import *`.
pub fn module_exports(module: &str) -> Vec<(String, Value)> {
    let prefixed = |table: &'static [&'static str]| {
        table
            .iter()
            .filter_map(|q| {
                let short = q.split_once('.').map_or(*q, |(_, n)| n);
                module_attr(module, short).map(|v| (short.to_string(), v))
            })
            .collect::<Vec<_>>()
    };
    match module {
        "math" => {
            let mut names = prefixed(MATH_FUNCTIONS);
            for constant in ["inf", "pi", "e"] {
                if let Some(v) = module_attr("math", constant) {
                    names.push((constant.to_string(), v));
                }
            }
            names
        }
        "heapq" => prefixed(HEAPQ_FUNCTIONS),
        "bisect" => prefixed(BISECT_FUNCTIONS),
        "collections" => ["defaultdict", "deque", "Counter", "OrderedDict"]
            .iter()
            .filter_map(|n| module_attr(module, n).map(|v| (n.to_string(), v)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Resolves `receiver.name` to a builtin method, if the type has one.
pub fn method_name(receiver: &Value, name: &str) -> Option<&'static str> {
    match receiver {
        Value::List(_) => find_static(LIST_METHODS, name),
        Value::Tuple(_) => find_static(TUPLE_METHODS, name),
        Value::Str(_) => find_static(STR_METHODS, name),
        Value::Dict(dict) => {
            let counter = matches!(dict.borrow().flavor, DictFlavor::Counter);
            find_static(DICT_METHODS, name)
                .or_else(|| counter.then(|| find_static(COUNTER_METHODS, name)).flatten())
        }
        Value::Set(_) => find_static(SET_METHODS, name),
        Value::Deque(_) => find_static(DEQUE_METHODS, name),
        _ => None,
    }
}

// ----- argument helpers ------------------------------------------------------

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Exc> {
    let given = args.len();
    if given >= min && given <= max {
        return Ok(());
    }
    let message = if min == max {
        match min {
            0 => format!("{name}() takes no arguments ({given} given)"),
            1 => format!("{name}() takes exactly one argument ({given} given)"),
            n => format!("{name}() takes exactly {n} arguments ({given} given)"),
        }
    } else if given < min {
        format!("{name}() expected at least {min} arguments, got {given}")
    } else {
        format!("{name}() expected at most {max} arguments, got {given}")
    };
    Err(Exc::type_error(message))
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> Result<(), Exc> {
    match kwargs.first() {
        None => Ok(()),
        Some((key, _)) => Err(Exc::type_error(format!(
            "{name}() got an unexpected keyword argument '{key}'"
        ))),
    }
}

fn take_kwarg(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let index = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(index).1)
}

fn int_arg(value: &Value) -> Result<i64, Exc> {
    if let Value::Long(_) = value {
        return Err(Exc::new(
            "OverflowError",
            "Python int too large to convert to C ssize_t",
        ));
    }
    value.as_int().ok_or_else(|| {
        Exc::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn float_arg(name: &str, value: &Value) -> Result<f64, Exc> {
    value.as_num().map(|n| n.as_f64()).ok_or_else(|| {
        Exc::type_error(format!(
            "{name}() argument must be a real number, not '{}'",
            value.type_name()
        ))
    })
}

fn str_arg<'a>(name: &str, value: &'a Value) -> Result<&'a str, Exc> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(Exc::type_error(format!(
            "{name}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn is_none(value: &Value) -> bool {
    matches!(value, Value::None)
}

fn iter_value(kind: &'static str, items: Vec<Value>) -> Value {
    Value::Iter(Rc::new(RefCell::new(PyIter::new(kind, items))))
}

/// Materializes any iterable into a vector.
pub fn iterate(value: &Value) -> Result<Vec<Value>, Exc> {
    Ok(match value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Str(s) => s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect(),
        Value::Dict(dict) => dict.borrow().table.keys(),
        Value::Set(table) => table.borrow().keys(),
        Value::Deque(items) => items.borrow().iter().cloned().collect(),
        Value::Range(range) => {
            if range.len() > MAX_SEQUENCE {
                return Err(Exc::new("MemoryError", "range too large to materialize"));
            }
            (0..range.len()).map(|i| Value::Int(range.get(i))).collect()
        }
        Value::Iter(it) => it.borrow_mut().drain_rest(),
        other => {
            return Err(Exc::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    })
}

fn length(value: &Value) -> Result<usize, Exc> {
    Ok(match value {
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Str(s) => s.chars().count(),
        Value::Dict(dict) => dict.borrow().table.len(),
        Value::Set(table) => table.borrow().len(),
        Value::Deque(items) => items.borrow().len(),
        Value::Range(range) => range.len(),
        other => {
            return Err(Exc::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

fn table_from(items: Vec<Value>) -> Result<Table, Exc> {
    let mut table = Table::default();
    for item in items {
        table.insert(item.hash_key()?, item, Value::None);
    }
    Ok(table)
}

fn less_than(a: &Value, b: &Value) -> Result<bool, Exc> {
    py_cmp(a, b)
        .map(|o| o == Ordering::Less)
        .ok_or_else(|| compare_error("<", a, b))
}

/// Stable sort by optional key; `reverse` keeps equal elements in original order.
pub fn sort_values(
    interp: &mut Interp,
    items: &mut Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> Result<(), Exc> {
    let keys: Vec<Value> = match key {
        Some(f) if !is_none(f) => items
            .iter()
            .map(|item| interp.call_value(f, vec![item.clone()], Vec::new()))
            .collect::<Result<_, _>>()?,
        _ => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        let (x, y) = if reverse {
            (&keys[b], &keys[a])
        } else {
            (&keys[a], &keys[b])
        };
        py_cmp(x, y).unwrap_or_else(|| {
            failure.get_or_insert_with(|| compare_error("<", x, y));
            Ordering::Equal
        })
    });
    if let Some(exc) = failure {
        return Err(exc);
    }
    let sorted: Vec<Value> = order.iter().map(|&i| items[i].clone()).collect();
    *items = sorted;
    Ok(())
}

fn dict_from(value: &Value, flavor: DictFlavor) -> Result<PyDict, Exc> {
    let mut dict = PyDict::new(flavor);
    match value {
        Value::Dict(source) => {
            for (key, val) in source.borrow().table.iter() {
                dict.table.insert(key.hash_key()?, key.clone(), val.clone());
            }
        }
        other => {
            for (position, pair) in iterate(other)?.into_iter().enumerate() {
                let pair = iterate(&pair)?;
                let [key, val]: [Value; 2] = pair.try_into().map_err(|items: Vec<Value>| {
                    Exc::value_error(format!(
                        "dictionary update sequence element #{position} has length {}; 2 is required",
                        items.len()
                    ))
                })?;
                dict.table.insert(key.hash_key()?, key, val);
            }
        }
    }
    Ok(dict)
}

fn count_into(dict: &mut PyDict, items: Vec<Value>) -> Result<(), Exc> {
    for item in items {
        let hash = item.hash_key()?;
        let current = dict.table.get(&hash).cloned().unwrap_or(Value::Int(0));
        let next = ops::binary(BinOp::Add, &current, &Value::Int(1))?;
        dict.table.insert(hash, item, next);
    }
    Ok(())
}

fn select_extreme(
    interp: &mut Interp,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
    want: Ordering,
) -> Result<Value, Exc> {
    let key = take_kwarg(&mut kwargs, "key").filter(|k| !is_none(k));
    let default = take_kwarg(&mut kwargs, "default");
    no_kwargs(name, &kwargs)?;
    if args.is_empty() {
        return Err(Exc::type_error(format!(
            "{name} expected at least 1 argument, got 0"
        )));
    }
    let candidates = if args.len() == 1 {
        iterate(&args[0])?
    } else {
        args
    };
    let mut best: Option<(Value, Value)> = None;
    for item in candidates {
        let score = match &key {
            Some(f) => interp.call_value(f, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((_, best_score)) => match py_cmp(&score, best_score) {
                Some(order) => order == want,
                None => return Err(compare_error(if want == Ordering::Less { "<" } else { ">" }, &score, best_score)),
            },
        };
        if replace {
            best = Some((item, score));
        }
    }
    match (best, default) {
        (Some((item, _)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(Exc::value_error(format!("{name}() arg is an empty sequence"))),
    }
}

fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

/// Round to `digits` decimals from the float's exact binary value, ties to even.
fn round_to_digits(f: f64, digits: i64) -> f64 {
    if !f.is_finite() || digits > 330 {
        return f;
    }
    if digits < 0 {
        let scale = 10f64.powi(digits.max(-330) as i32);
        return round_half_even(f * scale) / scale;
    }
    format!("{:.*}", digits as usize, f).parse().unwrap_or(f)
}

/// `round(i, digits)` for negative `digits`, ties to even.
fn round_int(i: &BigInt, digits: i64) -> Value {
    if digits >= 0 {
        return Value::from_bigint(i.clone());
    }
    let Some(power) = u32::try_from(digits.unsigned_abs()).ok().filter(|p| *p <= 4096) else {
        return Value::Int(0);
    };
    let unit = BigInt::from(10).pow(power);
    let (quotient, remainder) = num_integer::Integer::div_mod_floor(i, &unit);
    let twice = &remainder * 2;
    let round_up = twice > unit || (twice == unit && num_integer::Integer::is_odd(&quotient));
    let quotient = if round_up { quotient + 1 } else { quotient };
    Value::from_bigint(quotient * unit)
}

fn float_to_int(f: f64) -> Result<Value, Exc> {
    if f.is_nan() {
        return Err(Exc::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Exc::new(
            "OverflowError",
            "cannot convert float infinity to integer",
        ));
    }
    if f.abs() < 9.0e18 {
        return Ok(Value::Int(f as i64));
    }
    BigInt::from_f64(f.trunc())
        .map(Value::from_bigint)
        .ok_or_else(|| Exc::value_error("cannot convert float to integer"))
}

fn parse_int(text: &str, base: u32) -> Result<Value, Exc> {
    let invalid = || {
        Exc::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr()
        ))
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = match base {
        16 => digits.trim_start_matches("0x").trim_start_matches("0X"),
        8 => digits.trim_start_matches("0o").trim_start_matches("0O"),
        2 => digits.trim_start_matches("0b").trim_start_matches("0B"),
        _ => digits,
    };
    let cleaned = digits.replace('_', "");
    if cleaned.is_empty() || digits.starts_with('_') || digits.ends_with('_') {
        return Err(invalid());
    }
    let magnitude = BigInt::parse_bytes(cleaned.as_bytes(), base).ok_or_else(invalid)?;
    if cleaned.starts_with(['+', '-']) {
        return Err(invalid());
    }
    Ok(Value::from_bigint(if negative { -magnitude } else { magnitude }))
}

fn parse_float(text: &str) -> Result<f64, Exc> {
    let trimmed = text.trim();
    let lowered = trimmed.to_ascii_lowercase();
    match lowered.trim_start_matches(['+', '-']) {
        "inf" | "infinity" => {
            return Ok(if lowered.starts_with('-') {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            })
        }
        "nan" => return Ok(f64::NAN),
        _ => {}
    }
    trimmed.replace('_', "").parse::<f64>().map_err(|_| {
        Exc::value_error(format!(
            "could not convert string to float: {}",
            Value::str(text).repr()
        ))
    })
}

fn radix_text(value: i64, radix: u32, prefix: &str) -> String {
    let magnitude = value.unsigned_abs();
    let digits = match radix {
        2 => format!("{magnitude:b}"),
        8 => format!("{magnitude:o}"),
        _ => format!("{magnitude:x}"),
    };
    if value < 0 {
        format!("-{prefix}{digits}")
    } else {
        format!("{prefix}{digits}")
    }
}

fn isinstance_of(value: &Value, spec: &Value) -> Result<bool, Exc> {
    Ok(match spec {
        Value::Tuple(specs) => {
            for spec in specs.iter() {
                if isinstance_of(value, spec)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Builtin(name) => match *name {
            "int" => matches!(value, Value::Int(_) | Value::Long(_) | Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "str" => matches!(value, Value::Str(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            "set" => matches!(value, Value::Set(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "deque" => matches!(value, Value::Deque(_)),
            "defaultdict" => matches!(value, Value::Dict(d) if matches!(d.borrow().flavor, DictFlavor::Default(_))),
            "Counter" => matches!(value, Value::Dict(d) if matches!(d.borrow().flavor, DictFlavor::Counter)),
            "object" => true,
            _ => false,
        },
        Value::Class(class) => {
            matches!(value, Value::Instance(inst) if inst.class.is_subclass_of(class))
        }
        Value::ExceptionType(kind) => match value {
            Value::Exception(exc) => super::value::exception_matches(&exc.kind, kind),
            Value::Instance(inst) => inst
                .class
                .exception_base()
                .is_some_and(|base| super::value::exception_matches(base, kind)),
            _ => false,
        },
        other => {
            return Err(Exc::type_error(format!(
                "isinstance() arg 2 must be a type, a tuple of types, or a union, not {}",
                other.type_name()
            )))
        }
    })
}

fn modular_pow(base: i64, exp: i64, modulus: i64) -> Result<i64, Exc> {
    if modulus == 0 {
        return Err(Exc::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(Exc::value_error(
            "pow() negative exponent with a modulus is not supported",
        ));
    }
    let m = i128::from(modulus);
    let mut result: i128 = 1;
    let mut b = i128::from(base).rem_euclid(m.abs());
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m.abs());
        }
        b = (b * b).rem_euclid(m.abs());
        e >>= 1;
    }
    if m < 0 && result != 0 {
        result += m;
    }
    i64::try_from(result).map_err(|_| Exc::overflow())
}

// ----- builtin functions -----------------------------------------------------

pub fn call_builtin(
    interp: &mut Interp,
    name: &'static str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Result<Value, Exc> {
    if let Some(function) = name.strip_prefix("math.") {
        no_kwargs(name, &kwargs)?;
        return call_math(function, &args);
    }
    if let Some(function) = name.strip_prefix("heapq.") {
        return call_heapq(interp, function, args, kwargs);
    }
    if let Some(function) = name.strip_prefix("bisect.") {
        return call_bisect(function, args, kwargs);
    }

    match name {
        "print" | "sys.setrecursionlimit" | "typing" => Ok(Value::None),
        "len" => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(length(&args[0])? as i64))
        }
        "range" => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(int_arg).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(Exc::type_error("range expected at most 3 arguments")),
            };
            if step == 0 {
                return Err(Exc::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(RangeValue { start, stop, step }))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match args[0].as_num() {
                Some(Num::Int(i)) => Ok(match i.checked_abs() {
                    Some(abs) => Value::Int(abs),
                    None => Value::from_bigint(BigInt::from(i).abs()),
                }),
                Some(Num::Big(n)) => Ok(Value::from_bigint(n.abs())),
                Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
                None => Err(Exc::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    args[0].type_name()
                ))),
            }
        }
        "min" => select_extreme(interp, name, args, kwargs, Ordering::Less),
        "max" => select_extreme(interp, name, args, kwargs, Ordering::Greater),
        "sum" => {
            let start = take_kwarg(&mut kwargs, "start");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(Exc::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in iterate(&args[0])? {
                total = ops::binary(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "sorted" => {
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|r| r.truthy());
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            sort_values(interp, &mut items, key.as_ref(), reverse)?;
            Ok(Value::list(items))
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Dict(_) | Value::Set(_) | Value::Iter(_) => Err(Exc::type_error(format!(
                    "'{}' object is not reversible",
                    args[0].type_name()
                ))),
                other => {
                    let mut items = iterate(other)?;
                    items.reverse();
                    Ok(iter_value("reversed", items))
                }
            }
        }
        "enumerate" => {
            let start = take_kwarg(&mut kwargs, "start");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).or(start.as_ref()) {
                Some(v) => int_arg(v)?,
                None => 0,
            };
            let items = iterate(&args[0])?
                .into_iter()
                .enumerate()
                .map(|(i, item)| Value::tuple(vec![Value::Int(start + i as i64), item]))
                .collect();
            Ok(iter_value("enumerate", items))
        }
        "zip" => {
            take_kwarg(&mut kwargs, "strict");
            no_kwargs(name, &kwargs)?;
            let columns = args.iter().map(iterate).collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let items = (0..rows)
                .map(|row| Value::tuple(columns.iter().map(|c| c[row].clone()).collect()))
                .collect();
            Ok(iter_value("zip", items))
        }
        "map" => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 2, usize::MAX)?;
            let function = args[0].clone();
            let columns = args[1..].iter().map(iterate).collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut items = Vec::with_capacity(rows);
            for row in 0..rows {
                let call_args = columns.iter().map(|c| c[row].clone()).collect();
                items.push(interp.call_value(&function, call_args, Vec::new())?);
            }
            Ok(iter_value("map", items))
        }
        "filter" => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 2, 2)?;
            let mut items = Vec::new();
            for item in iterate(&args[1])? {
                let keep = if is_none(&args[0]) {
                    item.truthy()
                } else {
                    interp
                        .call_value(&args[0], vec![item.clone()], Vec::new())?
                        .truthy()
                };
                if keep {
                    items.push(item);
                }
            }
            Ok(iter_value("filter", items))
        }
        "iter" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Iter(_) => Ok(args[0].clone()),
                other => Ok(iter_value("iterator", iterate(other)?)),
            }
        }
        "next" => {
            arity(name, &args, 1, 2)?;
            match &args[0] {
                Value::Iter(it) => match it.borrow_mut().next_item() {
                    Some(item) => Ok(item),
                    None => args
                        .get(1)
                        .cloned()
                        .ok_or_else(|| Exc::new("StopIteration", "")),
                },
                other => Err(Exc::type_error(format!(
                    "'{}' object is not an iterator",
                    other.type_name()
                ))),
            }
        }
        "any" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().any(Value::truthy)))
        }
        "all" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().all(Value::truthy)))
        }
        "list" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::list(match args.first() {
                Some(v) => iterate(v)?,
                None => Vec::new(),
            }))
        }
        "tuple" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(Value::Tuple(_)) => Ok(args[0].clone()),
                Some(v) => Ok(Value::tuple(iterate(v)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        "set" => {
            arity(name, &args, 0, 1)?;
            let items = match args.first() {
                Some(v) => iterate(v)?,
                None => Vec::new(),
            };
            Ok(Value::set(table_from(items)?))
        }
        "dict" => {
            arity(name, &args, 0, 1)?;
            let mut dict = match args.first() {
                Some(v) => dict_from(v, DictFlavor::Plain)?,
                None => PyDict::new(DictFlavor::Plain),
            };
            for (key, value) in kwargs {
                let key = Value::str(&key);
                dict.table.insert(key.hash_key()?, key, value);
            }
            Ok(Value::dict(dict))
        }
        "defaultdict" => {
            arity(name, &args, 0, 2)?;
            let factory = args.first().cloned().unwrap_or(Value::None);
            let mut dict = match args.get(1) {
                Some(v) => dict_from(v, DictFlavor::Default(factory.clone()))?,
                None => PyDict::new(DictFlavor::Default(factory.clone())),
            };
            dict.flavor = DictFlavor::Default(factory);
            Ok(Value::dict(dict))
        }
        "Counter" => {
            arity(name, &args, 0, 1)?;
            let mut dict = PyDict::new(DictFlavor::Counter);
            match args.first() {
                Some(Value::Dict(source)) => {
                    for (key, value) in source.borrow().table.iter() {
                        dict.table.insert(key.hash_key()?, key.clone(), value.clone());
                    }
                }
                Some(other) => count_into(&mut dict, iterate(other)?)?,
                None => {}
            }
            for (key, value) in kwargs {
                let key = Value::str(&key);
                dict.table.insert(key.hash_key()?, key, value);
            }
            Ok(Value::dict(dict))
        }
        "deque" => {
            if take_kwarg(&mut kwargs, "maxlen").is_some_and(|v| !is_none(&v)) {
                return Err(Exc::new(
                    "NotImplementedError",
                    "bounded deques are not supported",
                ));
            }
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            let items: VecDeque<Value> = match args.first() {
                Some(v) => iterate(v)?.into(),
                None => VecDeque::new(),
            };
            Ok(Value::Deque(Rc::new(RefCell::new(items))))
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(match args.first() {
                Some(v) => Value::str(&v.to_str()),
                None => Value::str(""),
            })
        }
        "int" => {
            let base = take_kwarg(&mut kwargs, "base");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 2)?;
            let base = match args.get(1).or(base.as_ref()) {
                Some(b) => Some(int_arg(b)?),
                None => None,
            };
            match (args.first(), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => {
                    let base = base.unwrap_or(10);
                    if !(2..=36).contains(&base) {
                        return Err(Exc::value_error("int() base must be >= 2 and <= 36, or 0"));
                    }
                    parse_int(s, base as u32)
                }
                (Some(_), Some(_)) => Err(Exc::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                (Some(v), None) => match v.as_num() {
                    Some(Num::Int(i)) => Ok(Value::Int(i)),
                    Some(Num::Big(n)) => Ok(Value::from_bigint(n)),
                    Some(Num::Float(f)) => float_to_int(f),
                    None => Err(Exc::type_error(format!(
                        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                        v.type_name()
                    ))),
                },
            }
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => Ok(Value::Float(parse_float(s)?)),
                Some(v) => Ok(Value::Float(float_arg(name, v)?)),
            }
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        "ord" => {
            arity(name, &args, 1, 1)?;
            let text = str_arg(name, &args[0])?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                _ => Err(Exc::type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    text.chars().count()
                ))),
            }
        }
        "chr" => {
            arity(name, &args, 1, 1)?;
            let code = int_arg(&args[0])?;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                .ok_or_else(|| Exc::value_error("chr() arg not in range(0x110000)"))
        }
        "divmod" => {
            arity(name, &args, 2, 2)?;
            let quotient = ops::binary(BinOp::FloorDiv, &args[0], &args[1])?;
            let remainder = ops::binary(BinOp::Mod, &args[0], &args[1])?;
            Ok(Value::tuple(vec![quotient, remainder]))
        }
        "pow" => {
            arity(name, &args, 2, 3)?;
            match args.get(2) {
                None => ops::binary(BinOp::Pow, &args[0], &args[1]),
                Some(modulus) => Ok(Value::Int(modular_pow(
                    int_arg(&args[0])?,
                    int_arg(&args[1])?,
                    int_arg(modulus)?,
                )?)),
            }
        }
        "round" => {
            let ndigits = take_kwarg(&mut kwargs, "ndigits");
            arity(name, &args, 1, 2)?;
            let ndigits = args.get(1).cloned().or(ndigits).filter(|v| !is_none(v));
            match (args[0].as_num(), ndigits) {
                (Some(Num::Float(f)), None) => float_to_int(round_half_even(f)),
                (Some(Num::Float(f)), Some(digits)) => {
                    Ok(Value::Float(round_to_digits(f, int_arg(&digits)?)))
                }
                (Some(n), digits) => {
                    let digits = match digits {
                        Some(digits) => int_arg(&digits)?,
                        None => 0,
                    };
                    Ok(round_int(&n.to_bigint().unwrap_or_default(), digits))
                }
                (None, _) => Err(Exc::type_error(format!(
                    "type {} doesn't define __round__ method",
                    args[0].type_name()
                ))),
            }
        }
        "isinstance" => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(isinstance_of(&args[0], &args[1])?))
        }
        "bin" | "hex" | "oct" => {
            arity(name, &args, 1, 1)?;
            let value = int_arg(&args[0])?;
            let text = match name {
                "bin" => radix_text(value, 2, "0b"),
                "oct" => radix_text(value, 8, "0o"),
                _ => radix_text(value, 16, "0x"),
            };
            Ok(Value::str(&text))
        }
        "object" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Instance(Rc::new(Instance {
                class: Rc::new(ClassObj {
                    name: "object".into(),
                    bases: Vec::new(),
                    attrs: RefCell::new(HashMap::new()),
                }),
                attrs: RefCell::new(HashMap::new()),
            })))
        }
        "lru_cache" | "cache" => {
            let function = args
                .first()
                .filter(|f| matches!(f, Value::Function(_) | Value::BoundMethod(_) | Value::Builtin(_)))
                .cloned();
            match function {
                Some(function) => Ok(Value::Memo(Rc::new(Memo {
                    function,
                    cache: RefCell::new(HashMap::new()),
                }))),
                // `@lru_cache(maxsize=None)` returns the decorator itself.
                None => Ok(Value::Builtin("cache")),
            }
        }
        "functools.reduce" => {
            arity(name, &args, 2, 3)?;
            let mut items = iterate(&args[1])?.into_iter();
            let mut acc = match args.get(2).cloned().or_else(|| items.next()) {
                Some(v) => v,
                None => {
                    return Err(Exc::type_error(
                        "reduce() of empty iterable with no initial value",
                    ))
                }
            };
            for item in items {
                acc = interp.call_value(&args[0], vec![acc, item], Vec::new())?;
            }
            Ok(acc)
        }
        other => Err(Exc::new(
            "NameError",
            format!("name '{other}' is not defined"),
        )),
    }
}

fn call_math(function: &str, args: &[Value]) -> Result<Value, Exc> {
    let name = function;
    let domain = || Exc::value_error("math domain error");
    match function {
        "sqrt" => {
            arity(name, args, 1, 1)?;
            let x = float_arg(name, &args[0])?;
            if x < 0.0 {
                return Err(domain());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "floor" | "ceil" | "trunc" => {
            arity(name, args, 1, 1)?;
            match args[0].as_num() {
                Some(Num::Int(i)) => Ok(Value::Int(i)),
                Some(Num::Big(n)) => Ok(Value::from_bigint(n)),
                Some(Num::Float(f)) => {
                    let r = match function {
                        "floor" => f.floor(),
                        "ceil" => f.ceil(),
                        _ => f.trunc(),
                    };
                    float_to_int(r)
                }
                None => Err(Exc::type_error(format!(
                    "must be real number, not {}",
                    args[0].type_name()
                ))),
            }
        }
        "gcd" | "lcm" => {
            let ints = args.iter().map(int_arg).collect::<Result<Vec<_>, _>>()?;
            let gcd = |mut a: i64, mut b: i64| {
                a = a.abs();
                b = b.abs();
                while b != 0 {
                    (a, b) = (b, a % b);
                }
                a
            };
            if function == "gcd" {
                return Ok(Value::Int(ints.into_iter().fold(0, gcd)));
            }
            let mut acc = BigInt::one();
            for value in ints {
                if value == 0 {
                    return Ok(Value::Int(0));
                }
                let value = BigInt::from(value).abs();
                let g = num_integer::Integer::gcd(&acc, &value);
                acc = acc / g * value;
            }
            Ok(Value::from_bigint(acc))
        }
        "log" => {
            arity(name, args, 1, 2)?;
            let x = float_arg(name, &args[0])?;
            if x <= 0.0 {
                return Err(domain());
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = float_arg(name, base)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain());
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        "log2" | "log10" => {
            arity(name, args, 1, 1)?;
            let x = float_arg(name, &args[0])?;
            if x <= 0.0 {
                return Err(domain());
            }
            Ok(Value::Float(if function == "log2" { x.log2() } else { x.log10() }))
        }
        "exp" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Float(float_arg(name, &args[0])?.exp()))
        }
        "fabs" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Float(float_arg(name, &args[0])?.abs()))
        }
        "isqrt" => {
            arity(name, args, 1, 1)?;
            let n = int_arg(&args[0])?;
            if n < 0 {
                return Err(Exc::value_error("isqrt() argument must be nonnegative"));
            }
            let mut root = (n as f64).sqrt() as i64;
            while root.checked_mul(root).map_or(true, |sq| sq > n) {
                root -= 1;
            }
            while (root + 1).checked_mul(root + 1).is_some_and(|sq| sq <= n) {
                root += 1;
            }
            Ok(Value::Int(root))
        }
        "factorial" => {
            arity(name, args, 1, 1)?;
            let n = int_arg(&args[0])?;
            if n < 0 {
                return Err(Exc::value_error(
                    "factorial() not defined for negative values",
                ));
            }
            if n > 20_000 {
                return Err(Exc::new("MemoryError", "factorial() result too large"));
            }
            let mut acc = BigInt::one();
            for k in 2..=n {
                acc *= k;
            }
            Ok(Value::from_bigint(acc))
        }
        "comb" => {
            arity(name, args, 2, 2)?;
            let (n, k) = (int_arg(&args[0])?, int_arg(&args[1])?);
            if n < 0 || k < 0 {
                return Err(Exc::value_error("n and k must be non-negative integers"));
            }
            if k > n {
                return Ok(Value::Int(0));
            }
            let k = k.min(n - k);
            if k > 20_000 {
                return Err(Exc::new("MemoryError", "comb() result too large"));
            }
            let mut acc = BigInt::one();
            for i in 0..k {
                acc = acc * (n - i) / (i + 1);
            }
            Ok(Value::from_bigint(acc))
        }
        "isinf" | "isnan" => {
            arity(name, args, 1, 1)?;
            let x = float_arg(name, &args[0])?;
            Ok(Value::Bool(if function == "isinf" {
                x.is_infinite()
            } else {
                x.is_nan()
            }))
        }
        other => Err(Exc::attribute_error(&Value::Module("math"), other)),
    }
}

fn heap_list(name: &str, value: &Value) -> Result<Rc<RefCell<Vec<Value>>>, Exc> {
    match value {
        Value::List(items) => Ok(items.clone()),
        other => Err(Exc::type_error(format!(
            "{name}() argument 1 must be list, not {}",
            other.type_name()
        ))),
    }
}

fn sift_down(heap: &mut [Value], start: usize, mut pos: usize) -> Result<(), Exc> {
    let item = heap[pos].clone();
    while pos > start {
        let parent = (pos - 1) >> 1;
        if less_than(&item, &heap[parent])? {
            heap[pos] = heap[parent].clone();
            pos = parent;
            continue;
        }
        break;
    }
    heap[pos] = item;
    Ok(())
}

fn sift_up(heap: &mut [Value], mut pos: usize) -> Result<(), Exc> {
    let end = heap.len();
    let start = pos;
    let item = heap[pos].clone();
    let mut child = 2 * pos + 1;
    while child < end {
        let right = child + 1;
        if right < end && !less_than(&heap[child], &heap[right])? {
            child = right;
        }
        heap[pos] = heap[child].clone();
        pos = child;
        child = 2 * pos + 1;
    }
    heap[pos] = item;
    sift_down(heap, start, pos)
}

fn call_heapq(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Result<Value, Exc> {
    let name = function;
    match function {
        "heappush" => {
            arity(name, &args, 2, 2)?;
            let heap = heap_list(name, &args[0])?;
            let mut heap = heap.borrow_mut();
            heap.push(args[1].clone());
            let last = heap.len() - 1;
            sift_down(&mut heap, 0, last)?;
            Ok(Value::None)
        }
        "heappop" => {
            arity(name, &args, 1, 1)?;
            let heap = heap_list(name, &args[0])?;
            let mut heap = heap.borrow_mut();
            let last = heap
                .pop()
                .ok_or_else(|| Exc::index_error("index out of range"))?;
            if heap.is_empty() {
                return Ok(last);
            }
            let top = std::mem::replace(&mut heap[0], last);
            sift_up(&mut heap, 0)?;
            Ok(top)
        }
        "heapify" => {
            arity(name, &args, 1, 1)?;
            let heap = heap_list(name, &args[0])?;
            let mut heap = heap.borrow_mut();
            for pos in (0..heap.len() / 2).rev() {
                sift_up(&mut heap, pos)?;
            }
            Ok(Value::None)
        }
        "heappushpop" => {
            arity(name, &args, 2, 2)?;
            let heap = heap_list(name, &args[0])?;
            let mut heap = heap.borrow_mut();
            let item = args[1].clone();
            if !heap.is_empty() && less_than(&heap[0], &item)? {
                let top = std::mem::replace(&mut heap[0], item);
                sift_up(&mut heap, 0)?;
                return Ok(top);
            }
            Ok(item)
        }
        "heapreplace" => {
            arity(name, &args, 2, 2)?;
            let heap = heap_list(name, &args[0])?;
            let mut heap = heap.borrow_mut();
            if heap.is_empty() {
                return Err(Exc::index_error("index out of range"));
            }
            let top = std::mem::replace(&mut heap[0], args[1].clone());
            sift_up(&mut heap, 0)?;
            Ok(top)
        }
        "nlargest" | "nsmallest" => {
            let key = take_kwarg(&mut kwargs, "key");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 2, 2)?;
            let n = int_arg(&args[0])?.max(0) as usize;
            let mut items = iterate(&args[1])?;
            sort_values(interp, &mut items, key.as_ref(), function == "nlargest")?;
            items.truncate(n);
            Ok(Value::list(items))
        }
        other => Err(Exc::attribute_error(&Value::Module("heapq"), other)),
    }
}

fn call_bisect(function: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Result<Value, Exc> {
    let name = function;
    let lo = take_kwarg(&mut kwargs, "lo");
    let hi = take_kwarg(&mut kwargs, "hi");
    no_kwargs(name, &kwargs)?;
    arity(name, &args, 2, 4)?;
    let list = heap_list(name, &args[0])?;
    let item = args[1].clone();
    let left = matches!(function, "bisect_left" | "insort_left");
    let position = {
        let items = list.borrow();
        let mut lo = match args.get(2).or(lo.as_ref()) {
            Some(v) => int_arg(v)?.max(0) as usize,
            None => 0,
        };
        let mut hi = match args.get(3).or(hi.as_ref()) {
            Some(v) if !is_none(v) => (int_arg(v)?.max(0) as usize).min(items.len()),
            _ => items.len(),
        };
        while lo < hi {
            let mid = (lo + hi) / 2;
            let go_right = if left {
                less_than(&items[mid], &item)?
            } else {
                !less_than(&item, &items[mid])?
            };
            if go_right {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    };
    if function.starts_with("insort") {
        list.borrow_mut().insert(position, item);
        return Ok(Value::None);
    }
    Ok(Value::Int(position as i64))
}

// ----- methods ---------------------------------------------------------------

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let adjusted = if index < 0 { index + len } else { index };
    (0..len).contains(&adjusted).then_some(adjusted as usize)
}

pub fn call_method(
    interp: &mut Interp,
    receiver: &Value,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Exc> {
    match receiver {
        Value::List(items) => list_method(interp, items, name, args, kwargs),
        Value::Tuple(items) => {
            no_kwargs(name, &kwargs)?;
            sequence_method(name, items, &args, "tuple")
        }
        Value::Str(text) => str_method(text, name, args, kwargs),
        Value::Dict(dict) => dict_method(receiver, dict, name, args, kwargs),
        Value::Set(table) => {
            no_kwargs(name, &kwargs)?;
            set_method(table, name, args)
        }
        Value::Deque(items) => {
            no_kwargs(name, &kwargs)?;
            deque_method(items, name, args)
        }
        other => Err(Exc::attribute_error(other, name)),
    }
}

fn sequence_method(name: &str, items: &[Value], args: &[Value], kind: &str) -> Result<Value, Exc> {
    match name {
        "count" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int(items.iter().filter(|v| py_eq(v, &args[0])).count() as i64))
        }
        "index" => {
            arity(name, args, 1, 3)?;
            let len = items.len() as i64;
            let bound = |v: Option<&Value>, default: i64| -> Result<usize, Exc> {
                Ok(match v {
                    Some(v) => {
                        let i = int_arg(v)?;
                        (if i < 0 { (i + len).max(0) } else { i.min(len) }) as usize
                    }
                    None => default as usize,
                })
            };
            let start = bound(args.get(1), 0)?;
            let end = bound(args.get(2), len)?;
            items
                .iter()
                .enumerate()
                .skip(start)
                .take(end.saturating_sub(start))
                .find(|(_, v)| py_eq(v, &args[0]))
                .map(|(i, _)| Value::Int(i as i64))
                .ok_or_else(|| {
                    if kind == "list" {
                        Exc::value_error(format!("{} is not in list", args[0].repr()))
                    } else {
                        Exc::value_error(format!("{kind}.index(x): x not in {kind}"))
                    }
                })
        }
        other => Err(Exc::new(
            "AttributeError",
            format!("'{kind}' object has no attribute '{other}'"),
        )),
    }
}

fn list_method(
    interp: &mut Interp,
    list: &Rc<RefCell<Vec<Value>>>,
    name: &'static str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Result<Value, Exc> {
    if name == "sort" {
        let key = take_kwarg(&mut kwargs, "key");
        let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|r| r.truthy());
        no_kwargs(name, &kwargs)?;
        arity(name, &args, 0, 0)?;
        let mut items = std::mem::take(&mut *list.borrow_mut());
        let result = sort_values(interp, &mut items, key.as_ref(), reverse);
        *list.borrow_mut() = items;
        return result.map(|()| Value::None);
    }
    no_kwargs(name, &kwargs)?;
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            list.borrow_mut().push(args[0].clone());
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = iterate(&args[0])?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(Exc::index_error("pop from empty list"));
            }
            let index = match args.first() {
                Some(v) => normalize_index(int_arg(v)?, items.len())
                    .ok_or_else(|| Exc::index_error("pop index out of range"))?,
                None => items.len() - 1,
            };
            Ok(items.remove(index))
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let index = int_arg(&args[0])?;
            let index = if index < 0 {
                (index + len).max(0)
            } else {
                index.min(len)
            };
            items.insert(index as usize, args[1].clone());
            Ok(Value::None)
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let position = list.borrow().iter().position(|v| py_eq(v, &args[0]));
            match position {
                Some(i) => {
                    list.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => Err(Exc::value_error("list.remove(x): x not in list")),
            }
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => {
            let items = list.borrow().clone();
            sequence_method(name, &items, &args, "list")
        }
    }
}

fn char_offset(text: &str, byte: usize) -> i64 {
    text[..byte].chars().count() as i64
}

fn strip_set<'a>(name: &str, args: &'a [Value]) -> Result<Option<&'a str>, Exc> {
    arity(name, args, 0, 1)?;
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(v) => str_arg(name, v).map(Some),
    }
}

fn str_method(text: &Rc<str>, name: &'static str, args: Vec<Value>, mut kwargs: Kwargs) -> Result<Value, Exc> {
    let s: &str = text;
    if name == "format" {
        return format_template(s, &args, &kwargs).map(|t| Value::str(&t));
    }
    if matches!(name, "split" | "rsplit") {
        let sep = take_kwarg(&mut kwargs, "sep");
        let maxsplit = take_kwarg(&mut kwargs, "maxsplit");
        no_kwargs(name, &kwargs)?;
        arity(name, &args, 0, 2)?;
        let sep = args.first().cloned().or(sep).filter(|v| !is_none(v));
        let maxsplit = match args.get(1).or(maxsplit.as_ref()) {
            Some(v) => int_arg(v)?,
            None => -1,
        };
        let parts: Vec<String> = match sep {
            None => {
                let words: Vec<&str> = s.split_whitespace().collect();
                if maxsplit < 0 || words.len() <= maxsplit as usize {
                    words.into_iter().map(str::to_string).collect()
                } else if name == "split" {
                    let mut parts: Vec<String> = Vec::new();
                    let mut rest = s.trim_start();
                    for _ in 0..maxsplit {
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    parts.push(rest.to_string());
                    parts
                } else {
                    let mut parts: Vec<String> = Vec::new();
                    let mut rest = s.trim_end();
                    for _ in 0..maxsplit {
                        let start = rest.rfind(char::is_whitespace).map_or(0, |i| i + 1);
                        parts.push(rest[start..].to_string());
                        rest = rest[..start].trim_end();
                    }
                    parts.push(rest.to_string());
                    parts.reverse();
                    parts
                }
            }
            Some(sep) => {
                let sep = str_arg(name, &sep)?.to_string();
                if sep.is_empty() {
                    return Err(Exc::value_error("empty separator"));
                }
                match (name, maxsplit) {
                    (_, m) if m < 0 => s.split(sep.as_str()).map(str::to_string).collect(),
                    ("split", m) => s.splitn(m as usize + 1, sep.as_str()).map(str::to_string).collect(),
                    (_, m) => {
                        let mut parts: Vec<String> =
                            s.rsplitn(m as usize + 1, sep.as_str()).map(str::to_string).collect();
                        parts.reverse();
                        parts
                    }
                }
            }
        };
        return Ok(Value::list(parts.iter().map(|p| Value::str(p)).collect()));
    }
    no_kwargs(name, &kwargs)?;
    match name {
        "join" => {
            arity(name, &args, 1, 1)?;
            let mut out = String::new();
            for (i, item) in iterate(&args[0])?.iter().enumerate() {
                match item {
                    Value::Str(part) => {
                        if i > 0 {
                            out.push_str(s);
                        }
                        out.push_str(part);
                    }
                    other => {
                        return Err(Exc::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(&out))
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_set(name, &args)?;
            let matcher = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            };
            Ok(Value::str(stripped))
        }
        "lower" => Ok(Value::str(&s.to_lowercase())),
        "upper" => Ok(Value::str(&s.to_uppercase())),
        "capitalize" => {
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            };
            Ok(Value::str(&out))
        }
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut previous_cased = false;
            for c in s.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Ok(Value::str(&out))
        }
        "zfill" => {
            arity(name, &args, 1, 1)?;
            let width = int_arg(&args[0])?.max(0) as usize;
            let len = s.chars().count();
            if len >= width {
                return Ok(Value::Str(text.clone()));
            }
            let (sign, digits) = match s.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                _ => (String::new(), s),
            };
            Ok(Value::str(&format!("{sign}{}{digits}", "0".repeat(width - len))))
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let candidates = match &args[0] {
                Value::Tuple(items) => items.as_ref().clone(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let affix = str_arg(name, candidate)?;
                let hit = if name == "startswith" {
                    s.starts_with(affix)
                } else {
                    s.ends_with(affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "rfind" | "index" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            let found = if name == "rfind" {
                s.rfind(needle)
            } else {
                s.find(needle)
            };
            match found {
                Some(byte) => Ok(Value::Int(char_offset(s, byte))),
                None if name == "index" => Err(Exc::value_error("substring not found")),
                None => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            let replaced = match args.get(2) {
                Some(n) if int_arg(n)? >= 0 => s.replacen(old, new, int_arg(n)? as usize),
                _ => s.replace(old, new),
            };
            Ok(Value::str(&replaced))
        }
        "isdigit" | "isnumeric" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_numeric()),
        )),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "isalnum" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))),
        "islower" => Ok(Value::Bool(
            s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase),
        )),
        "isupper" => Ok(Value::Bool(
            s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase),
        )),
        other => Err(Exc::attribute_error(&Value::Str(text.clone()), other)),
    }
}

fn dict_method(
    receiver: &Value,
    dict: &Rc<RefCell<PyDict>>,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Exc> {
    if name == "update" {
        arity(name, &args, 0, 1)?;
        let counter = matches!(dict.borrow().flavor, DictFlavor::Counter);
        let incoming = match args.first() {
            Some(v) if counter && !matches!(v, Value::Dict(_)) => {
                let items = iterate(v)?;
                count_into(&mut dict.borrow_mut(), items)?;
                PyDict::new(DictFlavor::Plain)
            }
            Some(v) => dict_from(v, DictFlavor::Plain)?,
            None => PyDict::new(DictFlavor::Plain),
        };
        let mut target = dict.borrow_mut();
        let extra = kwargs.into_iter().map(|(k, v)| (Value::str(&k), v));
        let pairs: Vec<(Value, Value)> = incoming.table.iter().cloned().chain(extra).collect();
        for (key, value) in pairs {
            let hash = key.hash_key()?;
            let value = if counter {
                let current = target.table.get(&hash).cloned().unwrap_or(Value::Int(0));
                ops::binary(BinOp::Add, &current, &value)?
            } else {
                value
            };
            target.table.insert(hash, key, value);
        }
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let hash = args[0].hash_key()?;
            Ok(dict
                .borrow()
                .table
                .get(&hash)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => Ok(Value::list(dict.borrow().table.keys())),
        "values" => Ok(Value::list(
            dict.borrow().table.iter().map(|(_, v)| v.clone()).collect(),
        )),
        "items" => Ok(Value::list(
            dict.borrow()
                .table
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "pop" => {
            arity(name, &args, 1, 2)?;
            let hash = args[0].hash_key()?;
            let removed = dict.borrow_mut().table.remove(&hash);
            match (removed, args.get(1)) {
                (Some((_, value)), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(Exc::key_error(&args[0])),
            }
        }
        "popitem" => {
            arity(name, &args, 0, 0)?;
            let last = dict.borrow_mut().table.pop_last();
            last.map(|(k, v)| Value::tuple(vec![k, v]))
                .ok_or_else(|| Exc::new("KeyError", "'popitem(): dictionary is empty'"))
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let hash = args[0].hash_key()?;
            let existing = dict.borrow().table.get(&hash).cloned();
            match existing {
                Some(value) => Ok(value),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut()
                        .table
                        .insert(hash, args[0].clone(), default.clone());
                    Ok(default)
                }
            }
        }
        "copy" => Ok(Value::dict(dict.borrow().clone())),
        "clear" => {
            dict.borrow_mut().table.clear();
            Ok(Value::None)
        }
        "most_common" => {
            arity(name, &args, 0, 1)?;
            let limit = match args.first() {
                Some(v) if !is_none(v) => Some(int_arg(v)?.max(0) as usize),
                _ => None,
            };
            let dict = dict.borrow();
            let entries = most_common(&dict.table);
            let take = limit.unwrap_or(entries.len());
            Ok(Value::list(
                entries
                    .into_iter()
                    .take(take)
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "total" => {
            let values: Vec<Value> = dict.borrow().table.iter().map(|(_, v)| v.clone()).collect();
            let mut total = Value::Int(0);
            for value in values {
                total = ops::binary(BinOp::Add, &total, &value)?;
            }
            Ok(total)
        }
        other => Err(Exc::attribute_error(receiver, other)),
    }
}

fn set_method(table: &Rc<RefCell<Table>>, name: &'static str, args: Vec<Value>) -> Result<Value, Exc> {
    let others = || -> Result<Vec<Table>, Exc> {
        args.iter().map(|a| table_from(iterate(a)?)).collect()
    };
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            let hash = args[0].hash_key()?;
            table.borrow_mut().insert(hash, args[0].clone(), Value::None);
            Ok(Value::None)
        }
        "remove" | "discard" => {
            arity(name, &args, 1, 1)?;
            let hash = args[0].hash_key()?;
            let removed = table.borrow_mut().remove(&hash);
            if removed.is_none() && name == "remove" {
                return Err(Exc::key_error(&args[0]));
            }
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            let first = table.borrow_mut().pop_first();
            first
                .map(|(k, _)| k)
                .ok_or_else(|| Exc::new("KeyError", "'pop from an empty set'"))
        }
        "update" => {
            let others = others()?;
            let mut target = table.borrow_mut();
            for other in others {
                for (key, _) in other.iter() {
                    target.insert(key.hash_key()?, key.clone(), Value::None);
                }
            }
            Ok(Value::None)
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let op = match name {
                "union" => BinOp::BitOr,
                "intersection" => BinOp::BitAnd,
                "difference" => BinOp::Sub,
                _ => BinOp::BitXor,
            };
            let mut result = table.borrow().clone();
            for other in others()? {
                result = ops::set_op(op, &result, &other);
            }
            Ok(Value::set(result))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            arity(name, &args, 1, 1)?;
            let other = table_from(iterate(&args[0])?)?;
            let this = table.borrow();
            let contained_in = |a: &Table, b: &Table| {
                a.iter().all(|(k, _)| k.hash_key().is_ok_and(|h| b.contains(&h)))
            };
            Ok(Value::Bool(match name {
                "issubset" => contained_in(&this, &other),
                "issuperset" => contained_in(&other, &this),
                _ => !this.iter().any(|(k, _)| k.hash_key().is_ok_and(|h| other.contains(&h))),
            }))
        }
        "copy" => Ok(Value::set(table.borrow().clone())),
        "clear" => {
            table.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(Exc::new(
            "AttributeError",
            format!("'set' object has no attribute '{other}'"),
        )),
    }
}

fn deque_method(
    items: &Rc<RefCell<VecDeque<Value>>>,
    name: &'static str,
    args: Vec<Value>,
) -> Result<Value, Exc> {
    match name {
        "append" | "appendleft" => {
            arity(name, &args, 1, 1)?;
            let mut items = items.borrow_mut();
            if name == "append" {
                items.push_back(args[0].clone());
            } else {
                items.push_front(args[0].clone());
            }
            Ok(Value::None)
        }
        "pop" | "popleft" => {
            arity(name, &args, 0, 0)?;
            let mut items = items.borrow_mut();
            let popped = if name == "pop" {
                items.pop_back()
            } else {
                items.pop_front()
            };
            popped.ok_or_else(|| Exc::index_error("pop from an empty deque"))
        }
        "extend" | "extendleft" => {
            arity(name, &args, 1, 1)?;
            let extra = iterate(&args[0])?;
            let mut items = items.borrow_mut();
            for item in extra {
                if name == "extend" {
                    items.push_back(item);
                } else {
                    items.push_front(item);
                }
            }
            Ok(Value::None)
        }
        "rotate" => {
            arity(name, &args, 0, 1)?;
            let steps = match args.first() {
                Some(v) => int_arg(v)?,
                None => 1,
            };
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            if len > 0 {
                let shift = steps.rem_euclid(len) as usize;
                items.rotate_right(shift);
            }
            Ok(Value::None)
        }
        "copy" => Ok(Value::Deque(Rc::new(RefCell::new(items.borrow().clone())))),
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(Exc::new(
            "AttributeError",
            format!("'collections.deque' object has no attribute '{other}'"),
        )),
    }
}

// ----- formatting ------------------------------------------------------------

fn group_thousands(digits: &str, separator: char) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(i) => digits.split_at(i),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

/// `format(value, spec)` for the common subset of the format mini-language.
pub fn format_value(value: &Value, spec: &str) -> Result<String, Exc> {
    let invalid = || Exc::value_error(format!("Invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && "<>^=".contains(chars[1]) {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && "<>^=".contains(chars[0]) {
        align = Some(chars[0]);
        i = 1;
    }
    let mut sign = '-';
    if i < chars.len() && "+- ".contains(chars[i]) {
        sign = chars[i];
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' && align.is_none() {
        fill = '0';
        align = Some('=');
        i += 1;
    }
    let mut width = 0usize;
    while i < chars.len() && chars[i].is_ascii_digit() {
        width = width * 10 + chars[i].to_digit(10).unwrap_or(0) as usize;
        i += 1;
    }
    let mut grouping = None;
    if i < chars.len() && (chars[i] == ',' || chars[i] == '_') {
        grouping = Some(chars[i]);
        i += 1;
    }
    let mut precision = None;
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let mut p = 0usize;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            p = p * 10 + chars[i].to_digit(10).unwrap_or(0) as usize;
            i += 1;
        }
        if i == start {
            return Err(invalid());
        }
        precision = Some(p);
    }
    let kind = chars.get(i).copied();
    if i + usize::from(kind.is_some()) != chars.len() {
        return Err(invalid());
    }

    let numeric = value.as_num().is_some() && !matches!(value, Value::Bool(_) if kind.is_none());
    let (negative, mut body) = match (kind, value.as_num()) {
        (Some('f' | 'F' | '%'), Some(n)) => {
            let mut x = n.as_f64();
            if kind == Some('%') {
                x *= 100.0;
            }
            let text = format!("{:.*}", precision.unwrap_or(6), x.abs());
            (x.is_sign_negative() && x != 0.0, text)
        }
        (Some('e' | 'E'), Some(n)) => {
            let x = n.as_f64();
            let raw = format!("{:.*e}", precision.unwrap_or(6), x.abs());
            let text = match raw.split_once('e') {
                Some((mantissa, exp)) => {
                    let (exp_sign, digits) = match exp.strip_prefix('-') {
                        Some(d) => ('-', d),
                        None => ('+', exp),
                    };
                    format!("{mantissa}e{exp_sign}{digits:0>2}")
                }
                None => raw,
            };
            (x < 0.0, text)
        }
        (Some('d'), Some(Num::Int(v))) => (v < 0, v.unsigned_abs().to_string()),
        (Some('d') | None, Some(Num::Big(v))) => (v.is_negative(), v.magnitude().to_string()),
        (Some('b' | 'o' | 'x' | 'X'), Some(Num::Int(v))) => {
            let m = v.unsigned_abs();
            let text = match kind {
                Some('b') => format!("{m:b}"),
                Some('o') => format!("{m:o}"),
                Some('x') => format!("{m:x}"),
                _ => format!("{m:X}"),
            };
            (v < 0, text)
        }
        (None | Some('g'), Some(Num::Float(x))) if precision.is_some() => {
            let p = precision.unwrap_or(6).max(1);
            let magnitude = if x == 0.0 { 0 } else { x.abs().log10().floor() as i64 };
            let text = if magnitude < -4 || magnitude >= p as i64 {
                format!("{:.*e}", p - 1, x.abs())
            } else {
                let decimals = (p as i64 - 1 - magnitude).max(0) as usize;
                let fixed = format!("{:.*}", decimals, x.abs());
                if fixed.contains('.') {
                    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
                } else {
                    fixed
                }
            };
            (x < 0.0, text)
        }
        (None, Some(Num::Int(v))) if numeric => (v < 0, v.unsigned_abs().to_string()),
        (None, Some(Num::Float(x))) => (x.is_sign_negative() && x != 0.0, super::value::format_float(x.abs())),
        (None | Some('s'), _) => {
            let mut text = value.to_str();
            if let Some(p) = precision {
                text = text.chars().take(p).collect();
            }
            (false, text)
        }
        _ => {
            return Err(Exc::value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                kind.unwrap_or(' '),
                value.type_name()
            )))
        }
    };
    if kind == Some('%') {
        body.push('%');
    }
    if let Some(separator) = grouping {
        if numeric {
            body = group_thousands(&body, separator);
        }
    }
    let sign_text = match (negative, sign) {
        (true, _) => "-",
        (false, '+') if numeric => "+",
        (false, ' ') if numeric => " ",
        _ => "",
    };
    let len = sign_text.chars().count() + body.chars().count();
    if width <= len {
        return Ok(format!("{sign_text}{body}"));
    }
    let pad = width - len;
    let padding = |n: usize| fill.to_string().repeat(n);
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    Ok(match align {
        '<' => format!("{sign_text}{body}{}", padding(pad)),
        '^' => format!("{}{sign_text}{body}{}", padding(pad / 2), padding(pad - pad / 2)),
        '=' => format!("{sign_text}{}{body}", padding(pad)),
        _ => format!("{}{sign_text}{body}", padding(pad)),
    })
}

/// `str.format` with automatic, positional and keyword fields.
fn format_template(template: &str, args: &[Value], kwargs: &Kwargs) -> Result<String, Exc> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    field.push(next);
                }
                if !closed {
                    return Err(Exc::value_error("expected '}' before end of string"));
                }
                let (head, spec) = match field.split_once(':') {
                    Some((h, s)) => (h.to_string(), Some(s.to_string())),
                    None => (field.clone(), None),
                };
                let (key, conversion) = match head.split_once('!') {
                    Some((k, conv)) => (k.to_string(), Some(conv.to_string())),
                    None => (head, None),
                };
                let value = if key.is_empty() {
                    let value = args.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| {
                        Exc::index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto_index - 1
                        ))
                    })?
                } else if let Ok(index) = key.parse::<usize>() {
                    args.get(index).cloned().ok_or_else(|| {
                        Exc::index_error(format!(
                            "Replacement index {index} out of range for positional args tuple"
                        ))
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| Exc::new("KeyError", Value::str(&key).repr()))?
                };
                let value = match conversion.as_deref() {
                    Some("r") => Value::str(&value.repr()),
                    Some("s") => Value::str(&value.to_str()),
                    _ => value,
                };
                match spec {
                    Some(spec) => out.push_str(&format_value(&value, &spec)?),
                    None => out.push_str(&value.to_str()),
                }
            }
            '}' => return Err(Exc::value_error("Single '}' encountered in format string")),
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Wraps a raised exception type or instance into an exception object.
pub fn exception_object(kind: &str, args: Vec<Value>) -> Value {
    Value::Exception(Rc::new(ExceptionObj {
        kind: kind.to_string(),
        args,
    }))
}
