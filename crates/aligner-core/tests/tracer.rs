//! Tracer runs over typical interview-style solutions.

use aligner_core::{
    parse_argument_literal, ComparativeAnalyzer, FailureKind, InvocationStyle, TraceRun, Tracer,
    VerdictKind,
};

fn run(code: &str, entry: &str, input: &str, style: InvocationStyle) -> TraceRun {
    let arguments = parse_argument_literal(input).unwrap();
    Tracer::default().run(code, entry, &arguments, style)
}

fn result_text(run: &TraceRun) -> &str {
    match run.outcome.value() {
        Some(value) => &value.text,
        None => panic!("run failed: {:?}", run.outcome.failure()),
    }
}

const TWO_SUM: &str = "\
class Solution:
    def twoSum(self, nums, target):
        seen = {}
        for i, n in enumerate(nums):
            if target - n in seen:
                return [seen[target - n], i]
            seen[n] = i
        return []
";

/// Test: method-style reference with a dict lookup
#[test]
fn test_two_sum_method_style() {
    let run = run(TWO_SUM, "twoSum", "([2, 7, 11, 15], 9)", InvocationStyle::Method);
    assert_eq!(result_text(&run), "[0, 1]");

    // self never appears in a snapshot
    assert!(run
        .trace
        .steps()
        .iter()
        .all(|step| !step.variables.contains_key("self")));
    let last = run.trace.last().unwrap();
    assert_eq!(last.line, 6);
    assert_eq!(last.variables.get("seen").map(String::as_str), Some("{2: 0}"));
}

/// Test: binary search with while loop and integer division
#[test]
fn test_binary_search() {
    let code = "\
def search(nums, target):
    lo, hi = 0, len(nums) - 1
    while lo <= hi:
        mid = (lo + hi) // 2
        if nums[mid] == target:
            return mid
        elif nums[mid] < target:
            lo = mid + 1
        else:
            hi = mid - 1
    return -1
";
    let found = run(code, "search", "([1, 3, 5, 7, 9, 11], 9)", InvocationStyle::Function);
    assert_eq!(result_text(&found), "4");
    let missing = run(code, "search", "([1, 3, 5], 4)", InvocationStyle::Function);
    assert_eq!(result_text(&missing), "-1");
}

/// Test: heapq and sorted with a key function
#[test]
fn test_heap_and_sorting() {
    let code = "\
import heapq

def k_smallest(nums, k):
    heap = []
    for n in nums:
        heapq.heappush(heap, n)
    out = [heapq.heappop(heap) for _ in range(k)]
    return sorted(out, key=lambda x: -x)
";
    let result = run(code, "k_smallest", "([5, 1, 4, 2, 3], 3)", InvocationStyle::Function);
    assert_eq!(result_text(&result), "[3, 2, 1]");
}

/// Test: string results compare by their str() text
#[test]
fn test_string_result_text() {
    let code = "def rev(s):\n    return s[::-1]\n";
    let result = run(code, "rev", "('abc',)", InvocationStyle::Function);
    assert_eq!(result_text(&result), "cba");
    assert_eq!(result.outcome.value().unwrap().repr, "'cba'");
}

/// Test: a single non-tuple literal becomes one argument
#[test]
fn test_single_literal_argument() {
    let code = "def total(a):\n    return sum(a)\n";
    let result = run(code, "total", "[1, 2, 3]", InvocationStyle::Function);
    assert_eq!(result_text(&result), "6");
}

/// Test: missing method on the container is a definition failure
#[test]
fn test_missing_method() {
    let result = run(TWO_SUM, "threeSum", "([1], 1)", InvocationStyle::Method);
    let failure = result.outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Definition);
    assert_eq!(failure.exception, "AttributeError");
}

/// Test: too many arguments surface as an arity failure
#[test]
fn test_arity_failure() {
    let result = run(TWO_SUM, "twoSum", "([1, 2], 3, 4)", InvocationStyle::Method);
    let failure = result.outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Arity);
    assert_eq!(failure.exception, "TypeError");
    assert!(result.trace.is_empty());
}

fn function(code: &str, input: &str) -> TraceRun {
    run(code, "f", input, InvocationStyle::Function)
}

/// Test: sets print in hash order, so unsorted and sorted builds agree
#[test]
fn test_set_results_match_regardless_of_build_order() {
    let user = function("def f(a):\n    return set(a)\n", "([3, 1, 2],)");
    let reference = function("def f(a):\n    return set(sorted(a))\n", "([3, 1, 2],)");
    assert_eq!(result_text(&user), "{1, 2, 3}");
    assert_eq!(result_text(&reference), "{1, 2, 3}");

    let verdict = ComparativeAnalyzer::default().classify(&user, Some(&reference), Some(1.0));
    assert_eq!(verdict.kind, VerdictKind::CorrectOptimal);

    let countdown = function("def f(n):\n    return set(range(n, 0, -1))\n", "(10,)");
    assert_eq!(result_text(&countdown), "{1, 2, 3, 4, 5, 6, 7, 8, 9, 10}");
}

/// Test: each item a comprehension fetches is a step on its line
#[test]
fn test_comprehension_steps() {
    let doubled = function("def f(a):\n    return [x * 2 for x in a]\n", "([1, 2, 3],)");
    assert_eq!(result_text(&doubled), "[2, 4, 6]");
    let lines: Vec<u32> = doubled.trace.steps().iter().map(|step| step.line).collect();
    assert_eq!(lines, vec![2, 2, 2, 2, 2]);
}

/// Test: a quadratic generator is inefficient next to a linear loop
#[test]
fn test_quadratic_generator_is_inefficient() {
    let user = "\
def f(a):
    return sum(1 for i in range(len(a)) for j in range(i + 1, len(a)) if a[i] + a[j] == 0)
";
    let reference = "\
def f(a):
    seen = set()
    count = 0
    for x in a:
        if -x in seen:
            count += 1
        seen.add(x)
    return count
";
    let input = format!("({:?},)", (-12..=12).collect::<Vec<i64>>());
    let user = function(user, &input);
    let reference = function(reference, &input);
    assert_eq!(result_text(&user), "12");
    assert_eq!(result_text(&reference), "12");
    assert_eq!(user.trace.len(), 327);

    let verdict = ComparativeAnalyzer::default().classify(&user, Some(&reference), Some(1.0));
    assert_eq!(verdict.kind, VerdictKind::CorrectInefficient);
}

/// Test: growing a dict while iterating it raises
#[test]
fn test_dict_resized_during_iteration() {
    let code = "\
def f(d):
    for k in d:
        d[k + 'x'] = 1
    return d
";
    let result = function(code, "({'a': 1},)");
    let failure = result.outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Runtime);
    assert_eq!(failure.exception, "RuntimeError");
    assert_eq!(failure.message, "dictionary changed size during iteration");
    assert_eq!(failure.line, Some(2));

    // overwriting existing keys keeps the size and is allowed
    let code = "\
def f(d):
    for k in d:
        d[k] += 1
    return d
";
    let result = function(code, "({'a': 1, 'b': 2},)");
    assert_eq!(result_text(&result), "{'a': 2, 'b': 3}");
}

/// Test: starred assignment targets collect the middle
#[test]
fn test_starred_unpacking() {
    let code = "\
def f(a):
    x, *rest = a
    first, *middle, last = a
    return (x, rest, first, middle, last)
";
    let result = function(code, "([1, 2, 3, 4],)");
    assert_eq!(result_text(&result), "(1, [2, 3, 4], 1, [2, 3], 4)");

    let short = function(code, "([1],)");
    let failure = short.outcome.failure().unwrap();
    assert_eq!(failure.exception, "ValueError");
    assert_eq!(
        failure.message,
        "not enough values to unpack (expected at least 2, got 1)"
    );
}

/// Test: a list holding itself prints with an ellipsis
#[test]
fn test_self_referencing_list_result() {
    let code = "def f(a):\n    a.append(a)\n    return a\n";
    let result = function(code, "([1],)");
    assert_eq!(result_text(&result), "[1, [...]]");
}

/// Test: integer results past 64 bits keep full precision
#[test]
fn test_big_integer_results() {
    let power = function("def f(n):\n    return 2 ** n\n", "(64,)");
    assert_eq!(result_text(&power), "18446744073709551616");
    let product = function("def f(n):\n    return 10 ** 18 * n\n", "(10,)");
    assert_eq!(result_text(&product), "10000000000000000000");
    let back = function("def f(n):\n    return (2 ** n) // 2 ** 60\n", "(64,)");
    assert_eq!(result_text(&back), "16");
}

/// Test: unicode escapes decode inside string literals
#[test]
fn test_unicode_escapes_in_results() {
    let code = "def f(s):\n    return s + '\\u00e9' + '\\x21'\n";
    let result = function(code, "('caf',)");
    assert_eq!(result_text(&result), "café!");
}
