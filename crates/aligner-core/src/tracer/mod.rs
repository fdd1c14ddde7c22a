//! Instrumented execution of submitted Python code.
//!
//! A run parses the source, defines it in a fresh namespace, installs the
//! step hook, invokes the entry point and removes the hook again. Every
//! failure, including a panic in the interpreter, comes back as a failed
//! [`TraceRun`]; `Tracer::run` never returns an error.
//!
//! Runs execute on a dedicated worker thread with a large stack and are
//! serialized by a process-wide lock, so at most one hook is live at a time.

mod ast;
mod builtins;
mod error;
mod interp;
mod lexer;
mod literal;
mod ops;
mod parser;
mod value;

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::{
    ExecutionFailure, ExecutionOutcome, ExecutionTrace, FailureKind, InvocationStyle,
    ReturnValue, TraceRun,
};
use crate::obs;

pub use error::{SyntaxError, TracerError, TracerResult};
pub use literal::{
    default_arguments, format_arguments, parse_argument_literal, Literal, DEFAULT_ARGUMENT_TEXT,
};

use ast::StmtKind;
use interp::{Interp, Limits};
use value::{Exc, Value};

/// Serializes runs so no two step hooks are ever live together.
static RUN_LOCK: Mutex<()> = Mutex::new(());

/// Conventional name of the type that holds method-style solutions.
pub const DEFAULT_CONTAINER: &str = "Solution";

/// Limits and conventions for traced runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TracerConfig {
    /// Wall-clock budget for one run, including module definition.
    pub deadline: Duration,
    /// Maximum recorded steps before the run is cut off.
    pub max_steps: usize,
    /// Maximum call depth before `RecursionError`.
    pub max_depth: usize,
    /// Stack size of the worker thread in bytes.
    pub stack_size: usize,
    /// Type instantiated for method-style invocation.
    pub container: String,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            max_steps: 200_000,
            max_depth: 1000,
            stack_size: 256 * 1024 * 1024,
            container: DEFAULT_CONTAINER.to_string(),
        }
    }
}

impl TracerConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Runs code under the step hook.
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    config: TracerConfig,
}

struct Job {
    code: String,
    entry_point: String,
    arguments: Vec<Literal>,
    style: InvocationStyle,
    config: TracerConfig,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Execute `entry_point` from `code` with `arguments`, recording every step.
    pub fn run(
        &self,
        code: &str,
        entry_point: &str,
        arguments: &[Literal],
        style: InvocationStyle,
    ) -> TraceRun {
        let _guard = RUN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        let job = Job {
            code: code.to_string(),
            entry_point: entry_point.to_string(),
            arguments: arguments.to_vec(),
            style,
            config: self.config.clone(),
        };
        let worker = std::thread::Builder::new()
            .name("aligner-tracer".into())
            .stack_size(self.config.stack_size)
            .spawn(move || execute(job));

        let run = match worker {
            Ok(handle) => handle.join().unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "interpreter panicked".to_string());
                internal_failure(message)
            }),
            Err(err) => internal_failure(format!("could not start tracer worker: {err}")),
        };

        obs::emit_trace_finished(
            entry_point,
            run.trace.len(),
            !run.outcome.is_failure(),
            started.elapsed().as_millis() as u64,
        );
        run
    }
}

fn internal_failure(message: String) -> TraceRun {
    TraceRun::failed(
        ExecutionFailure::new(FailureKind::Runtime, "InternalError", message, None),
        ExecutionTrace::new(),
    )
}

fn failure(kind: FailureKind, exc: Exc) -> ExecutionFailure {
    let kind = if exc.fatal { FailureKind::Timeout } else { kind };
    ExecutionFailure::new(kind, exc.kind, exc.message, exc.line)
}

fn execute(job: Job) -> TraceRun {
    let module = match parser::parse_module(&job.code) {
        Ok(module) => module,
        Err(err) => {
            return TraceRun::failed(
                ExecutionFailure::new(
                    FailureKind::Definition,
                    "SyntaxError",
                    err.message,
                    Some(err.line),
                ),
                ExecutionTrace::new(),
            )
        }
    };

    let mut interp = Interp::new(Limits {
        budget: job.config.deadline,
        max_steps: job.config.max_steps,
        max_depth: job.config.max_depth,
    });
    if let Err(exc) = interp.exec_module(&module) {
        return TraceRun::failed(failure(FailureKind::Definition, exc), ExecutionTrace::new());
    }

    let arguments = match job
        .arguments
        .iter()
        .map(Literal::to_value)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(arguments) => arguments,
        Err(exc) => {
            return TraceRun::failed(failure(FailureKind::Arity, exc), ExecutionTrace::new())
        }
    };

    interp.install_hook();
    let result = invoke(&mut interp, &job, arguments);
    let trace = interp.remove_hook();

    match result {
        Ok(value) => TraceRun {
            outcome: ExecutionOutcome::Success(ReturnValue {
                text: value.to_str(),
                repr: value.repr(),
            }),
            trace,
        },
        Err(failure) => TraceRun::failed(failure, trace),
    }
}

fn invoke(interp: &mut Interp, job: &Job, arguments: Vec<Value>) -> Result<Value, ExecutionFailure> {
    let callee = match job.style {
        InvocationStyle::Function => interp.global(&job.entry_point).ok_or_else(|| {
            failure(
                FailureKind::Definition,
                Exc::new(
                    "NameError",
                    format!("name '{}' is not defined", job.entry_point),
                ),
            )
        })?,
        InvocationStyle::Method => {
            let container = &job.config.container;
            let class = interp.global(container).ok_or_else(|| {
                failure(
                    FailureKind::Definition,
                    Exc::new("NameError", format!("name '{container}' is not defined")),
                )
            })?;
            let instance = interp
                .call_value(&class, Vec::new(), Vec::new())
                .map_err(|exc| failure(FailureKind::Definition, exc))?;
            interp
                .getattr(&instance, &job.entry_point)
                .map_err(|exc| failure(FailureKind::Definition, exc))?
        }
    };
    let prepared = interp
        .prepare_call(&callee, arguments)
        .map_err(|exc| failure(FailureKind::Arity, exc))?;
    interp
        .finish_call(prepared)
        .map_err(|exc| failure(FailureKind::Runtime, exc))
}

/// First public module-level function in `code`.
pub fn discover_entry(code: &str) -> TracerResult<Option<String>> {
    let module = parser::parse_module(code)?;
    Ok(module.iter().find_map(|stmt| match &stmt.kind {
        StmtKind::FunctionDef(def) if !def.name.starts_with('_') => Some(def.name.clone()),
        _ => None,
    }))
}

/// First public method of the class named `container` in `code`.
pub fn discover_method(code: &str, container: &str) -> TracerResult<Option<String>> {
    let module = parser::parse_module(code)?;
    Ok(module
        .iter()
        .find_map(|stmt| match &stmt.kind {
            StmtKind::ClassDef(class) if class.name == container => Some(class),
            _ => None,
        })
        .and_then(|class| {
            class.body.iter().find_map(|stmt| match &stmt.kind {
                StmtKind::FunctionDef(def) if !def.name.starts_with('_') => {
                    Some(def.name.clone())
                }
                _ => None,
            })
        }))
}
