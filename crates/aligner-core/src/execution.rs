//! Execution controls: caller-specified deadlines around external calls and traced runs.
//!
//! No retries happen here; a call that misses its deadline is reported once
//! and the caller decides what to do with it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{ExecutionFailure, ExecutionTrace, FailureKind, InvocationStyle, TraceRun};
use crate::tracer::{Literal, Tracer};

/// A stage did not finish within its deadline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{stage} exceeded its deadline of {}ms", .deadline.as_millis())]
pub struct DeadlineExceeded {
    pub stage: String,
    pub deadline: Duration,
}

/// Await `future`, giving up after `deadline`.
pub async fn with_deadline<F>(
    stage: &str,
    deadline: Duration,
    future: F,
) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_elapsed| DeadlineExceeded {
            stage: stage.to_string(),
            deadline,
        })
}

/// Run the tracer on the blocking pool under an outer deadline.
///
/// The interpreter enforces its own deadline as well; this bound covers
/// waiting for the run lock and worker start-up.
pub async fn trace_with_deadline(
    tracer: &Tracer,
    code: &str,
    entry_point: &str,
    arguments: &[Literal],
    style: InvocationStyle,
    deadline: Duration,
) -> TraceRun {
    let tracer = tracer.clone();
    let code = code.to_string();
    let entry = entry_point.to_string();
    let arguments = arguments.to_vec();
    let task = tokio::task::spawn_blocking(move || tracer.run(&code, &entry, &arguments, style));

    match with_deadline("trace", deadline, task).await {
        Ok(Ok(run)) => run,
        Ok(Err(join_error)) => TraceRun::failed(
            ExecutionFailure::new(
                FailureKind::Runtime,
                "InternalError",
                format!("tracer task failed: {join_error}"),
                None,
            ),
            ExecutionTrace::new(),
        ),
        Err(exceeded) => TraceRun::failed(
            ExecutionFailure::new(
                FailureKind::Timeout,
                "TimeoutError",
                exceeded.to_string(),
                None,
            ),
            ExecutionTrace::new(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let value = with_deadline("fast", Duration::from_secs(1), async { 42 })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_times_out() {
        let err = with_deadline(
            "inspector",
            Duration::from_millis(100),
            tokio::time::sleep(Duration::from_secs(10)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.stage, "inspector");
        assert_eq!(err.to_string(), "inspector exceeded its deadline of 100ms");
    }

    #[tokio::test]
    async fn test_trace_with_deadline_runs_tracer() {
        let run = trace_with_deadline(
            &Tracer::default(),
            "def f(a):\n    return len(a)\n",
            "f",
            &[Literal::List(vec![Literal::Int(1), Literal::Int(2)])],
            InvocationStyle::Function,
            Duration::from_secs(10),
        )
        .await;
        assert_eq!(run.outcome.value().unwrap().text, "2");
        assert_eq!(run.trace.len(), 1);
    }
}
