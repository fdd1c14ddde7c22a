//! In-memory fakes for the collaborator traits (testing only)
//!
//! Call counters and recorded requests make stage skipping observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::collaborators::{FeedbackGenerator, FeedbackRequest, Inspection, Inspector};
use super::error::CollaboratorError;

/// Inspector with a scripted answer.
#[derive(Debug)]
pub struct ScriptedInspector {
    answer: Result<Option<Inspection>, CollaboratorError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedInspector {
    pub fn returning(inspection: Inspection) -> Self {
        Self::with_answer(Ok(Some(inspection)))
    }

    /// Inspector that could not determine the code's structure.
    pub fn empty() -> Self {
        Self::with_answer(Ok(None))
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self::with_answer(Err(error))
    }

    fn with_answer(answer: Result<Option<Inspection>, CollaboratorError>) -> Self {
        Self {
            answer,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Inspector for ScriptedInspector {
    async fn inspect(
        &self,
        _code: &str,
        _description: &str,
    ) -> Result<Option<Inspection>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.clone()
    }
}

/// Feedback generator that records every request.
#[derive(Debug, Default)]
pub struct RecordingFeedback {
    requests: Mutex<Vec<FeedbackRequest>>,
    fail: bool,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records requests but answers every one with an error.
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn requests(&self) -> Vec<FeedbackRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedbackGenerator for RecordingFeedback {
    async fn explain(&self, request: &FeedbackRequest) -> Result<String, CollaboratorError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(CollaboratorError::Transport("feedback service unavailable".into()));
        }
        Ok(format!("{}: {}", request.issue(), request.verdict.context))
    }
}
