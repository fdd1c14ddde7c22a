//! Review state machine.
//!
//! ```text
//! INSPECTING → EXECUTING_USER → { HALTED | RETRIEVING }
//!            → EXECUTING_REFERENCE (optional) → CLASSIFYING → DONE
//! ```
//!
//! Non-interpretable submissions go from INSPECTING straight to RETRIEVING.
//! No stage is ever visited twice.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Inspecting,
    ExecutingUser,
    Halted,
    Retrieving,
    ExecutingReference,
    Classifying,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Inspecting => "INSPECTING",
            Stage::ExecutingUser => "EXECUTING_USER",
            Stage::Halted => "HALTED",
            Stage::Retrieving => "RETRIEVING",
            Stage::ExecutingReference => "EXECUTING_REFERENCE",
            Stage::Classifying => "CLASSIFYING",
            Stage::Done => "DONE",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Halted | Stage::Done)
    }

    /// Legal successors of this stage.
    pub fn successors(self) -> &'static [Stage] {
        match self {
            Stage::Inspecting => &[Stage::ExecutingUser, Stage::Retrieving],
            Stage::ExecutingUser => &[Stage::Halted, Stage::Retrieving],
            Stage::Retrieving => &[Stage::ExecutingReference, Stage::Classifying],
            Stage::ExecutingReference => &[Stage::Classifying],
            Stage::Classifying => &[Stage::Done],
            Stage::Halted | Stage::Done => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages visited so far, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct StageLog {
    visited: Vec<Stage>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Stage> {
        self.visited.last().copied()
    }

    pub fn visited(&self) -> &[Stage] {
        &self.visited
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.visited.contains(&stage)
    }

    /// Move to `next`; the first stage must be INSPECTING.
    pub fn advance(&mut self, next: Stage) -> PipelineResult<()> {
        let legal = match self.current() {
            None => next == Stage::Inspecting,
            Some(current) => current.successors().contains(&next),
        };
        if !legal {
            return Err(PipelineError::InvalidTransition {
                from: self.current(),
                to: next,
            });
        }
        self.visited.push(next);
        crate::obs::emit_stage_entered(next.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut log = StageLog::new();
        for stage in [
            Stage::Inspecting,
            Stage::ExecutingUser,
            Stage::Retrieving,
            Stage::ExecutingReference,
            Stage::Classifying,
            Stage::Done,
        ] {
            log.advance(stage).unwrap();
        }
        assert_eq!(log.current(), Some(Stage::Done));
        assert!(log.current().unwrap().is_terminal());
    }

    #[test]
    fn test_halt_is_terminal() {
        let mut log = StageLog::new();
        log.advance(Stage::Inspecting).unwrap();
        log.advance(Stage::ExecutingUser).unwrap();
        log.advance(Stage::Halted).unwrap();
        assert!(matches!(
            log.advance(Stage::Retrieving),
            Err(PipelineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_stages_cannot_be_revisited_or_skipped() {
        let mut log = StageLog::new();
        assert!(log.advance(Stage::Retrieving).is_err());
        log.advance(Stage::Inspecting).unwrap();
        assert!(log.advance(Stage::Inspecting).is_err());
        assert!(log.advance(Stage::Classifying).is_err());
    }

    #[test]
    fn test_serializes_as_list_of_names() {
        let mut log = StageLog::new();
        log.advance(Stage::Inspecting).unwrap();
        log.advance(Stage::Retrieving).unwrap();
        let json = serde_json::to_string(&log).unwrap();
        assert_eq!(json, r#"["INSPECTING","RETRIEVING"]"#);
    }
}
