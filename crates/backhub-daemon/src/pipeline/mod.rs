//! The staged backup pipeline.
//!
//! Each backup module is a tagged variant carrying its ordered stage
//! descriptors; the engine looks the table up once at job start and
//! executes the stages sequentially over a shared [`context::JobContext`].

pub mod context;
pub mod engine;
pub mod wordpress;

use serde::{Deserialize, Serialize};

/// Outcome status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Stage finished its work.
    Ok,
    /// Stage failed; the engine decides the job outcome.
    Failed,
    /// Stage had nothing to do.
    Skipped,
}

/// What a stage hands back to the engine.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Outcome status.
    pub status: StageStatus,
    /// Human-readable summary.
    pub message: String,
    /// Structured details (sizes, paths).
    pub details: serde_json::Value,
}

impl StageOutput {
    /// Successful stage output.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Ok,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Successful stage output with details.
    pub fn ok_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            status: StageStatus::Ok,
            message: message.into(),
            details,
        }
    }

    /// Nothing-to-do stage output.
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }
}

/// Static description of one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    /// Stage name as surfaced in progress rows.
    pub name: &'static str,
    /// Contribution to the overall percentage; weights sum to 100.
    pub weight: u8,
    /// Runs on every outcome, including failure and cancellation.
    pub always_run: bool,
}

/// The backup modules this daemon knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// WordPress site backup.
    WordPress,
}

/// WordPress stage table. Weights match the documented progress trace:
/// 20 after the dump, 40 after the file copy, 60 after bundling, 90
/// after upload, 100 at cleanup.
const WORDPRESS_STAGES: &[StageSpec] = &[
    StageSpec {
        name: "backup_db",
        weight: 20,
        always_run: false,
    },
    StageSpec {
        name: "backup_files",
        weight: 20,
        always_run: false,
    },
    StageSpec {
        name: "create_bundle",
        weight: 20,
        always_run: false,
    },
    StageSpec {
        name: "upload_remote",
        weight: 30,
        always_run: false,
    },
    StageSpec {
        name: "cleanup",
        weight: 10,
        always_run: true,
    },
];

impl ModuleKind {
    /// The module's ordered stage table.
    pub fn stages(&self) -> &'static [StageSpec] {
        match self {
            Self::WordPress => WORDPRESS_STAGES,
        }
    }

    /// Module name as shown in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WordPress => "wordpress",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wordpress_weights_sum_to_100() {
        let total: u32 = ModuleKind::WordPress
            .stages()
            .iter()
            .map(|s| s.weight as u32)
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn only_cleanup_always_runs() {
        let stages = ModuleKind::WordPress.stages();
        let always: Vec<&str> = stages
            .iter()
            .filter(|s| s.always_run)
            .map(|s| s.name)
            .collect();
        assert_eq!(always, vec!["cleanup"]);
        assert_eq!(stages.last().unwrap().name, "cleanup");
    }

    #[test]
    fn cumulative_progress_matches_trace() {
        let mut cumulative = 0u32;
        let expected = [20u32, 40, 60, 90, 100];
        for (stage, want) in ModuleKind::WordPress.stages().iter().zip(expected) {
            cumulative += stage.weight as u32;
            assert_eq!(cumulative, want, "after {}", stage.name);
        }
    }
}
