//! Pipeline steps, persisted job stages and raw step statuses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A unit of pipeline work, identified by a stable integer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineStep {
    DocumentProcessing,
    Summarization,
    StructureAnalysis,
    SectionGeneration,
    Finalization,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 5] = [
        PipelineStep::DocumentProcessing,
        PipelineStep::Summarization,
        PipelineStep::StructureAnalysis,
        PipelineStep::SectionGeneration,
        PipelineStep::Finalization,
    ];

    pub fn id(&self) -> u8 {
        match self {
            PipelineStep::DocumentProcessing => 1,
            PipelineStep::Summarization => 2,
            PipelineStep::StructureAnalysis => 3,
            PipelineStep::SectionGeneration => 4,
            PipelineStep::Finalization => 5,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::DocumentProcessing => "document_processing",
            PipelineStep::Summarization => "summarization",
            PipelineStep::StructureAnalysis => "structure_analysis",
            PipelineStep::SectionGeneration => "section_generation",
            PipelineStep::Finalization => "finalization",
        }
    }

    /// Steps 1-4 produce artifacts; finalization only closes the job.
    pub fn is_work_step(&self) -> bool {
        !matches!(self, PipelineStep::Finalization)
    }

    pub fn next(&self) -> Option<PipelineStep> {
        Self::from_id(self.id() + 1)
    }

    /// The `_init` stage of a work step, or `finalizing`.
    pub fn init_stage(&self) -> Stage {
        match self {
            PipelineStep::DocumentProcessing => Stage::Stage1Init,
            PipelineStep::Summarization => Stage::Stage2Init,
            PipelineStep::StructureAnalysis => Stage::Stage3Init,
            PipelineStep::SectionGeneration => Stage::Stage4Init,
            PipelineStep::Finalization => Stage::Finalizing,
        }
    }

    pub fn running_stage(&self) -> Stage {
        match self {
            PipelineStep::DocumentProcessing => Stage::Stage1Running,
            PipelineStep::Summarization => Stage::Stage2Running,
            PipelineStep::StructureAnalysis => Stage::Stage3Running,
            PipelineStep::SectionGeneration => Stage::Stage4Running,
            PipelineStep::Finalization => Stage::Finalizing,
        }
    }

    pub fn complete_stage(&self) -> Stage {
        match self {
            PipelineStep::DocumentProcessing => Stage::Stage1Complete,
            PipelineStep::Summarization => Stage::Stage2Complete,
            PipelineStep::StructureAnalysis => Stage::Stage3Complete,
            PipelineStep::SectionGeneration => Stage::Stage4Complete,
            PipelineStep::Finalization => Stage::Completed,
        }
    }

    /// Stages from which this step's initialization is a legal next move.
    ///
    /// Summarization may be entered straight from `pending` when document
    /// processing already happened at upload time.
    pub fn init_predecessors(&self) -> &'static [Stage] {
        match self {
            PipelineStep::DocumentProcessing => &[Stage::Pending],
            PipelineStep::Summarization => &[Stage::Pending, Stage::Stage1Complete],
            PipelineStep::StructureAnalysis => &[Stage::Stage2Complete],
            PipelineStep::SectionGeneration => &[Stage::Stage3Complete],
            PipelineStep::Finalization => &[Stage::Stage4Complete],
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStep {
    type Err = String;

    /// Accepts a step id (`"2"`) or name (`"summarization"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<u8>() {
            return Self::from_id(id).ok_or_else(|| format!("unknown step id {}", id));
        }
        let normalized = s.to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == normalized)
            .ok_or_else(|| format!("unknown pipeline step '{}'", s))
    }
}

impl Serialize for PipelineStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.id())
    }
}

impl<'de> Deserialize<'de> for PipelineStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Id(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Id(id) => {
                PipelineStep::from_id(id).ok_or_else(|| serde::de::Error::custom(format!("unknown step id {}", id)))
            }
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Persisted job stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "stage_1_init")]
    Stage1Init,
    #[serde(rename = "stage_1_running")]
    Stage1Running,
    #[serde(rename = "stage_1_complete")]
    Stage1Complete,
    #[serde(rename = "stage_2_init")]
    Stage2Init,
    #[serde(rename = "stage_2_running")]
    Stage2Running,
    #[serde(rename = "stage_2_complete")]
    Stage2Complete,
    #[serde(rename = "stage_3_init")]
    Stage3Init,
    #[serde(rename = "stage_3_running")]
    Stage3Running,
    #[serde(rename = "stage_3_complete")]
    Stage3Complete,
    #[serde(rename = "stage_4_init")]
    Stage4Init,
    #[serde(rename = "stage_4_running")]
    Stage4Running,
    #[serde(rename = "stage_4_complete")]
    Stage4Complete,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl Stage {
    pub const ALL: [Stage; 17] = [
        Stage::Pending,
        Stage::Stage1Init,
        Stage::Stage1Running,
        Stage::Stage1Complete,
        Stage::Stage2Init,
        Stage::Stage2Running,
        Stage::Stage2Complete,
        Stage::Stage3Init,
        Stage::Stage3Running,
        Stage::Stage3Complete,
        Stage::Stage4Init,
        Stage::Stage4Running,
        Stage::Stage4Complete,
        Stage::Finalizing,
        Stage::Completed,
        Stage::Failed,
        Stage::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Stage1Init => "stage_1_init",
            Stage::Stage1Running => "stage_1_running",
            Stage::Stage1Complete => "stage_1_complete",
            Stage::Stage2Init => "stage_2_init",
            Stage::Stage2Running => "stage_2_running",
            Stage::Stage2Complete => "stage_2_complete",
            Stage::Stage3Init => "stage_3_init",
            Stage::Stage3Running => "stage_3_running",
            Stage::Stage3Complete => "stage_3_complete",
            Stage::Stage4Init => "stage_4_init",
            Stage::Stage4Running => "stage_4_running",
            Stage::Stage4Complete => "stage_4_complete",
            Stage::Finalizing => "finalizing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }

    /// Progression rank. A stage with a higher rank is further along;
    /// `failed` and `cancelled` rank above everything.
    pub fn rank(&self) -> u8 {
        match self {
            Stage::Failed | Stage::Cancelled => 15,
            other => Self::ALL
                .iter()
                .position(|stage| stage == other)
                .map(|idx| idx as u8)
                .unwrap_or(0),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }

    /// The step this stage belongs to, if any.
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            Stage::Stage1Init | Stage::Stage1Running | Stage::Stage1Complete => {
                Some(PipelineStep::DocumentProcessing)
            }
            Stage::Stage2Init | Stage::Stage2Running | Stage::Stage2Complete => {
                Some(PipelineStep::Summarization)
            }
            Stage::Stage3Init | Stage::Stage3Running | Stage::Stage3Complete => {
                Some(PipelineStep::StructureAnalysis)
            }
            Stage::Stage4Init | Stage::Stage4Running | Stage::Stage4Complete => {
                Some(PipelineStep::SectionGeneration)
            }
            Stage::Finalizing | Stage::Completed => Some(PipelineStep::Finalization),
            Stage::Pending | Stage::Failed | Stage::Cancelled => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Status a caller reports for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Cancelled => "cancelled",
        }
    }

    /// Ordering used when merging step records. Terminal statuses share the
    /// highest value.
    pub(crate) fn progress(&self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Running => 1,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Cancelled => 2,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "queued" | "init" => Ok(StepStatus::Pending),
            "running" | "in_progress" | "processing" => Ok(StepStatus::Running),
            "completed" | "complete" | "done" | "success" => Ok(StepStatus::Completed),
            "failed" | "error" => Ok(StepStatus::Failed),
            "cancelled" | "canceled" => Ok(StepStatus::Cancelled),
            _ => Err(format!("unknown step status '{}'", s)),
        }
    }
}

/// The stage a `(step, status)` report moves the job to.
pub fn target_stage(step: PipelineStep, status: StepStatus) -> Stage {
    match status {
        StepStatus::Failed => Stage::Failed,
        StepStatus::Cancelled => Stage::Cancelled,
        StepStatus::Pending => step.init_stage(),
        StepStatus::Running => step.running_stage(),
        StepStatus::Completed => step.complete_stage(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_strings_roundtrip() {
        assert_eq!(Stage::ALL.len(), 17);
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
    }

    #[test]
    fn test_rank_is_progression_order() {
        assert!(Stage::Pending.rank() < Stage::Stage1Init.rank());
        assert!(Stage::Stage2Init.rank() < Stage::Stage2Running.rank());
        assert!(Stage::Stage2Complete.rank() < Stage::Stage3Init.rank());
        assert!(Stage::Finalizing.rank() < Stage::Completed.rank());
        assert_eq!(Stage::Failed.rank(), Stage::Cancelled.rank());
        assert!(Stage::Completed.rank() < Stage::Failed.rank());
    }

    #[test]
    fn test_step_status_aliases() {
        let cases = [
            ("queued", StepStatus::Pending),
            ("INIT", StepStatus::Pending),
            ("in_progress", StepStatus::Running),
            ("Processing", StepStatus::Running),
            ("done", StepStatus::Completed),
            ("complete", StepStatus::Completed),
            ("success", StepStatus::Completed),
            ("error", StepStatus::Failed),
            ("canceled", StepStatus::Cancelled),
        ];
        for (raw, expected) in cases {
            assert_eq!(raw.parse::<StepStatus>().unwrap(), expected, "{}", raw);
        }
        assert!("paused".parse::<StepStatus>().is_err());
    }

    #[test]
    fn test_target_stage() {
        assert_eq!(
            target_stage(PipelineStep::Summarization, StepStatus::Pending),
            Stage::Stage2Init
        );
        assert_eq!(
            target_stage(PipelineStep::SectionGeneration, StepStatus::Running),
            Stage::Stage4Running
        );
        assert_eq!(
            target_stage(PipelineStep::Finalization, StepStatus::Running),
            Stage::Finalizing
        );
        assert_eq!(
            target_stage(PipelineStep::Finalization, StepStatus::Completed),
            Stage::Completed
        );
        assert_eq!(
            target_stage(PipelineStep::StructureAnalysis, StepStatus::Cancelled),
            Stage::Cancelled
        );
    }

    #[test]
    fn test_step_parse_and_serde() {
        assert_eq!("2".parse::<PipelineStep>().unwrap(), PipelineStep::Summarization);
        assert_eq!(
            "structure-analysis".parse::<PipelineStep>().unwrap(),
            PipelineStep::StructureAnalysis
        );
        assert!("9".parse::<PipelineStep>().is_err());

        assert_eq!(serde_json::to_string(&PipelineStep::Finalization).unwrap(), "5");
        let step: PipelineStep = serde_json::from_str("\"section_generation\"").unwrap();
        assert_eq!(step, PipelineStep::SectionGeneration);
        let step: PipelineStep = serde_json::from_str("3").unwrap();
        assert_eq!(step, PipelineStep::StructureAnalysis);
    }

    #[test]
    fn test_stage_step() {
        assert_eq!(Stage::Stage3Running.step(), Some(PipelineStep::StructureAnalysis));
        assert_eq!(Stage::Pending.step(), None);
        assert_eq!(PipelineStep::SectionGeneration.next(), Some(PipelineStep::Finalization));
        assert_eq!(PipelineStep::Finalization.next(), None);
    }
}
