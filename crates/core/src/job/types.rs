//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Stage & Worker Class Types
// ============================================================================

/// One of the two processing stages of the pipeline.
///
/// The pipeline is a fixed two-stage line: every job is captured first and
/// detected second. There is no third stage and no branching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Grab a photo from the source and produce a stored artifact.
    Capture,
    /// Run object detection over the captured artifact.
    Detection,
}

impl Stage {
    /// Returns the stage as a label (for filtering, metrics, logs).
    pub fn as_label(&self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Detection => "detection",
        }
    }

    /// The queued state type for this stage.
    pub fn queued_type(&self) -> &'static str {
        match self {
            Stage::Capture => "capture_queued",
            Stage::Detection => "detection_queued",
        }
    }

    /// The running state type for this stage.
    pub fn running_type(&self) -> &'static str {
        match self {
            Stage::Capture => "capture_running",
            Stage::Detection => "detection_running",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// Execution affinity requested for a job.
///
/// `Any` jobs may be served by either hardware class; `Cpu`/`Gpu` jobs are
/// only ever delivered to subscribers of the matching class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerClass {
    Cpu,
    Gpu,
    #[default]
    Any,
}

impl WorkerClass {
    /// Returns the class as a label (for routing keys and logs).
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerClass::Cpu => "cpu",
            WorkerClass::Gpu => "gpu",
            WorkerClass::Any => "any",
        }
    }
}

/// Hardware class of a worker pool. Unlike [`WorkerClass`] there is no
/// `Any`: a pool always runs on concrete hardware.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HardwareClass {
    Cpu,
    Gpu,
}

impl HardwareClass {
    /// Returns the class as a label.
    pub fn as_label(&self) -> &'static str {
        match self {
            HardwareClass::Cpu => "cpu",
            HardwareClass::Gpu => "gpu",
        }
    }

    /// Whether this pool class may serve a job with the given hint.
    pub fn serves(&self, hint: WorkerClass) -> bool {
        match (self, hint) {
            (_, WorkerClass::Any) => true,
            (HardwareClass::Cpu, WorkerClass::Cpu) => true,
            (HardwareClass::Gpu, WorkerClass::Gpu) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

// ============================================================================
// Job Stage State Machine
// ============================================================================

/// Current lifecycle state of a job.
///
/// State machine flow:
/// ```text
/// Pending -> CaptureQueued -> CaptureRunning -> CaptureDone
///                  ^                |
///                  +--- (retry) ----+
///
/// CaptureDone -> DetectionQueued -> DetectionRunning -> Succeeded
///                      ^                   |
///                      +----- (retry) -----+
///
/// Either running stage can end in DeadLettered (attempts exhausted or
/// permanent input error). Failed is reserved for operator intervention.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStage {
    /// Job created but not yet handed to the broker.
    Pending,

    /// Waiting in the capture queue.
    CaptureQueued,

    /// Claimed by a capture executor.
    CaptureRunning {
        /// Identity of the claiming executor (`pool_id/slot`).
        claimed_by: String,
        started_at: DateTime<Utc>,
    },

    /// Capture finished, artifact stored.
    CaptureDone {
        /// Reference to the captured artifact (e.g. an object-store key).
        artifact_ref: String,
        completed_at: DateTime<Utc>,
    },

    /// Waiting in the detection queue.
    DetectionQueued {
        /// Artifact produced by the capture stage.
        artifact_ref: String,
    },

    /// Claimed by a detection executor.
    DetectionRunning {
        artifact_ref: String,
        claimed_by: String,
        started_at: DateTime<Utc>,
    },

    /// Detection finished (terminal).
    Succeeded {
        /// Reference to the detection result.
        result_ref: String,
        completed_at: DateTime<Utc>,
    },

    /// Explicitly failed by an operator action (terminal).
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },

    /// Attempts exhausted or input unreadable (terminal). Kept for manual
    /// inspection and replay; the pipeline takes no further action.
    DeadLettered {
        /// Stage at which the job dead-lettered.
        stage: Stage,
        error: String,
        dead_lettered_at: DateTime<Utc>,
    },
}

impl JobStage {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStage::Succeeded { .. } | JobStage::Failed { .. } | JobStage::DeadLettered { .. }
        )
    }

    /// Returns true if the job is queued or running in either stage.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStage::CaptureQueued
                | JobStage::CaptureRunning { .. }
                | JobStage::DetectionQueued { .. }
                | JobStage::DetectionRunning { .. }
        )
    }

    /// Returns the state type as a string (for filtering and CAS guards).
    pub fn stage_type(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::CaptureQueued => "capture_queued",
            JobStage::CaptureRunning { .. } => "capture_running",
            JobStage::CaptureDone { .. } => "capture_done",
            JobStage::DetectionQueued { .. } => "detection_queued",
            JobStage::DetectionRunning { .. } => "detection_running",
            JobStage::Succeeded { .. } => "succeeded",
            JobStage::Failed { .. } => "failed",
            JobStage::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// Position in the pipeline order. Retries revisit the same index, so a
    /// legal history is a non-decreasing sequence of these values (with the
    /// queued<->running pair of one stage allowed to alternate).
    pub fn order_index(&self) -> u8 {
        match self {
            JobStage::Pending => 0,
            JobStage::CaptureQueued => 1,
            JobStage::CaptureRunning { .. } => 2,
            JobStage::CaptureDone { .. } => 3,
            JobStage::DetectionQueued { .. } => 4,
            JobStage::DetectionRunning { .. } => 5,
            JobStage::Succeeded { .. } | JobStage::Failed { .. } | JobStage::DeadLettered { .. } => 6,
        }
    }

    /// The processing stage this state belongs to, if any.
    pub fn processing_stage(&self) -> Option<Stage> {
        match self {
            JobStage::CaptureQueued
            | JobStage::CaptureRunning { .. }
            | JobStage::CaptureDone { .. } => Some(Stage::Capture),
            JobStage::DetectionQueued { .. } | JobStage::DetectionRunning { .. } => {
                Some(Stage::Detection)
            }
            _ => None,
        }
    }

    /// Artifact reference carried by detection-side states.
    pub fn artifact_ref(&self) -> Option<&str> {
        match self {
            JobStage::CaptureDone { artifact_ref, .. }
            | JobStage::DetectionQueued { artifact_ref }
            | JobStage::DetectionRunning { artifact_ref, .. } => Some(artifact_ref),
            _ => None,
        }
    }

    /// Executor identity while running.
    pub fn claimed_by(&self) -> Option<&str> {
        match self {
            JobStage::CaptureRunning { claimed_by, .. }
            | JobStage::DetectionRunning { claimed_by, .. } => Some(claimed_by),
            _ => None,
        }
    }
}

// ============================================================================
// Job Envelope
// ============================================================================

/// The persisted record of one unit of work.
///
/// The envelope never owns media content; `payload_ref` and the artifact
/// references in [`JobStage`] are opaque keys into external storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    /// Unique identifier (UUID), assigned at creation.
    pub id: String,

    /// Current lifecycle state.
    pub stage: JobStage,

    /// Opaque reference to the source media (e.g. a camera stream URL).
    pub payload_ref: String,

    /// Requested execution affinity.
    pub worker_class_hint: WorkerClass,

    /// Capture attempts started so far.
    pub capture_attempts: u32,

    /// Detection attempts started so far.
    pub detection_attempts: u32,

    /// Per-stage attempt bound; beyond it the job dead-letters.
    pub max_attempts: u32,

    /// Message of the most recent attempt failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Attempts started for the given stage.
    pub fn attempts_for(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Capture => self.capture_attempts,
            Stage::Detection => self.detection_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_not_terminal() {
        let stage = JobStage::Pending;
        assert!(!stage.is_terminal());
        assert!(!stage.is_active());
        assert_eq!(stage.stage_type(), "pending");
        assert_eq!(stage.order_index(), 0);
    }

    #[test]
    fn test_running_states_are_active() {
        let capture = JobStage::CaptureRunning {
            claimed_by: "capture-cpu/0".to_string(),
            started_at: Utc::now(),
        };
        assert!(capture.is_active());
        assert_eq!(capture.claimed_by(), Some("capture-cpu/0"));
        assert_eq!(capture.processing_stage(), Some(Stage::Capture));

        let detection = JobStage::DetectionRunning {
            artifact_ref: "photos/1.jpg".to_string(),
            claimed_by: "detection-gpu/1".to_string(),
            started_at: Utc::now(),
        };
        assert!(detection.is_active());
        assert_eq!(detection.artifact_ref(), Some("photos/1.jpg"));
        assert_eq!(detection.processing_stage(), Some(Stage::Detection));
    }

    #[test]
    fn test_terminal_states() {
        let succeeded = JobStage::Succeeded {
            result_ref: "results/1.json".to_string(),
            completed_at: Utc::now(),
        };
        assert!(succeeded.is_terminal());

        let failed = JobStage::Failed {
            error: "cancelled by operator".to_string(),
            failed_at: Utc::now(),
        };
        assert!(failed.is_terminal());

        let dead = JobStage::DeadLettered {
            stage: Stage::Detection,
            error: "unreadable payload".to_string(),
            dead_lettered_at: Utc::now(),
        };
        assert!(dead.is_terminal());
        assert_eq!(dead.stage_type(), "dead_lettered");
    }

    #[test]
    fn test_order_index_follows_pipeline() {
        let now = Utc::now();
        let states = vec![
            JobStage::Pending,
            JobStage::CaptureQueued,
            JobStage::CaptureRunning {
                claimed_by: "p/0".to_string(),
                started_at: now,
            },
            JobStage::CaptureDone {
                artifact_ref: "a".to_string(),
                completed_at: now,
            },
            JobStage::DetectionQueued {
                artifact_ref: "a".to_string(),
            },
            JobStage::DetectionRunning {
                artifact_ref: "a".to_string(),
                claimed_by: "p/0".to_string(),
                started_at: now,
            },
            JobStage::Succeeded {
                result_ref: "r".to_string(),
                completed_at: now,
            },
        ];

        let indices: Vec<u8> = states.iter().map(|s| s.order_index()).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted, "pipeline order must be non-decreasing");
    }

    #[test]
    fn test_retry_revisits_same_order_index() {
        let queued = JobStage::DetectionQueued {
            artifact_ref: "a".to_string(),
        };
        let running = JobStage::DetectionRunning {
            artifact_ref: "a".to_string(),
            claimed_by: "p/0".to_string(),
            started_at: Utc::now(),
        };
        // A retry goes running -> queued, dropping back by exactly one.
        assert_eq!(running.order_index() - queued.order_index(), 1);
    }

    #[test]
    fn test_hardware_class_serves() {
        assert!(HardwareClass::Cpu.serves(WorkerClass::Cpu));
        assert!(HardwareClass::Cpu.serves(WorkerClass::Any));
        assert!(!HardwareClass::Cpu.serves(WorkerClass::Gpu));
        assert!(HardwareClass::Gpu.serves(WorkerClass::Gpu));
        assert!(HardwareClass::Gpu.serves(WorkerClass::Any));
        assert!(!HardwareClass::Gpu.serves(WorkerClass::Cpu));
    }

    #[test]
    fn test_stage_serialization() {
        let stage = JobStage::Pending;
        let json = serde_json::to_string(&stage).unwrap();
        assert_eq!(json, r#"{"type":"pending"}"#);

        let deserialized: JobStage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, stage);
    }

    #[test]
    fn test_detection_queued_serialization() {
        let stage = JobStage::DetectionQueued {
            artifact_ref: "photos/42.jpg".to_string(),
        };
        let json = serde_json::to_string(&stage).unwrap();
        assert!(json.contains("detection_queued"));
        assert!(json.contains("photos/42.jpg"));

        let deserialized: JobStage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, stage);
    }

    #[test]
    fn test_dead_lettered_serialization() {
        let stage = JobStage::DeadLettered {
            stage: Stage::Capture,
            error: "camera unreachable".to_string(),
            dead_lettered_at: Utc::now(),
        };
        let json = serde_json::to_string(&stage).unwrap();
        assert!(json.contains("dead_lettered"));
        assert!(json.contains("capture"));

        let deserialized: JobStage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, stage);
    }

    #[test]
    fn test_envelope_attempts_for() {
        let envelope = JobEnvelope {
            id: "job-1".to_string(),
            stage: JobStage::Pending,
            payload_ref: "rtsp://camera-1".to_string(),
            worker_class_hint: WorkerClass::Any,
            capture_attempts: 2,
            detection_attempts: 1,
            max_attempts: 5,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(envelope.attempts_for(Stage::Capture), 2);
        assert_eq!(envelope.attempts_for(Stage::Detection), 1);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Capture.as_label(), "capture");
        assert_eq!(Stage::Detection.as_label(), "detection");
        assert_eq!(Stage::Capture.queued_type(), "capture_queued");
        assert_eq!(Stage::Detection.running_type(), "detection_running");
        assert_eq!(WorkerClass::Any.as_label(), "any");
        assert_eq!(HardwareClass::Gpu.as_label(), "gpu");
    }
}
