//! Typed events emitted by a generation job.
//!
//! Events are the unit of progressive output: a running job appends them to
//! its log and fans them out to subscribers as they are produced. The
//! registry treats them as opaque apart from the terminal marker, which the
//! task runner uses to close out a job.

use serde::{Deserialize, Serialize};

/// Reference to a wiki page in a generated outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    /// Stable page identifier (e.g., "architecture").
    pub id: String,
    /// Human-readable page title.
    pub title: String,
}

impl PageRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// One unit of progressive output from a generation job.
///
/// Serialized with an adjacent `type` tag so the transport layer can forward
/// events to clients without re-encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Coarse progress update (e.g., "analyzing repository").
    Status { message: String },
    /// A fragment of generated content, in production order.
    Chunk { content: String },
    /// Structural metadata: the planned set of wiki pages.
    Outline { pages: Vec<PageRef> },
    /// Terminal marker: generation finished successfully.
    Done,
    /// Terminal marker: generation failed with a human-readable message.
    Error { message: String },
}

impl JobEvent {
    /// Create a status event.
    pub fn status(message: impl Into<String>) -> Self {
        JobEvent::Status {
            message: message.into(),
        }
    }

    /// Create a content chunk event.
    pub fn chunk(content: impl Into<String>) -> Self {
        JobEvent::Chunk {
            content: content.into(),
        }
    }

    /// Create a terminal error event.
    pub fn error(message: impl Into<String>) -> Self {
        JobEvent::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends the job's output sequence.
    ///
    /// This is the only interpretation of event contents the registry and
    /// runner perform.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Done | JobEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_markers() {
        assert!(JobEvent::Done.is_terminal());
        assert!(JobEvent::error("provider unreachable").is_terminal());
        assert!(!JobEvent::status("started").is_terminal());
        assert!(!JobEvent::chunk("# Overview").is_terminal());
        assert!(!JobEvent::Outline { pages: vec![] }.is_terminal());
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_string(&JobEvent::chunk("Hello")).expect("serialize");
        assert!(json.contains("\"type\":\"chunk\""));
        assert!(json.contains("\"content\":\"Hello\""));

        let parsed: JobEvent =
            serde_json::from_str("{\"type\":\"done\"}").expect("deserialize terminal marker");
        assert_eq!(parsed, JobEvent::Done);
    }

    #[test]
    fn test_outline_round_trip() {
        let event = JobEvent::Outline {
            pages: vec![
                PageRef::new("overview", "Overview"),
                PageRef::new("architecture", "Architecture"),
            ],
        };

        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: JobEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, event);
    }
}
