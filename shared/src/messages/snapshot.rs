//! Stack snapshot model
//!
//! Plain, serializable data extracted from a live failure inside a worker.
//! Live call-stack objects never cross the process boundary; only these
//! records do.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One call-site in a captured stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file_path: String,
    pub line_number: u32,
    pub function_name: String,
    /// Source text of the line, when the capturing side could read it
    pub source_line: Option<String>,
}

impl StackFrame {
    pub fn new(file_path: impl Into<String>, line_number: u32, function_name: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            line_number,
            function_name: function_name.into(),
            source_line: None,
        }
    }

    /// Attach known source text (fluent API)
    pub fn with_source_line(mut self, source_line: impl Into<String>) -> Self {
        self.source_line = Some(source_line.into());
        self
    }
}

/// Failure taxonomy shared by worker and coordinator
///
/// The wire format carries the name, not the variant, so a coordinator built
/// from a different revision still receives the message text when it does not
/// know a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// `assert!`-family panic
    Assertion,
    /// Any other panic
    Panic,
    /// I/O error returned by a test body
    Io,
    /// Operation denied by capability mode (`ENOTCAPABLE` / `ECAPMODE`)
    Capability,
    /// Fault in the harness itself rather than in the test
    Harness,
}

impl FailureKind {
    pub const ALL: [FailureKind; 5] = [
        FailureKind::Assertion,
        FailureKind::Panic,
        FailureKind::Io,
        FailureKind::Capability,
        FailureKind::Harness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Assertion => "AssertionError",
            FailureKind::Panic => "Panic",
            FailureKind::Io => "IoError",
            FailureKind::Capability => "CapabilityError",
            FailureKind::Harness => "HarnessError",
        }
    }

    /// Resolve a type name received over the wire
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure captured inside a worker, frames ordered outermost first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFailure {
    pub exception_type: String,
    pub exception_message: String,
    pub frames: Vec<StackFrame>,
}

impl CapturedFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, frames: Vec<StackFrame>) -> Self {
        Self {
            exception_type: kind.as_str().to_string(),
            exception_message: message.into(),
            frames,
        }
    }

    /// Locally resolvable kind, if the type name is known
    pub fn kind(&self) -> Option<FailureKind> {
        FailureKind::from_type_name(&self.exception_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_resolve() {
        for kind in FailureKind::ALL {
            assert_eq!(FailureKind::from_type_name(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::from_type_name("ValueError"), None);
    }

    #[test]
    fn test_captured_failure_kind() {
        let failure = CapturedFailure::new(FailureKind::Assertion, "expected true", vec![]);
        assert_eq!(failure.exception_type, "AssertionError");
        assert_eq!(failure.kind(), Some(FailureKind::Assertion));

        let foreign = CapturedFailure {
            exception_type: "KeyError".to_string(),
            exception_message: "'x'".to_string(),
            frames: vec![],
        };
        assert_eq!(foreign.kind(), None);
    }
}
