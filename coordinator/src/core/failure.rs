//! Coordinator half of failure marshalling
//!
//! Turns a `CapturedFailure` received from a worker back into a failure the
//! suite can account for and print: harness frames are elided, missing source
//! lines are filled from the coordinator's line cache, and the original kind
//! and message are kept verbatim.

use std::fmt;
use std::process::ExitStatus;
use std::sync::OnceLock;

use regex::Regex;
use shared::{CapturedFailure, FailureKind, LineCache, StackFrame};
use worker::capture::ENTRY_FUNCTION;

/// Paths of the Rust standard library sources, as recorded in debug info
const LIBRARY_PATH_PATTERN: &str =
    r"(^|/)rustc/[0-9a-f]+/library/|(^|/)library/(std|core|alloc)/src/|/lib/rustlib/src/rust/library/";

fn library_path() -> Option<&'static Regex> {
    static LIBRARY_PATH: OnceLock<Option<Regex>> = OnceLock::new();
    LIBRARY_PATH.get_or_init(|| Regex::new(LIBRARY_PATH_PATTERN).ok()).as_ref()
}

/// Whether `frame` belongs to the standard library's panic and assertion machinery
pub fn is_library_frame(frame: &StackFrame) -> bool {
    library_path()
        .map(|re| re.is_match(&frame.file_path))
        .unwrap_or(false)
}

/// A test failure as the coordinator reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    /// `None` when the worker sent a type name this build does not know
    pub kind: Option<FailureKind>,
    /// Type name exactly as captured
    pub exception_type: String,
    pub message: String,
    /// Elided frames, outermost first
    pub frames: Vec<StackFrame>,
}

impl TestFailure {
    /// Rebuild a failure from its snapshot
    pub fn reconstruct(captured: &CapturedFailure, cache: &LineCache) -> Self {
        let frames = captured
            .frames
            .iter()
            .enumerate()
            .filter(|(index, frame)| !(*index == 0 && frame.function_name.contains(ENTRY_FUNCTION)))
            .filter(|(_, frame)| !is_library_frame(frame))
            .map(|(_, frame)| fill_source_line(frame, cache))
            .collect();

        Self {
            kind: captured.kind(),
            exception_type: captured.exception_type.clone(),
            message: captured.exception_message.clone(),
            frames,
        }
    }

    /// Final line of the rendered trace
    pub fn headline(&self) -> String {
        match self.kind {
            Some(kind) => format!("{kind}: {}", self.message),
            None => format!("Failure: {}: {}", self.exception_type, self.message),
        }
    }

    /// Trace in "most recent call last" order followed by the headline
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.frames.is_empty() {
            out.push_str("stack backtrace (most recent call last):\n");
            for frame in &self.frames {
                out.push_str(&format!(
                    "  at {}:{} in {}\n",
                    frame.file_path, frame.line_number, frame.function_name
                ));
                if let Some(source) = &frame.source_line {
                    out.push_str(&format!("      {source}\n"));
                }
            }
        }
        out.push_str(&self.headline());
        out
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.headline())
    }
}

fn fill_source_line(frame: &StackFrame, cache: &LineCache) -> StackFrame {
    if frame.source_line.is_some() {
        return frame.clone();
    }
    match cache.get_line(&frame.file_path, frame.line_number) {
        Some(text) => frame.clone().with_source_line(text),
        None => frame.clone(),
    }
}

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSummary {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitSummary {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (_, Some(signal)) => write!(f, "killed by signal {signal}{}", signal_name(signal)),
            (Some(code), None) => write!(f, "exit code {code}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|sig| format!(" ({})", sig.as_str()))
        .unwrap_or_default()
}

#[cfg(not(unix))]
fn signal_name(_signal: i32) -> String {
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured() -> CapturedFailure {
        CapturedFailure::new(
            FailureKind::Assertion,
            "expected true",
            vec![
                StackFrame::new("worker/src/capture.rs", 92, "worker::capture::isolated_entry"),
                StackFrame::new("coordinator/src/suite/cases.rs", 40, "coordinator::suite::cases::sandbox_trivial")
                    .with_source_line("assert!(ctx.sandbox().is_restricted(), \"expected true\");"),
                StackFrame::new(
                    "/rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/core/src/panicking.rs",
                    145,
                    "core::panicking::panic_fmt",
                ),
            ],
        )
    }

    #[test]
    fn test_entry_and_library_frames_elided() {
        let failure = TestFailure::reconstruct(&captured(), &LineCache::new());

        assert_eq!(failure.kind, Some(FailureKind::Assertion));
        assert_eq!(failure.message, "expected true");
        assert_eq!(failure.frames.len(), 1);
        assert_eq!(failure.frames[0].line_number, 40);
    }

    #[test]
    fn test_kept_frames_are_an_ordered_subsequence() {
        let original = captured();
        let failure = TestFailure::reconstruct(&original, &LineCache::new());

        let mut remaining = original.frames.iter();
        for kept in &failure.frames {
            assert!(remaining.any(|f| f.file_path == kept.file_path && f.line_number == kept.line_number));
        }
    }

    #[test]
    fn test_entry_frame_only_elided_in_first_position() {
        let mut original = captured();
        original.frames.swap(0, 1);
        let failure = TestFailure::reconstruct(&original, &LineCache::new());
        assert_eq!(failure.frames.len(), 2);
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let original = captured();
        let cache = LineCache::new();
        let first = TestFailure::reconstruct(&original, &cache).render();
        let second = TestFailure::reconstruct(&original, &cache).render();
        assert_eq!(first, second);

        assert!(first.starts_with("stack backtrace (most recent call last):\n"));
        assert!(first.contains("  at coordinator/src/suite/cases.rs:40 in coordinator::suite::cases::sandbox_trivial\n"));
        assert!(first.ends_with("AssertionError: expected true"));
        assert!(!first.contains("isolated_entry"));
    }

    #[test]
    fn test_empty_frames_render_headline_only() {
        let original = CapturedFailure::new(FailureKind::Panic, "boom", vec![]);
        let failure = TestFailure::reconstruct(&original, &LineCache::new());
        assert!(failure.frames.is_empty());
        assert_eq!(failure.render(), "Panic: boom");
    }

    #[test]
    fn test_unknown_type_falls_back_to_generic_failure() {
        let original = CapturedFailure {
            exception_type: "KeyError".to_string(),
            exception_message: "'x'".to_string(),
            frames: vec![],
        };
        let failure = TestFailure::reconstruct(&original, &LineCache::new());

        assert_eq!(failure.kind, None);
        assert_eq!(failure.message, "'x'");
        assert_eq!(failure.render(), "Failure: KeyError: 'x'");
    }

    #[test]
    fn test_missing_source_lines_filled_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.rs");
        std::fs::write(&path, "fn case() {\n    panic!(\"boom\");\n}\n").unwrap();
        let file = path.to_string_lossy().to_string();

        let original = CapturedFailure::new(FailureKind::Panic, "boom", vec![StackFrame::new(&file, 2, "case")]);
        let failure = TestFailure::reconstruct(&original, &LineCache::new());

        assert_eq!(failure.frames[0].source_line.as_deref(), Some("panic!(\"boom\");"));
    }

    #[test]
    fn test_library_path_patterns() {
        for path in [
            "/rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/std/src/panicking.rs",
            "library/core/src/panicking.rs",
            "/home/u/.rustup/toolchains/stable-x86_64-unknown-linux-gnu/lib/rustlib/src/rust/library/core/src/option.rs",
        ] {
            assert!(is_library_frame(&StackFrame::new(path, 1, "f")), "{path}");
        }
        assert!(!is_library_frame(&StackFrame::new("coordinator/src/suite/cases.rs", 1, "f")));
        assert!(!is_library_frame(&StackFrame::new("mylibrary/src/lib.rs", 1, "f")));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_summary_display() {
        use std::os::unix::process::ExitStatusExt;

        let killed = ExitSummary::from(ExitStatus::from_raw(9));
        assert_eq!(killed.to_string(), "killed by signal 9 (SIGKILL)");

        let exited = ExitSummary::from(ExitStatus::from_raw(3 << 8));
        assert_eq!(exited.to_string(), "exit code 3");
    }
}
