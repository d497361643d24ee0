//! Worker half of failure marshalling
//!
//! Runs a test body and turns whatever went wrong into a `CapturedFailure`:
//! plain file/line/function records, never the live backtrace. Panics are
//! recorded by a process-wide hook while a capture is active on the current
//! thread; outside a capture the previously installed hook runs unchanged.
//!
//! Frames are kept between the panic machinery and `isolated_entry`, which is
//! the outermost frame of every captured stack.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Once;

use backtrace::Backtrace;
use shared::{CapturedFailure, FailureKind, LineCache, ResultMessage, StackFrame, TestCase, TestContext, TestError, TestFn, TestResult};

/// Name fragment identifying the entry frame of a captured stack
pub const ENTRY_FUNCTION: &str = "isolated_entry";

const HOOK_FUNCTION: &str = "capture::record_panic";
const HOOK_INSTALLER: &str = "capture::install_panic_hook";

/// Function-name prefixes of the frames between a panic site and the hook
const PANIC_MACHINERY: &[&str] = &[
    "std::panicking::",
    "core::panicking::",
    "std::panic::",
    "core::panic::",
    "std::sys::backtrace::",
    "std::sys_common::backtrace::",
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "<alloc::boxed::Box<",
];

struct PanicRecord {
    message: String,
    location: Option<(String, u32)>,
    backtrace: Backtrace,
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicRecord>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the recording panic hook once per process
///
/// While capturing, the default "thread panicked at" report is suppressed:
/// the failure is reported through the result channel instead.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                record_panic(info.payload(), info.location());
            } else {
                previous(info);
            }
        }));
    });
}

#[inline(never)]
fn record_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) {
    let record = PanicRecord {
        message: panic_message(payload),
        location: location.map(|l| (l.file().to_string(), l.line())),
        backtrace: Backtrace::new(),
    };
    LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(record));
}

/// Text of a panic payload as `panic!` formatted it
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Outermost frame of every captured stack
#[inline(never)]
pub fn isolated_entry(body: TestFn, ctx: &TestContext) -> TestResult {
    let result = body(ctx);
    std::hint::black_box(&result);
    result
}

/// Marks the current thread as capturing for the guard's lifetime
struct CaptureGuard;

impl CaptureGuard {
    fn enter() -> Self {
        LAST_PANIC.with(|slot| slot.borrow_mut().take());
        CAPTURING.with(|flag| flag.set(true));
        CaptureGuard
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|flag| flag.set(false));
    }
}

/// Run `case` and report its outcome as a result message
pub fn run_captured(case: &TestCase, ctx: &TestContext, cache: &LineCache) -> ResultMessage {
    install_panic_hook();

    let outcome = {
        let _guard = CaptureGuard::enter();
        panic::catch_unwind(AssertUnwindSafe(|| isolated_entry(case.body, ctx)))
    };

    match outcome {
        Ok(Ok(())) => ResultMessage::Success,
        Ok(Err(err)) => ResultMessage::Failure(from_test_error(case, &err, cache)),
        Err(payload) => {
            let record = LAST_PANIC.with(|slot| slot.borrow_mut().take());
            ResultMessage::Failure(from_panic(case, payload.as_ref(), record, cache))
        }
    }
}

fn from_test_error(case: &TestCase, err: &TestError, cache: &LineCache) -> CapturedFailure {
    let frame = StackFrame::new(err.location.file(), err.location.line(), case.name);
    CapturedFailure::new(err.kind, err.message.clone(), fill_source_lines(vec![frame], cache))
}

fn from_panic(
    case: &TestCase,
    payload: &(dyn Any + Send),
    record: Option<PanicRecord>,
    cache: &LineCache,
) -> CapturedFailure {
    let Some(record) = record else {
        return CapturedFailure::new(FailureKind::Panic, panic_message(payload), Vec::new());
    };

    let mut frames = trim_to_test_frames(&raw_frames(&record.backtrace));
    if frames.is_empty() {
        if let Some((file, line)) = &record.location {
            frames.push(StackFrame::new(file.clone(), *line, case.name));
        }
    }

    let site_text = record
        .location
        .as_ref()
        .and_then(|(file, line)| cache.get_line(file, *line));
    let kind = classify_panic(&record.message, site_text.as_deref());

    CapturedFailure::new(kind, record.message, fill_source_lines(frames, cache))
}

/// `assert!`-family panics are assertions; anything else is a plain panic
///
/// A custom `assert!` message hides the "assertion failed" prefix, so the
/// source text at the panic site is consulted as well.
pub fn classify_panic(message: &str, site_text: Option<&str>) -> FailureKind {
    let asserted = message.starts_with("assertion")
        || site_text
            .map(|text| text.starts_with("assert") || text.starts_with("debug_assert"))
            .unwrap_or(false);
    if asserted {
        FailureKind::Assertion
    } else {
        FailureKind::Panic
    }
}

/// One resolved symbol, innermost first as the unwinder reports them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

fn raw_frames(backtrace: &Backtrace) -> Vec<RawFrame> {
    backtrace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .map(|symbol| RawFrame {
            function: symbol.name().map(|name| format!("{name:#}")).unwrap_or_default(),
            file: symbol.filename().map(|path| path.display().to_string()),
            line: symbol.lineno(),
        })
        .collect()
}

fn is_panic_machinery(function: &str) -> bool {
    function.contains(HOOK_INSTALLER) || PANIC_MACHINERY.iter().any(|prefix| function.starts_with(prefix))
}

/// Frames from `isolated_entry` to the panic site, outermost first
///
/// Drops everything up to the recording hook and the panic machinery that
/// called it, and everything outside the entry frame. Symbols without file
/// and line information are skipped.
pub fn trim_to_test_frames(raw: &[RawFrame]) -> Vec<StackFrame> {
    let after_hook = raw
        .iter()
        .position(|f| f.function.contains(HOOK_FUNCTION))
        .map(|i| i + 1)
        .unwrap_or(0);
    let start = raw[after_hook..]
        .iter()
        .position(|f| !is_panic_machinery(&f.function))
        .map(|i| after_hook + i)
        .unwrap_or(raw.len());
    let end = raw[start..]
        .iter()
        .position(|f| f.function.contains(ENTRY_FUNCTION))
        .map(|i| start + i + 1)
        .unwrap_or(raw.len());

    raw[start..end]
        .iter()
        .rev()
        .filter_map(|f| Some(StackFrame::new(f.file.clone()?, f.line?, f.function.clone())))
        .collect()
}

fn fill_source_lines(frames: Vec<StackFrame>, cache: &LineCache) -> Vec<StackFrame> {
    frames
        .into_iter()
        .map(|frame| match cache.get_line(&frame.file_path, frame.line_number) {
            Some(text) if frame.source_line.is_none() => frame.with_source_line(text),
            _ => frame,
        })
        .collect()
}
