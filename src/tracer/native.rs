//! Native backtrace capture, sliced by frame identity.
//!
//! The backtrace is captured unresolved. Its frames are cut at two tagged
//! functions: [`capture`] (everything above it is the unwinder itself) and
//! the dispatch function behind [`super::boundary`] (everything below it is
//! the framework or event loop that resumed the call). Symbols are resolved only when a trace is rendered.

use backtrace::{Backtrace, BacktraceFrame};

use super::Line;

const INTERNAL_PREFIXES: &[&str] = &["tasync::", "core::", "std::", "alloc::"];
const INTERNAL_IMPLS: &[&str] = &[" as tasync::", " as core::ops::function::"];

/// A native backtrace restricted to user frames.
#[derive(Clone)]
pub(super) struct NativeTrace {
    frames: Vec<BacktraceFrame>,
}

/// Captures the native stack of the caller.
#[inline(never)]
pub(super) fn capture() -> NativeTrace {
    let backtrace = Backtrace::new_unresolved();
    let frames: &[BacktraceFrame] = backtrace.frames();
    let start = position_of(frames, capture as usize).map_or(0, |i| i + 1);
    let end = position_of(frames, super::dispatch as usize)
        .filter(|&end| end >= start)
        .unwrap_or(frames.len());
    NativeTrace {
        frames: frames[start..end].to_vec(),
    }
}

fn position_of(frames: &[BacktraceFrame], function: usize) -> Option<usize> {
    frames
        .iter()
        .position(|frame| frame.symbol_address() as usize == function)
}

fn is_internal(name: &str) -> bool {
    let path = name.strip_prefix('<').unwrap_or(name);
    INTERNAL_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
        || INTERNAL_IMPLS.iter().any(|marker| name.contains(marker))
}

impl NativeTrace {
    pub(super) fn lines(&self) -> Vec<Line> {
        let mut resolved = Backtrace::from(self.frames.clone());
        resolved.resolve();
        resolved
            .frames()
            .iter()
            .flat_map(BacktraceFrame::symbols)
            .filter_map(|symbol| {
                let name = format!("{:#}", symbol.name()?);
                if is_internal(&name) {
                    return None;
                }
                Some(Line {
                    label: name,
                    file: symbol.filename().map(|p| p.display().to_string()),
                    line: symbol.lineno(),
                    column: symbol.colno(),
                })
            })
            .collect()
    }
}
