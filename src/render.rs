//! Screen rendering of the slice registry.
//!
//! Rendering only ever sees a `Frame` built from a registry snapshot; it has
//! no access to the registry itself.

use crate::controller::Phase;
use crate::registry::RegistrySnapshot;
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt::Write;
use std::time::Duration;

/// Slice map glyphs per row.
pub const MAP_COLUMNS: usize = 64;

/// Everything a sink needs to draw one screen.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Device header, e.g. "GPU 0 (NVIDIA GeForce RTX 4090)".
    pub device: &'a str,
    pub slice_size: u64,
    pub phase: Phase,
    pub snapshot: &'a RegistrySnapshot,
    pub elapsed: Duration,
    pub last_event: &'a str,
}

/// Consumer of rendered frames. Write-only with respect to slice state.
pub trait PresentationSink {
    fn render(&mut self, frame: &Frame<'_>);
}

/// Formats a frame as the multi-line status screen.
pub fn format_frame(frame: &Frame<'_>) -> String {
    let snapshot = frame.snapshot;
    let counts = snapshot.counts;
    let elapsed = Duration::from_secs(frame.elapsed.as_secs());
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{}", frame.device);
    let _ = writeln!(
        out,
        "Slice size: {} ({} bytes)",
        ByteSize::b(frame.slice_size).to_string_as(true),
        frame.slice_size
    );
    let _ = writeln!(out, "Phase: {}", frame.phase.name());
    let _ = writeln!(
        out,
        "Slices held: {}   OK: {}   Faulty locked: {}   In-progress: {}   Released: {}",
        counts.held(),
        counts.ok,
        counts.faulty,
        counts.in_progress,
        counts.released
    );
    let _ = writeln!(
        out,
        "Total held: {}",
        ByteSize::b(frame.slice_size.saturating_mul(counts.held() as u64)).to_string_as(true)
    );
    let _ = writeln!(
        out,
        "Elapsed: {}",
        humantime::format_duration(elapsed)
    );
    let _ = writeln!(out, "Next slice index: {}", snapshot.next_index());
    let _ = writeln!(out, "Last status: {}", frame.last_event);
    let _ = writeln!(out);
    let _ = write!(out, "{}", format_map(snapshot));
    out
}

/// Formats the slice map, `MAP_COLUMNS` glyphs per row with the index of the
/// first slice in each row.
pub fn format_map(snapshot: &RegistrySnapshot) -> String {
    let mut out = String::from(
        "VRAM slice map ('#'=allocated OK, 'X'=faulty locked, '?'=in-progress, '.'=freed after OOM)\n",
    );
    for (row, chunk) in snapshot.states.chunks(MAP_COLUMNS).enumerate() {
        let glyphs: String = chunk.iter().map(|state| state.glyph()).collect();
        let _ = writeln!(out, "{:6}: {}", row * MAP_COLUMNS, glyphs);
    }
    out
}

/// Redraws the status screen in place on stdout.
pub struct TerminalSink {
    bar: ProgressBar,
}

impl TerminalSink {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        bar.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { bar }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationSink for TerminalSink {
    fn render(&mut self, frame: &Frame<'_>) {
        self.bar.set_message(format_frame(frame));
    }
}
