//! Streaming region segmenter.
//!
//! A small state machine that consumes the chat endpoint's incremental text
//! chunks in arrival order and classifies them into three mutually exclusive
//! regions: plain assistant prose, `<think>` commentary, and
//! `<function_calls>` blocks.
//!
//! Key invariants:
//! - Markers may straddle chunk boundaries arbitrarily; detection operates on
//!   an accumulating buffer, never per-chunk pattern matching.
//! - Text after a marker is re-fed in the new state within the same chunk,
//!   so any number of region transitions inside one chunk come out correctly
//!   ordered and loss-free.
//! - In `Plain` and `Thinking` the held-back tail is bounded by the longest
//!   marker prefix that is a suffix of the buffer; function-call blocks are
//!   buffered whole (capped at 512 KB) because they must be well-formed
//!   before parsing.

use memchr::memmem;
use smallvec::SmallVec;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const FC_OPEN: &str = "<function_calls>";
pub const FC_CLOSE: &str = "</function_calls>";

const DEFAULT_MAX_FC_BUFFER: usize = 512 * 1024;

/// The region the segmenter is currently accumulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Plain,
    Thinking,
    FunctionCall,
}

/// Output of the segmenter, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Plain prose, flushed as soon as it cannot be a marker prefix.
    Plain(String),
    /// Thinking commentary, streamed live while the region is open.
    Thinking(String),
    /// The thinking region closed.
    ThinkingEnd,
    /// A function-call region closed; the block includes both markers.
    /// Emitted unterminated only by [`StreamSegmenter::finish`].
    FunctionCallBlock(String),
}

/// Streaming region segmenter. One instance per assistant turn.
pub struct StreamSegmenter {
    region: Region,
    /// Accumulated text for the active region; inactive regions own nothing.
    buffer: String,
    /// Resume point for the `</function_calls>` scan.
    fc_scan_from: usize,
    max_fc_buffer: usize,
}

impl StreamSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            region: Region::Plain,
            buffer: String::new(),
            fc_scan_from: 0,
            max_fc_buffer: DEFAULT_MAX_FC_BUFFER,
        }
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Feed one incoming chunk and collect the resulting events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SegmentEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed one incoming chunk, appending events to a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SegmentEvent>) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.push_str(chunk);
        // Each scan either performs a region transition (and leaves the
        // remainder in the buffer for the next iteration) or consumes what
        // it can and waits for more input.
        loop {
            let transitioned = match self.region {
                Region::Plain => self.scan_plain(out),
                Region::Thinking => self.scan_thinking(out),
                Region::FunctionCall => self.scan_function_call(out),
            };
            if !transitioned {
                break;
            }
        }
    }

    /// Signal end-of-stream.
    ///
    /// An unterminated thinking or function-call region is not an error: the
    /// buffered content is flushed to its sink as a best-effort close.
    pub fn finish(&mut self) -> Vec<SegmentEvent> {
        let mut out = Vec::new();
        self.finish_into(&mut out);
        out
    }

    /// Signal end-of-stream, appending events to a caller-provided buffer.
    pub fn finish_into(&mut self, out: &mut Vec<SegmentEvent>) {
        let remaining = std::mem::take(&mut self.buffer);
        match self.region {
            Region::Plain => {
                if !remaining.is_empty() {
                    out.push(SegmentEvent::Plain(remaining));
                }
            }
            Region::Thinking => {
                if !remaining.is_empty() {
                    out.push(SegmentEvent::Thinking(remaining));
                }
                out.push(SegmentEvent::ThinkingEnd);
            }
            Region::FunctionCall => {
                out.push(SegmentEvent::FunctionCallBlock(remaining));
            }
        }
        self.region = Region::Plain;
        self.fc_scan_from = 0;
    }

    // -- Plain ---------------------------------------------------------------

    fn scan_plain(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let think_at = memmem::find(self.buffer.as_bytes(), THINK_OPEN.as_bytes());
        let fc_at = memmem::find(self.buffer.as_bytes(), FC_OPEN.as_bytes());

        let (marker_at, is_think) = match (think_at, fc_at) {
            (Some(t), Some(f)) if t <= f => (t, true),
            (Some(_) | None, Some(f)) => (f, false),
            (Some(t), None) => (t, true),
            (None, None) => {
                // No marker yet: flush everything that can no longer become
                // the start of one.
                let keep = marker_prefix_holdback(&self.buffer, &[THINK_OPEN, FC_OPEN]);
                self.flush_plain_prefix(self.buffer.len() - keep, out);
                return false;
            }
        };

        self.flush_plain_prefix(marker_at, out);
        if is_think {
            // The opening marker itself is consumed.
            self.buffer.drain(..THINK_OPEN.len());
            self.region = Region::Thinking;
        } else {
            // The opening marker becomes the start of the block.
            self.region = Region::FunctionCall;
            self.fc_scan_from = 0;
        }
        true
    }

    fn flush_plain_prefix(&mut self, up_to: usize, out: &mut Vec<SegmentEvent>) {
        if up_to == 0 {
            return;
        }
        let tail = self.buffer.split_off(up_to);
        let flushed = std::mem::replace(&mut self.buffer, tail);
        out.push(SegmentEvent::Plain(flushed));
    }

    // -- Thinking ------------------------------------------------------------

    fn scan_thinking(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        if let Some(close_at) = memmem::find(self.buffer.as_bytes(), THINK_CLOSE.as_bytes()) {
            let after = self.buffer.split_off(close_at + THINK_CLOSE.len());
            let mut content = std::mem::replace(&mut self.buffer, after);
            content.truncate(close_at);
            if !content.is_empty() {
                out.push(SegmentEvent::Thinking(content));
            }
            out.push(SegmentEvent::ThinkingEnd);
            self.region = Region::Plain;
            return true;
        }

        // Stream the open region live, holding back only a possible prefix
        // of the closing marker.
        let keep = marker_prefix_holdback(&self.buffer, &[THINK_CLOSE]);
        let flush_to = self.buffer.len() - keep;
        if flush_to > 0 {
            let tail = self.buffer.split_off(flush_to);
            let flushed = std::mem::replace(&mut self.buffer, tail);
            out.push(SegmentEvent::Thinking(flushed));
        }
        false
    }

    // -- FunctionCall --------------------------------------------------------

    fn scan_function_call(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let scan_from = self.fc_scan_from;
        if let Some(rel) = memmem::find(&self.buffer.as_bytes()[scan_from..], FC_CLOSE.as_bytes()) {
            let block_end = scan_from + rel + FC_CLOSE.len();
            let after = self.buffer.split_off(block_end);
            let block = std::mem::replace(&mut self.buffer, after);
            out.push(SegmentEvent::FunctionCallBlock(block));
            self.region = Region::Plain;
            self.fc_scan_from = 0;
            return true;
        }

        // Block content is buffered silently until closed; it must be
        // well-formed before parsing.
        if self.buffer.len() > self.max_fc_buffer {
            let flushed = std::mem::take(&mut self.buffer);
            tracing::warn!(
                bytes = flushed.len(),
                "function-call buffer overflow, degrading to plain text"
            );
            out.push(SegmentEvent::Plain(flushed));
            self.region = Region::Plain;
            self.fc_scan_from = 0;
            return false;
        }
        self.fc_scan_from = self.buffer.len().saturating_sub(FC_CLOSE.len() - 1);
        false
    }
}

impl Default for StreamSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest suffix of `buffer` that is a proper prefix of any
/// of `markers`. This is the only text that may still turn into a marker
/// once more input arrives; everything before it is safe to flush.
fn marker_prefix_holdback(buffer: &str, markers: &[&str]) -> usize {
    let bytes = buffer.as_bytes();
    let mut candidates: SmallVec<[usize; 2]> = SmallVec::new();
    for marker in markers {
        let marker_bytes = marker.as_bytes();
        let max_len = (marker_bytes.len() - 1).min(bytes.len());
        for len in (1..=max_len).rev() {
            if bytes[bytes.len() - len..] == marker_bytes[..len] {
                candidates.push(len);
                break;
            }
        }
    }
    candidates.into_iter().max().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
