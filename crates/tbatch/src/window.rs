//! Time-window boundary detection.
//!
//! A window opens at the first unprocessed timestamp and stays open while
//! each new timestamp is within `span` of that opening timestamp. The first
//! interaction past the span closes the window and opens the next one, so
//! every closed window covers at most `span` of time.

use interactions::InteractionStream;

/// Nominal number of windows a stream is split into.
pub const DEFAULT_NUM_WINDOWS: usize = 500;

/// Position and extent of a closed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowBounds {
    /// Zero-based window sequence number within the epoch.
    pub seq: usize,
    /// First interaction index in the window.
    pub start_index: usize,
    /// One past the last interaction index in the window.
    pub end_index: usize,
    /// Timestamp of the first interaction.
    pub start_timestamp: f64,
    /// Timestamp of the last interaction.
    pub closing_timestamp: f64,
}

impl WindowBounds {
    /// Number of interactions in the window.
    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.end_index == self.start_index
    }

    /// Time covered from the first to the last interaction.
    pub fn duration(&self) -> f64 {
        self.closing_timestamp - self.start_timestamp
    }
}

/// Walks timestamps in arrival order and reports closed windows.
#[derive(Debug, Clone)]
pub struct WindowClock {
    span: f64,
    seq: usize,
    start: Option<(usize, f64)>,
    last_timestamp: f64,
    next_index: usize,
}

impl WindowClock {
    /// Create a clock with a fixed window span.
    pub fn new(span: f64) -> Self {
        Self {
            span,
            seq: 0,
            start: None,
            last_timestamp: 0.0,
            next_index: 0,
        }
    }

    /// Create a clock splitting the stream's whole timespan into
    /// `num_windows` equal spans.
    pub fn for_stream(stream: &InteractionStream, num_windows: usize) -> Self {
        Self::new(window_span(stream.timespan(), num_windows))
    }

    /// The configured window span.
    pub fn span(&self) -> f64 {
        self.span
    }

    /// Number of windows closed so far.
    pub fn closed(&self) -> usize {
        self.seq
    }

    /// Observe the next interaction in arrival order.
    ///
    /// Returns the bounds of the window this interaction closes, if any. The
    /// interaction itself belongs to the next window.
    pub fn observe(&mut self, index: usize, timestamp: f64) -> Option<WindowBounds> {
        debug_assert_eq!(index, self.next_index, "interactions must be observed in order");
        self.next_index = index + 1;

        let closed = match self.start {
            None => None,
            Some((_, start_ts)) if timestamp - start_ts > self.span => self.close(index),
            Some(_) => {
                self.last_timestamp = timestamp;
                return None;
            }
        };
        self.start = Some((index, timestamp));
        self.last_timestamp = timestamp;
        closed
    }

    /// Close the trailing window once the stream is exhausted.
    pub fn finish(&mut self) -> Option<WindowBounds> {
        let closed = self.close(self.next_index);
        self.start = None;
        closed
    }

    fn close(&mut self, end_index: usize) -> Option<WindowBounds> {
        let (start_index, start_timestamp) = self.start?;
        if end_index <= start_index {
            return None;
        }
        let bounds = WindowBounds {
            seq: self.seq,
            start_index,
            end_index,
            start_timestamp,
            closing_timestamp: self.last_timestamp,
        };
        self.seq += 1;
        Some(bounds)
    }
}

/// Window span for a stream covering `timespan` split into `num_windows`.
pub fn window_span(timespan: f64, num_windows: usize) -> f64 {
    timespan / num_windows.max(1) as f64
}
