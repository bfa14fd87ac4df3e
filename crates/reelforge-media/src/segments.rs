//! Segment boundary planning.
//!
//! Transmuxed video can only be cut on keyframes, so its segments are built
//! by merging keyframe intervals. Everything else is cut on a constant grid.

use reelforge_common::{Error, Rational, Result};

/// Half-open time range `[start_ts, end_ts)` in stream ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Tick unit.
    pub time_base: Rational,
    /// Inclusive start.
    pub start_ts: i64,
    /// Exclusive end.
    pub end_ts: i64,
}

impl Interval {
    /// Create an interval.
    pub fn new(time_base: Rational, start_ts: i64, end_ts: i64) -> Self {
        Self {
            time_base,
            start_ts,
            end_ts,
        }
    }

    /// Length in ticks.
    pub fn duration(&self) -> i64 {
        self.end_ts - self.start_ts
    }
}

/// An interval with its position in a [`SegmentList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Covered time range.
    pub interval: Interval,
    /// Zero-based, strictly increasing id.
    pub segment_id: u32,
}

/// Ordered, contiguous, non-overlapping segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentList {
    segments: Vec<Segment>,
}

impl SegmentList {
    /// Validate and wrap a segment sequence.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if neighbours do not touch or ids do not increase.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self> {
        for pair in segments.windows(2) {
            if pair[0].interval.end_ts != pair[1].interval.start_ts {
                return Err(Error::Validation(format!(
                    "segment {} ends at {} but segment {} starts at {}",
                    pair[0].segment_id,
                    pair[0].interval.end_ts,
                    pair[1].segment_id,
                    pair[1].interval.start_ts
                )));
            }
            if pair[1].segment_id <= pair[0].segment_id {
                return Err(Error::Validation(format!(
                    "segment ids not increasing: {} then {}",
                    pair[0].segment_id, pair[1].segment_id
                )));
            }
        }
        Ok(Self { segments })
    }

    /// The segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether there are no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Start tick of every segment.
    pub fn starts(&self) -> Vec<i64> {
        self.segments.iter().map(|s| s.interval.start_ts).collect()
    }

    fn push(&mut self, time_base: Rational, start_ts: i64, end_ts: i64) {
        let segment_id = self.segments.len() as u32;
        self.segments.push(Segment {
            interval: Interval::new(time_base, start_ts, end_ts),
            segment_id,
        });
    }
}

/// Turn sorted keyframe timestamps into the intervals between them.
///
/// The first interval always starts at 0 and the last one ends at
/// `duration_ts`; keyframes outside `[0, duration_ts)` are ignored.
pub fn keyframe_intervals(keyframes: &[i64], duration_ts: i64, time_base: Rational) -> Vec<Interval> {
    let mut bounds: Vec<i64> = std::iter::once(0)
        .chain(keyframes.iter().copied().filter(|&k| k > 0 && k < duration_ts))
        .collect();
    bounds.dedup();
    bounds.push(duration_ts.max(1));

    bounds
        .windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| Interval::new(time_base, w[0], w[1]))
        .collect()
}

/// Merge keyframe intervals into segments of roughly `spacing` ticks.
///
/// Cut points lie on a fixed grid (`first_start + n * spacing`). Intervals
/// are appended to the open segment; once its end reaches or passes the next
/// cut point the segment closes and the grid advances past that end. An
/// interval straddling a cut point stays whole in the current segment. The
/// final interval always closes the last segment.
pub fn plan_transmux_segments(intervals: &[Interval], spacing: i64) -> SegmentList {
    let mut list = SegmentList::default();
    let Some(first) = intervals.first() else {
        return list;
    };
    let spacing = spacing.max(1);
    let time_base = first.time_base;

    let mut open_start = first.start_ts;
    let mut cut = first.start_ts + spacing;

    for (i, interval) in intervals.iter().enumerate() {
        let end = interval.end_ts;
        let is_last = i + 1 == intervals.len();

        if end >= cut || is_last {
            list.push(time_base, open_start, end);
            open_start = end;
            while cut <= end {
                cut += spacing;
            }
        }
    }

    list
}

/// Constant-duration segments covering `[0, duration_ts)`.
///
/// A trailing remainder becomes its own shorter segment.
pub fn constant_segment_durations(duration_ts: i64, spacing: i64, time_base: Rational) -> SegmentList {
    let mut list = SegmentList::default();
    let spacing = spacing.max(1);
    let duration_ts = duration_ts.max(1);

    let mut start = 0;
    while start < duration_ts {
        let end = (start + spacing).min(duration_ts);
        list.push(time_base, start, end);
        start = end;
    }
    list
}

/// Seconds to ticks in `time_base`, at least one tick.
pub fn spacing_ticks(seconds: f64, time_base: Rational) -> i64 {
    if time_base.num == 0 {
        return 1;
    }
    ((seconds * time_base.den as f64 / time_base.num as f64).round() as i64).max(1)
}
