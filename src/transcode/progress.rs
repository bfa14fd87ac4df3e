//! Parsing of ffmpeg `-progress` reports.
//!
//! ffmpeg posts blocks of `key=value` lines, each block terminated by a
//! `progress=continue` or `progress=end` line.

use std::time::Duration;

/// One progress block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    /// Frames written so far.
    pub frame: Option<u64>,
    /// Output timestamp reached.
    pub out_time: Option<Duration>,
    /// Encoding speed relative to realtime.
    pub speed: Option<f64>,
    /// Whether this is the final block.
    pub ended: bool,
}

/// Incremental parser fed with raw body chunks.
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: String,
    current: ProgressReport,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every block it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProgressReport> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut reports = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if let Some(report) = self.line(line.trim()) {
                reports.push(report);
            }
        }
        reports
    }

    fn line(&mut self, line: &str) -> Option<ProgressReport> {
        let (key, value) = line.split_once('=')?;
        let value = value.trim();
        match key.trim() {
            "frame" => self.current.frame = value.parse().ok(),
            // Despite the name, out_time_ms is in microseconds as well
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.current.out_time = Some(Duration::from_micros(us));
                }
            }
            "speed" => self.current.speed = value.trim_end_matches('x').trim().parse().ok(),
            "progress" => {
                let mut report = std::mem::take(&mut self.current);
                report.ended = value == "end";
                return Some(report);
            }
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_blocks() {
        let mut parser = ProgressParser::new();
        let reports = parser.push(
            b"frame=120\nfps=48.0\nout_time_us=5000000\nspeed=2.01x\nprogress=continue\nframe=240\n",
        );
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].frame, Some(120));
        assert_eq!(reports[0].out_time, Some(Duration::from_secs(5)));
        assert_eq!(reports[0].speed, Some(2.01));
        assert!(!reports[0].ended);

        let reports = parser.push(b"out_time_ms=10000000\nprogress=end\n");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].frame, Some(240));
        assert_eq!(reports[0].out_time, Some(Duration::from_secs(10)));
        assert!(reports[0].ended);
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut parser = ProgressParser::new();
        assert!(parser.push(b"fra").is_empty());
        assert!(parser.push(b"me=7\nprogr").is_empty());
        let reports = parser.push(b"ess=continue\n");
        assert_eq!(reports[0].frame, Some(7));
    }

    #[test]
    fn test_ignores_garbage() {
        let mut parser = ProgressParser::new();
        let reports = parser.push(b"not a pair\nspeed=N/A\nprogress=continue\n");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].speed, None);
    }
}
