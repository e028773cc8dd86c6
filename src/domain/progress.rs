use serde::{Deserialize, Serialize};

/// How far a pipeline run has got. `frames_total` is `None` for live sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub frames_processed: u64,
    pub frames_total: Option<u64>,
}

impl ProgressState {
    pub fn new(frames_total: Option<u64>) -> Self {
        Self { frames_processed: 0, frames_total }
    }

    /// Counts one more processed frame. Container frame counts can be
    /// estimates, so a known total is raised rather than overrun.
    pub fn advance(&mut self) {
        self.frames_processed += 1;
        if let Some(total) = self.frames_total.as_mut() {
            if *total < self.frames_processed {
                *total = self.frames_processed;
            }
        }
    }

    pub fn is_live(&self) -> bool {
        self.frames_total.is_none()
    }

    /// Integer percentage for progress bars, `None` when the total is unknown.
    pub fn percent(&self) -> Option<u8> {
        let total = self.frames_total?;
        if total == 0 {
            return Some(100);
        }
        Some(((self.frames_processed.saturating_mul(100)) / total).min(100) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_follows_processed_frames() {
        let mut p = ProgressState::new(Some(4));
        assert_eq!(p.percent(), Some(0));
        p.advance();
        assert_eq!(p.percent(), Some(25));
        p.advance();
        p.advance();
        p.advance();
        assert_eq!(p.percent(), Some(100));
    }

    #[test]
    fn total_is_raised_when_estimate_is_short() {
        let mut p = ProgressState::new(Some(1));
        p.advance();
        p.advance();
        assert_eq!(p.frames_processed, 2);
        assert_eq!(p.frames_total, Some(2));
        assert_eq!(p.percent(), Some(100));
    }

    #[test]
    fn live_progress_has_no_percent() {
        let mut p = ProgressState::new(None);
        p.advance();
        assert!(p.is_live());
        assert_eq!(p.percent(), None);
        assert_eq!(p.frames_processed, 1);
    }
}
