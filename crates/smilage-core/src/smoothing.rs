//! Majority-vote smoothing of per-frame labels.

use std::collections::{HashMap, VecDeque};

/// Keeps the last `window` labels and reports the most frequent one.
///
/// Ties go to the label seen most recently. A window of 0 or 1 passes labels
/// through unchanged.
#[derive(Debug, Clone)]
pub struct LabelSmoother {
    window: usize,
    history: VecDeque<String>,
}

impl LabelSmoother {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Record `label` and return the smoothed label.
    pub fn push(&mut self, label: &str) -> String {
        if self.window <= 1 {
            return label.to_string();
        }

        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(label.to_string());

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for l in &self.history {
            *counts.entry(l.as_str()).or_default() += 1;
        }

        // Walk newest to oldest so the first label reaching the top count is
        // the most recent among the tied ones.
        let best = counts.values().copied().max().unwrap_or(0);
        self.history
            .iter()
            .rev()
            .find(|l| counts.get(l.as_str()) == Some(&best))
            .cloned()
            .unwrap_or_else(|| label.to_string())
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_zero_passes_through() {
        let mut s = LabelSmoother::new(0);
        assert_eq!(s.push("happiness"), "happiness");
        assert_eq!(s.push("neutral"), "neutral");
    }

    #[test]
    fn test_majority_wins() {
        let mut s = LabelSmoother::new(5);
        s.push("happiness");
        s.push("happiness");
        s.push("happiness");
        assert_eq!(s.push("neutral"), "happiness");
        assert_eq!(s.push("neutral"), "happiness");
    }

    #[test]
    fn test_old_labels_fall_out_of_window() {
        let mut s = LabelSmoother::new(3);
        s.push("happiness");
        s.push("happiness");
        s.push("neutral");
        s.push("neutral");
        // window now [happiness, neutral, neutral]
        assert_eq!(s.push("neutral"), "neutral");
    }

    #[test]
    fn test_tie_goes_to_most_recent() {
        let mut s = LabelSmoother::new(4);
        s.push("anger");
        s.push("happiness");
        s.push("anger");
        assert_eq!(s.push("happiness"), "happiness");
    }

    #[test]
    fn test_reset() {
        let mut s = LabelSmoother::new(5);
        s.push("sadness");
        s.push("sadness");
        s.reset();
        assert_eq!(s.push("surprise"), "surprise");
    }
}
