//! Scoring orchestrator output (spec C7 / §3 `ScoreBundle`).

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBundle {
    pub heuristic_sum: f64,
    pub bayes_probability: Option<f64>,
    pub auth_contribution: f64,
    pub plugin_combined: f64,
    pub final_raw: f64,
    pub final_level: u8,
}

impl ScoreBundle {
    /// Maps a raw score to the 1..5 level using the default thresholds
    /// from spec §4.7. `zpam-config` may override these at call sites
    /// that need custom thresholds; this is the documented default.
    pub fn level_for(raw: f64) -> u8 {
        if raw <= 5.0 {
            1
        } else if raw <= 15.0 {
            2
        } else if raw <= 25.0 {
            3
        } else if raw <= 35.0 {
            4
        } else {
            5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_thresholds_are_monotone() {
        let raws = [0.0, 5.0, 5.1, 15.0, 25.0, 35.0, 35.1, 1000.0];
        let levels: Vec<u8> = raws.iter().map(|r| ScoreBundle::level_for(*r)).collect();
        for w in levels.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert_eq!(ScoreBundle::level_for(0.0), 1);
        assert_eq!(ScoreBundle::level_for(1000.0), 5);
    }
}
