//! Detection strategy, chosen once at startup
//!
//! Legacy mode runs only the consecutive-violation check. Enhanced mode adds
//! a detection manager per key; the threshold check behaves the same in both.

use crate::anomaly::DetectionManager;
use crate::config::DetectorConfig;

#[derive(Debug, Clone)]
pub enum DetectionStrategy {
    Legacy,
    Enhanced(DetectorConfig),
}

impl DetectionStrategy {
    pub fn from_config(use_enhanced_detection: bool, detection: &DetectorConfig) -> Self {
        if use_enhanced_detection {
            DetectionStrategy::Enhanced(detection.clone())
        } else {
            DetectionStrategy::Legacy
        }
    }

    pub fn is_enhanced(&self) -> bool {
        matches!(self, DetectionStrategy::Enhanced(_))
    }

    /// Detection manager for one key, `None` in legacy mode
    pub fn manager_for(&self, key: &str, max_value: f64) -> Option<DetectionManager> {
        match self {
            DetectionStrategy::Legacy => None,
            DetectionStrategy::Enhanced(config) => Some(DetectionManager::new(key, max_value, config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_selection() {
        let config = DetectorConfig::default();
        let legacy = DetectionStrategy::from_config(false, &config);
        assert!(!legacy.is_enhanced());
        assert!(legacy.manager_for("total:s", 20.0).is_none());

        let enhanced = DetectionStrategy::from_config(true, &config);
        let manager = enhanced.manager_for("total:s", 20.0).unwrap();
        assert_eq!(manager.key(), "total:s");
    }
}
