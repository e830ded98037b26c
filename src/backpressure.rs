// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue pressure levels for capacity warnings.
//!
//! The sync queue is bounded. As it fills, pressure escalates through a
//! small cascade so operators see trouble before writes start failing.
//!
//! # Example
//!
//! ```
//! use highlight_sync::QueuePressure;
//!
//! let level = QueuePressure::from_fill(50, 100);
//! assert_eq!(level, QueuePressure::Normal);
//! assert!(level.should_accept_writes());
//!
//! let level = QueuePressure::from_fill(85, 100);
//! assert_eq!(level, QueuePressure::Warn);
//!
//! let level = QueuePressure::from_fill(100, 100);
//! assert_eq!(level, QueuePressure::Full);
//! assert!(!level.should_accept_writes());
//! ```

/// Pressure level of a bounded queue.
///
/// - **Normal** (< 80%): accept everything quietly
/// - **Warn** (80-90%): log a near-capacity warning
/// - **NearFull** (90-100%): publish `QueueNearFull`
/// - **Full** (100%): reject new entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueuePressure {
    Normal = 0,
    Warn = 1,
    NearFull = 2,
    Full = 3,
}

impl QueuePressure {
    /// Calculate pressure from a fill ratio (0.0 → 1.0)
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        match ratio {
            r if r < 0.80 => Self::Normal,
            r if r < 0.90 => Self::Warn,
            r if r < 1.0 => Self::NearFull,
            _ => Self::Full,
        }
    }

    /// Calculate pressure from entry counts. A zero-capacity queue is full.
    #[must_use]
    pub fn from_fill(len: usize, capacity: usize) -> Self {
        if capacity == 0 {
            return Self::Full;
        }
        Self::from_ratio(len as f64 / capacity as f64)
    }

    #[must_use]
    pub fn should_accept_writes(&self) -> bool {
        !matches!(self, Self::Full)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Warn => "Warning - queue above 80% capacity",
            Self::NearFull => "Near full - queue above 90% capacity",
            Self::Full => "Full - new entries rejected",
        }
    }
}

impl std::fmt::Display for QueuePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_thresholds() {
        assert_eq!(QueuePressure::from_ratio(0.0), QueuePressure::Normal);
        assert_eq!(QueuePressure::from_ratio(0.79), QueuePressure::Normal);
        assert_eq!(QueuePressure::from_ratio(0.80), QueuePressure::Warn);
        assert_eq!(QueuePressure::from_ratio(0.89), QueuePressure::Warn);
        assert_eq!(QueuePressure::from_ratio(0.90), QueuePressure::NearFull);
        assert_eq!(QueuePressure::from_ratio(0.99), QueuePressure::NearFull);
        assert_eq!(QueuePressure::from_ratio(1.0), QueuePressure::Full);
        assert_eq!(QueuePressure::from_ratio(1.5), QueuePressure::Full);
    }

    #[test]
    fn test_from_fill() {
        assert_eq!(QueuePressure::from_fill(8, 10), QueuePressure::Warn);
        assert_eq!(QueuePressure::from_fill(9, 10), QueuePressure::NearFull);
        assert_eq!(QueuePressure::from_fill(0, 0), QueuePressure::Full);
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(QueuePressure::Normal < QueuePressure::Warn);
        assert!(QueuePressure::Warn < QueuePressure::NearFull);
        assert!(QueuePressure::NearFull < QueuePressure::Full);
    }

    #[test]
    fn test_only_full_rejects_writes() {
        assert!(QueuePressure::Normal.should_accept_writes());
        assert!(QueuePressure::NearFull.should_accept_writes());
        assert!(!QueuePressure::Full.should_accept_writes());
    }

    #[test]
    fn test_display() {
        assert_eq!(QueuePressure::NearFull.to_string(), "NearFull");
        assert!(QueuePressure::Full.description().contains("rejected"));
    }
}
