//! Pack current profiles.
//!
//! Positive current charges the pack. All profiles are evaluated against
//! simulated time and return 0 mA once past their optional duration.

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One constant-current interval of a segment profile, `[start_ms, end_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSegment {
    pub start_ms: f64,
    pub end_ms: f64,
    pub current_ma: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CurrentProfile {
    Constant {
        current_ma: f64,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    /// Square wave: `high_ma` for `duty_cycle` of each period, `low_ma` otherwise
    Pulse {
        high_ma: f64,
        low_ma: f64,
        period_ms: f64,
        #[serde(default = "default_duty_cycle")]
        duty_cycle: f64,
        #[serde(default)]
        phase_ms: f64,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    /// Piecewise-constant; 0 mA between and outside segments
    Segments {
        segments: Vec<ProfileSegment>,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
}

fn default_duty_cycle() -> f64 {
    0.5
}

impl Default for CurrentProfile {
    fn default() -> Self {
        CurrentProfile::Constant {
            current_ma: 0.0,
            duration_ms: None,
        }
    }
}

impl CurrentProfile {
    pub fn constant(current_ma: f64) -> Self {
        CurrentProfile::Constant {
            current_ma,
            duration_ms: None,
        }
    }

    pub fn pulse(high_ma: f64, low_ma: f64, period_ms: f64, duty_cycle: f64) -> Result<Self> {
        let profile = CurrentProfile::Pulse {
            high_ma,
            low_ma,
            period_ms,
            duty_cycle,
            phase_ms: 0.0,
            duration_ms: None,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Build a segment profile. Segments are sorted by start time and must
    /// not overlap.
    pub fn segments(mut segments: Vec<ProfileSegment>) -> Result<Self> {
        segments.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));
        let profile = CurrentProfile::Segments {
            segments,
            duration_ms: None,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Limit the profile to `duration_ms`; later times read 0 mA.
    pub fn with_duration(mut self, limit_ms: f64) -> Self {
        match &mut self {
            CurrentProfile::Constant { duration_ms, .. }
            | CurrentProfile::Pulse { duration_ms, .. }
            | CurrentProfile::Segments { duration_ms, .. } => *duration_ms = Some(limit_ms),
        }
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let mut profile: CurrentProfile = serde_json::from_str(text)?;
        if let CurrentProfile::Segments { segments, .. } = &mut profile {
            segments.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));
        }
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.duration_ms() {
            if limit.is_nan() || limit < 0.0 {
                return Err(SimError::invalid(format!("profile duration must be non-negative, got {}", limit)));
            }
        }

        match self {
            CurrentProfile::Constant { .. } => Ok(()),
            CurrentProfile::Pulse {
                period_ms,
                duty_cycle,
                ..
            } => {
                if !(0.0..=1.0).contains(duty_cycle) {
                    return Err(SimError::invalid(format!(
                        "duty cycle must be between 0 and 1, got {}",
                        duty_cycle
                    )));
                }
                if !period_ms.is_finite() || *period_ms <= 0.0 {
                    return Err(SimError::invalid(format!("pulse period must be positive, got {}", period_ms)));
                }
                Ok(())
            }
            CurrentProfile::Segments { segments, .. } => {
                for (i, segment) in segments.iter().enumerate() {
                    if segment.end_ms < segment.start_ms {
                        return Err(SimError::invalid(format!(
                            "segment {} ends at {} ms before it starts at {} ms",
                            i, segment.end_ms, segment.start_ms
                        )));
                    }
                }
                for (i, pair) in segments.windows(2).enumerate() {
                    if pair[0].start_ms > pair[1].start_ms {
                        return Err(SimError::invalid(format!("segment {} starts after segment {}", i, i + 1)));
                    }
                    if pair[0].end_ms > pair[1].start_ms {
                        return Err(SimError::invalid(format!(
                            "segment overlap: segment {} ends at {} ms, segment {} starts at {} ms",
                            i,
                            pair[0].end_ms,
                            i + 1,
                            pair[1].start_ms
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    pub fn duration_ms(&self) -> Option<f64> {
        match self {
            CurrentProfile::Constant { duration_ms, .. }
            | CurrentProfile::Pulse { duration_ms, .. }
            | CurrentProfile::Segments { duration_ms, .. } => *duration_ms,
        }
    }

    /// Pack current (mA) at simulated time `t_ms`.
    pub fn current_at_time(&self, t_ms: f64) -> f64 {
        if matches!(self.duration_ms(), Some(limit) if t_ms > limit) {
            return 0.0;
        }

        match self {
            CurrentProfile::Constant { current_ma, .. } => *current_ma,
            CurrentProfile::Pulse {
                high_ma,
                low_ma,
                period_ms,
                duty_cycle,
                phase_ms,
                ..
            } => {
                let position = (t_ms + phase_ms).rem_euclid(*period_ms);
                if position < period_ms * duty_cycle {
                    *high_ma
                } else {
                    *low_ma
                }
            }
            CurrentProfile::Segments { segments, .. } => segments
                .iter()
                .find(|s| s.start_ms <= t_ms && t_ms < s.end_ms)
                .map_or(0.0, |s| s.current_ma),
        }
    }
}
