// Angle value types for swerve steering math
//
// Two representations are kept deliberately distinct:
// - DiscreetAngle: wrapped to [0, 360), "point this way"
// - ContinuousAngle: unwrapped, accumulates past revolution boundaries,
//   what a position control loop actually tracks

use std::f64::consts::PI;

const TWO_PI: f64 = 2.0 * PI;

/// An angle in the `[0, 360)` degree range.
///
/// Construction normalizes any finite input, including negative and
/// multi-revolution values. Degrees and radians are stored together so the
/// two representations can never drift apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreetAngle {
    degrees: f64,
    radians: f64,
}

impl DiscreetAngle {
    pub const ZERO: DiscreetAngle = DiscreetAngle {
        degrees: 0.0,
        radians: 0.0,
    };

    pub fn from_degrees(degrees: f64) -> Self {
        let wrapped = ((degrees % 360.0) + 360.0) % 360.0;
        Self {
            degrees: wrapped,
            radians: wrapped.to_radians(),
        }
    }

    pub fn from_radians(radians: f64) -> Self {
        let wrapped = ((radians % TWO_PI) + TWO_PI) % TWO_PI;
        Self {
            degrees: wrapped.to_degrees(),
            radians: wrapped,
        }
    }

    pub fn from_rotations(rotations: f64) -> Self {
        Self::from_degrees(rotations * 360.0)
    }

    pub fn degrees(&self) -> f64 {
        self.degrees
    }

    pub fn radians(&self) -> f64 {
        self.radians
    }

    pub fn rotations(&self) -> f64 {
        self.degrees / 360.0
    }
}

/// An angle in the `(-inf, +inf)` range.
///
/// Used for the steer actuator's accumulated rotation so position setpoints
/// stay continuous across revolution boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousAngle {
    degrees: f64,
    radians: f64,
}

impl ContinuousAngle {
    pub fn from_degrees(degrees: f64) -> Self {
        Self {
            degrees,
            radians: degrees.to_radians(),
        }
    }

    pub fn from_radians(radians: f64) -> Self {
        Self {
            degrees: radians.to_degrees(),
            radians,
        }
    }

    pub fn from_rotations(rotations: f64) -> Self {
        Self::from_degrees(rotations * 360.0)
    }

    pub fn degrees(&self) -> f64 {
        self.degrees
    }

    pub fn radians(&self) -> f64 {
        self.radians
    }

    pub fn rotations(&self) -> f64 {
        self.degrees / 360.0
    }

    /// Wraps the accumulated angle back into `[0, 360)`.
    pub fn as_discreet(&self) -> DiscreetAngle {
        DiscreetAngle::from_degrees(self.degrees)
    }

    pub fn plus(&self, other: ContinuousAngle) -> ContinuousAngle {
        ContinuousAngle {
            degrees: self.degrees + other.degrees,
            radians: self.radians + other.radians,
        }
    }
}
