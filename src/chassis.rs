// Reference kinematics and odometry collaborators
//
// The swerve core only consumes the `SwerveKinematics` / `PoseEstimator`
// traits; these implementations back the runtime binary (and the
// coordinator tests) for a rectangular chassis. Robot frame: +x forward,
// +y left, counter-clockwise positive.

use crate::swerve::angle::DiscreetAngle;
use crate::swerve::drive::{PoseEstimator, SwerveKinematics};
use crate::swerve::types::{ChassisSpeeds, ModulePosition, ModuleState, Pose2d};

/// Inverse/forward kinematics for four modules at the corners of a
/// rectangle. Module order: FrontLeft, FrontRight, BackLeft, BackRight.
pub struct RectangularKinematics {
    /// Module (x, y) offsets from the chassis center, meters.
    offsets: [(f64, f64); 4],
}

impl RectangularKinematics {
    /// `wheel_base_m` is the front-to-back module distance, `track_width_m`
    /// the left-to-right one.
    pub fn new(wheel_base_m: f64, track_width_m: f64) -> Self {
        let x = wheel_base_m / 2.0;
        let y = track_width_m / 2.0;
        Self {
            offsets: [(x, y), (x, -y), (-x, y), (-x, -y)],
        }
    }
}

impl SwerveKinematics for RectangularKinematics {
    fn to_module_states(&self, speeds: ChassisSpeeds) -> [ModuleState; 4] {
        self.offsets.map(|(x, y)| {
            let vx = speeds.vx_ms - speeds.omega_rad_s * y;
            let vy = speeds.vy_ms + speeds.omega_rad_s * x;
            ModuleState {
                speed_ms: vx.hypot(vy),
                angle: DiscreetAngle::from_radians(vy.atan2(vx)),
            }
        })
    }

    fn to_chassis_speeds(&self, states: &[ModuleState; 4]) -> ChassisSpeeds {
        let mut vx_sum = 0.0;
        let mut vy_sum = 0.0;
        let mut omega_sum = 0.0;
        for ((x, y), state) in self.offsets.iter().zip(states) {
            let vx = state.speed_ms * state.angle.radians().cos();
            let vy = state.speed_ms * state.angle.radians().sin();
            vx_sum += vx;
            vy_sum += vy;
            // Tangential component of this wheel's velocity about the center
            omega_sum += (x * vy - y * vx) / (x * x + y * y);
        }
        let n = self.offsets.len() as f64;
        ChassisSpeeds {
            vx_ms: vx_sum / n,
            vy_ms: vy_sum / n,
            omega_rad_s: omega_sum / n,
        }
    }
}

/// Integrates module displacement vectors into a field-frame pose. Heading
/// comes straight from the gyro.
pub struct DeadReckoningEstimator {
    pose: Pose2d,
    last_positions: Option<[ModulePosition; 4]>,
}

impl DeadReckoningEstimator {
    pub fn new() -> Self {
        Self {
            pose: Pose2d::ORIGIN,
            last_positions: None,
        }
    }
}

impl Default for DeadReckoningEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseEstimator for DeadReckoningEstimator {
    fn update(&mut self, gyro_angle: DiscreetAngle, positions: &[ModulePosition; 4]) {
        if let Some(last) = &self.last_positions {
            let mut dx = 0.0;
            let mut dy = 0.0;
            for (current, previous) in positions.iter().zip(last) {
                let distance = current.distance_m - previous.distance_m;
                let field_heading = current.angle.radians() + gyro_angle.radians();
                dx += distance * field_heading.cos();
                dy += distance * field_heading.sin();
            }
            let n = positions.len() as f64;
            self.pose.x_m += dx / n;
            self.pose.y_m += dy / n;
        }
        self.pose.heading = gyro_angle;
        self.last_positions = Some(*positions);
    }

    fn estimated_position(&self) -> Pose2d {
        self.pose
    }

    fn reset(&mut self, gyro_angle: DiscreetAngle, positions: &[ModulePosition; 4], pose: Pose2d) {
        self.pose = pose;
        self.pose.heading = gyro_angle;
        self.last_positions = Some(*positions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swerve::angle::ContinuousAngle;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn pure_translation_points_all_wheels_the_same_way() {
        let kinematics = RectangularKinematics::new(0.47, 0.47);
        let states = kinematics.to_module_states(ChassisSpeeds::new(1.0, 1.0, 0.0));
        for state in &states {
            assert!((state.angle.degrees() - 45.0).abs() < EPSILON);
            assert!((state.speed_ms - 2.0f64.sqrt()).abs() < EPSILON);
        }
    }

    #[test]
    fn pure_rotation_is_tangential_and_symmetric() {
        let kinematics = RectangularKinematics::new(0.47, 0.47);
        let states = kinematics.to_module_states(ChassisSpeeds::new(0.0, 0.0, 1.0));
        let radius = (0.235f64).hypot(0.235);
        for state in &states {
            assert!((state.speed_ms - radius).abs() < EPSILON);
        }
        // Opposite corners point opposite ways
        let delta = (states[0].angle.degrees() - states[3].angle.degrees()).abs();
        assert!((delta - 180.0).abs() < EPSILON, "delta {delta}");
    }

    #[test]
    fn forward_kinematics_inverts_inverse_kinematics() {
        let kinematics = RectangularKinematics::new(0.47, 0.47);
        let commanded = ChassisSpeeds::new(1.2, -0.4, 0.8);
        let states = kinematics.to_module_states(commanded);
        let recovered = kinematics.to_chassis_speeds(&states);
        assert!((recovered.vx_ms - commanded.vx_ms).abs() < 1e-6);
        assert!((recovered.vy_ms - commanded.vy_ms).abs() < 1e-6);
        assert!((recovered.omega_rad_s - commanded.omega_rad_s).abs() < 1e-6);
    }

    fn positions(distance_m: f64, angle_degrees: f64) -> [ModulePosition; 4] {
        [ModulePosition {
            distance_m,
            angle: ContinuousAngle::from_degrees(angle_degrees),
        }; 4]
    }

    #[test]
    fn dead_reckoning_tracks_straight_line() {
        let mut estimator = DeadReckoningEstimator::new();
        estimator.update(DiscreetAngle::ZERO, &positions(0.0, 0.0));
        estimator.update(DiscreetAngle::ZERO, &positions(1.0, 0.0));
        let pose = estimator.estimated_position();
        assert!((pose.x_m - 1.0).abs() < EPSILON);
        assert!(pose.y_m.abs() < EPSILON);
    }

    #[test]
    fn dead_reckoning_rotates_displacement_by_gyro() {
        let mut estimator = DeadReckoningEstimator::new();
        let gyro = DiscreetAngle::from_degrees(90.0);
        estimator.update(gyro, &positions(0.0, 0.0));
        estimator.update(gyro, &positions(1.0, 0.0));
        let pose = estimator.estimated_position();
        assert!(pose.x_m.abs() < EPSILON);
        assert!((pose.y_m - 1.0).abs() < EPSILON);
        assert!((pose.heading.degrees() - 90.0).abs() < EPSILON);
    }

    #[test]
    fn reset_rebases_without_replaying_distance() {
        let mut estimator = DeadReckoningEstimator::new();
        estimator.update(DiscreetAngle::ZERO, &positions(0.0, 0.0));
        estimator.update(DiscreetAngle::ZERO, &positions(1.0, 0.0));
        estimator.reset(
            DiscreetAngle::ZERO,
            &positions(1.0, 0.0),
            Pose2d {
                x_m: 5.0,
                y_m: 5.0,
                heading: DiscreetAngle::ZERO,
            },
        );
        estimator.update(DiscreetAngle::ZERO, &positions(1.5, 0.0));
        let pose = estimator.estimated_position();
        assert!((pose.x_m - 5.5).abs() < EPSILON);
        assert!((pose.y_m - 5.0).abs() < EPSILON);
    }
}
