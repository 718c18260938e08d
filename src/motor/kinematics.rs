// Inverse kinematics: body velocity -> per-motor angular velocity (rad/s)
//
// Axes follow ROS REP-105: x forward, y left, counter-clockwise positive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PlatformConfig, Topology};
use crate::messages::BodyVelocityCommand;

/// Share of the turn command mixed into each side of a differential base
const DIFFERENTIAL_TURN_GAIN: f32 = 0.3;

/// Logical actuator names, ordered for iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorId {
    Left,
    Right,
    LeftFront,
    RightFront,
    LeftBack,
    RightBack,
    Tool,
}

impl MotorId {
    pub const DIFFERENTIAL: [MotorId; 2] = [MotorId::Left, MotorId::Right];
    pub const MECANUM: [MotorId; 4] = [
        MotorId::LeftFront,
        MotorId::RightFront,
        MotorId::LeftBack,
        MotorId::RightBack,
    ];
}

/// Target angular velocity for every motor of one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotorTarget {
    speeds: BTreeMap<MotorId, f32>,
}

impl MotorTarget {
    /// All listed motors stopped
    pub fn zero(motors: &[MotorId]) -> Self {
        Self {
            speeds: motors.iter().map(|&m| (m, 0.0)).collect(),
        }
    }

    pub fn set(&mut self, motor: MotorId, speed: f32) {
        self.speeds.insert(motor, speed);
    }

    pub fn get(&self, motor: MotorId) -> Option<f32> {
        self.speeds.get(&motor).copied()
    }

    /// Motors in their fixed order
    pub fn iter(&self) -> impl Iterator<Item = (MotorId, f32)> + '_ {
        self.speeds.iter().map(|(&m, &s)| (m, s))
    }

    pub fn len(&self) -> usize {
        self.speeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speeds.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.speeds.values().all(|&s| s == 0.0)
    }

    /// Scale every wheel down proportionally if any exceeds `limit`
    fn limit(mut self, limit: f32) -> Self {
        let peak = self.speeds.values().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak > limit {
            let scale = limit / peak;
            for speed in self.speeds.values_mut() {
                *speed *= scale;
            }
        }
        self
    }
}

/// Map a body velocity onto the wheels of the configured platform.
///
/// Never fails: unusable geometry yields all wheels stopped. The warning for
/// that is logged once by the runtime, see `PlatformConfig::geometry_problem`.
pub fn map_to_motors(cmd: &BodyVelocityCommand, cfg: &PlatformConfig) -> MotorTarget {
    if let Some(reason) = cfg.geometry_problem() {
        debug!("Holding motors at zero: {}", reason);
        return MotorTarget::zero(cfg.wheels());
    }

    match cfg.topology {
        Topology::Differential => differential(cmd, cfg),
        Topology::Mecanum => mecanum(cmd, cfg),
    }
}

/// No saturation here: full forward plus full turn reaches 1.3x
/// `max_wheel_speed` on one side, and the analog pad overshoots by 7/6.
/// Both are how the drive has always behaved.
fn differential(cmd: &BodyVelocityCommand, cfg: &PlatformConfig) -> MotorTarget {
    let forward = cmd.linear_x / cfg.max_linear_speed;
    let turn = cmd.angular_z / cfg.max_angular_speed * DIFFERENTIAL_TURN_GAIN;

    // The turn term swaps sides when reversing. Kept as the drive has always
    // behaved; see DESIGN.md open questions.
    let (left, right) = if forward >= 0.0 {
        (forward + turn, forward - turn)
    } else {
        (forward - turn, forward + turn)
    };

    // Left motor is mounted mirrored
    let mut target = MotorTarget::default();
    target.set(MotorId::Left, -left * cfg.max_wheel_speed);
    target.set(MotorId::Right, right * cfg.max_wheel_speed);
    target
}

fn mecanum(cmd: &BodyVelocityCommand, cfg: &PlatformConfig) -> MotorTarget {
    let vx = cmd.linear_x;
    let vy = cmd.linear_y;
    let wz = cmd.angular_z * (cfg.wheel_to_center_x + cfg.wheel_to_center_y);
    let r = cfg.wheel_radius;

    let mut target = MotorTarget::default();
    target.set(MotorId::LeftFront, (vx - vy - wz) / r);
    target.set(MotorId::RightFront, (vx + vy + wz) / r);
    target.set(MotorId::LeftBack, (vx + vy - wz) / r);
    target.set(MotorId::RightBack, (vx - vy + wz) / r);

    if cfg.max_wheel_speed > 0.0 {
        target.limit(cfg.max_wheel_speed)
    } else {
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(linear_x: f32, linear_y: f32, angular_z: f32) -> BodyVelocityCommand {
        BodyVelocityCommand {
            linear_x,
            linear_y,
            angular_z,
        }
    }

    #[test]
    fn test_zero_command_stops_every_topology() {
        for cfg in [PlatformConfig::differential(), PlatformConfig::mecanum()] {
            let target = map_to_motors(&BodyVelocityCommand::zero(), &cfg);
            assert!(!target.is_empty());
            assert!(target.is_stopped(), "{:?}: {:?}", cfg.topology, target);
        }
    }

    #[test]
    fn test_differential_forward_mirrors_left() {
        let cfg = PlatformConfig::differential();
        let target = map_to_motors(&cmd(cfg.max_linear_speed, 0.0, 0.0), &cfg);
        assert_eq!(target.get(MotorId::Left), Some(-100.0));
        assert_eq!(target.get(MotorId::Right), Some(100.0));
    }

    #[test]
    fn test_differential_turn_term_swaps_when_reversing() {
        let cfg = PlatformConfig::differential();
        let half = cfg.max_linear_speed * 0.5;
        let turn = cfg.max_angular_speed;

        // forward: l = 0.5 + 0.3, r = 0.5 - 0.3
        let fwd = map_to_motors(&cmd(half, 0.0, turn), &cfg);
        assert!((fwd.get(MotorId::Left).unwrap() + 80.0).abs() < 1e-3);
        assert!((fwd.get(MotorId::Right).unwrap() - 20.0).abs() < 1e-3);

        // backward: l = -0.5 - 0.3, r = -0.5 + 0.3
        let back = map_to_motors(&cmd(-half, 0.0, turn), &cfg);
        assert!((back.get(MotorId::Left).unwrap() - 80.0).abs() < 1e-3);
        assert!((back.get(MotorId::Right).unwrap() + 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_differential_is_not_saturated() {
        let cfg = PlatformConfig::differential();

        // l = 1.0 + 0.3, r = 1.0 - 0.3, ratio kept
        let target = map_to_motors(&cmd(cfg.max_linear_speed, 0.0, cfg.max_angular_speed), &cfg);
        assert!((target.get(MotorId::Left).unwrap() + 130.0).abs() < 1e-3);
        assert!((target.get(MotorId::Right).unwrap() - 70.0).abs() < 1e-3);

        // analog full deflection overshoots by 7/6
        let target = map_to_motors(&cmd(cfg.max_linear_speed * 7.0 / 6.0, 0.0, 0.0), &cfg);
        assert!((target.get(MotorId::Left).unwrap() + 116.667).abs() < 1e-2);
        assert!((target.get(MotorId::Right).unwrap() - 116.667).abs() < 1e-2);
    }

    #[test]
    fn test_mecanum_saturation_scales_all_wheels() {
        let cfg = PlatformConfig::mecanum();
        // forward 10 m/s would be 200 rad/s on every wheel
        let target = map_to_motors(&cmd(10.0, 0.0, 0.0), &cfg);
        for m in MotorId::MECANUM {
            assert!((target.get(m).unwrap() - 100.0).abs() < 1e-3, "{:?}", m);
        }
    }

    #[test]
    fn test_differential_zero_limits_fail_safe() {
        let mut cfg = PlatformConfig::differential();
        cfg.max_linear_speed = 0.0;
        let target = map_to_motors(&cmd(0.4, 0.0, 0.2), &cfg);
        assert_eq!(target.len(), 2);
        assert!(target.is_stopped());
    }

    #[test]
    fn test_mecanum_pure_motions() {
        let cfg = PlatformConfig::mecanum();

        let forward = map_to_motors(&cmd(0.1, 0.0, 0.0), &cfg);
        for m in MotorId::MECANUM {
            assert!((forward.get(m).unwrap() - 2.0).abs() < 1e-4, "{:?}", m);
        }

        // strafing left: front-left and back-right reverse
        let left = map_to_motors(&cmd(0.0, 0.1, 0.0), &cfg);
        assert!(left.get(MotorId::LeftFront).unwrap() < 0.0);
        assert!(left.get(MotorId::RightFront).unwrap() > 0.0);
        assert!(left.get(MotorId::LeftBack).unwrap() > 0.0);
        assert!(left.get(MotorId::RightBack).unwrap() < 0.0);

        // counter-clockwise: left side back, right side forward
        let spin = map_to_motors(&cmd(0.0, 0.0, 0.5), &cfg);
        assert!(spin.get(MotorId::LeftFront).unwrap() < 0.0);
        assert!(spin.get(MotorId::LeftBack).unwrap() < 0.0);
        assert!(spin.get(MotorId::RightFront).unwrap() > 0.0);
        assert!(spin.get(MotorId::RightBack).unwrap() > 0.0);
    }

    #[test]
    fn test_mecanum_missing_geometry_fail_safe() {
        let mut cfg = PlatformConfig::mecanum();
        cfg.wheel_radius = 0.0;
        let target = map_to_motors(&cmd(0.3, 0.1, 0.2), &cfg);
        assert_eq!(target.len(), 4);
        assert!(target.is_stopped());
    }

    #[test]
    fn test_iteration_order_is_fixed() {
        let cfg = PlatformConfig::mecanum();
        let order: Vec<MotorId> = map_to_motors(&cmd(0.1, 0.0, 0.0), &cfg)
            .iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(order, MotorId::MECANUM.to_vec());
    }
}
