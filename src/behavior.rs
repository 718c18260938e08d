// Behavior selection: gamepad state (+ detections) -> body velocity
//
// The pad reports the pressed button on every packet, not as an event, so
// toggles are guarded by a per-button debounce window. Everything that must
// survive between ticks lives in `BehaviorMode`; `step` is otherwise a pure
// function of its arguments.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{
    OSCILLATE_PERIOD, PlatformConfig, TOGGLE_DEBOUNCE, TOOL_SPEEDS, TRACK_TIMEOUT,
};
use crate::input::{ExtraButton, InputState, JoystickButton, PadMode};
use crate::messages::{BodyVelocityCommand, DetectionResult};

/// Follow-me horizontal deadband: steer only outside [0.4, 0.6]
const TRACK_TURN_RIGHT_ABOVE: f32 = 0.6;
const TRACK_TURN_LEFT_BELOW: f32 = 0.4;

/// Follow-me approaches only while the target's vertical center is in (0.2, 0.7)
const TRACK_APPROACH_MIN_Y: f32 = 0.2;
const TRACK_APPROACH_MAX_Y: f32 = 0.7;

/// Host power hook for the rectangle button
pub trait PowerControl {
    fn shutdown(&mut self);
}

/// Logs the request and does nothing else
#[derive(Debug, Default)]
pub struct LogOnlyPower;

impl PowerControl for LogOnlyPower {
    fn shutdown(&mut self) {
        warn!("Shutdown requested from gamepad (ignored, shutdown not allowed)");
    }
}

/// Powers the host off with `shutdown now`
#[derive(Debug, Default)]
pub struct SystemShutdown;

impl PowerControl for SystemShutdown {
    fn shutdown(&mut self) {
        warn!("Shutdown requested from gamepad, powering off");
        if let Err(e) = std::process::Command::new("shutdown").arg("now").spawn() {
            warn!("Failed to run shutdown: {}", e);
        }
    }
}

/// Minimum spacing between two actions of a held button
#[derive(Debug, Clone, Copy, Default)]
pub struct Debounce {
    next_allowed: Option<Instant>,
}

impl Debounce {
    /// True (and re-arms) if the window has elapsed
    pub fn fire(&mut self, now: Instant, window: Duration) -> bool {
        if self.next_allowed.is_some_and(|at| now < at) {
            return false;
        }
        self.next_allowed = Some(now + window);
        true
    }
}

/// State carried across ticks, owned by the runtime and lent to `step`
#[derive(Debug, Clone)]
pub struct BehaviorMode {
    pub follow_me_enabled: bool,
    pub sideways_enabled: bool,
    /// Tool motor speed (rad/s), one of `TOOL_SPEEDS`
    pub tool_speed: f32,
    /// Linear speed limit chosen with the preset buttons (m/s)
    pub linear_limit: f32,
    pub select_debounce: Debounce,
    pub start_debounce: Debounce,
    pub circle_debounce: Debounce,
    pub rectangle_debounce: Debounce,
    pub track_timeout_at: Option<Instant>,
    pub oscillate_timeout_at: Option<Instant>,
    pub oscillate_left: bool,
}

impl BehaviorMode {
    pub fn new(platform: &PlatformConfig) -> Self {
        Self {
            follow_me_enabled: false,
            sideways_enabled: false,
            tool_speed: TOOL_SPEEDS[0],
            linear_limit: platform.max_linear_speed,
            select_debounce: Debounce::default(),
            start_debounce: Debounce::default(),
            circle_debounce: Debounce::default(),
            rectangle_debounce: Debounce::default(),
            track_timeout_at: None,
            oscillate_timeout_at: None,
            oscillate_left: true,
        }
    }

    /// Angular limit follows the linear preset proportionally
    fn angular_limit(&self, platform: &PlatformConfig) -> f32 {
        if platform.max_linear_speed > 0.0 {
            platform.max_angular_speed * self.linear_limit / platform.max_linear_speed
        } else {
            0.0
        }
    }
}

fn next_tool_speed(current: f32) -> f32 {
    let idx = TOOL_SPEEDS.iter().position(|&s| s == current).unwrap_or(0);
    TOOL_SPEEDS[(idx + 1) % TOOL_SPEEDS.len()]
}

/// Run one control tick
pub fn step(
    now: Instant,
    input: &InputState,
    detection: Option<&DetectionResult>,
    mode: &mut BehaviorMode,
    platform: &PlatformConfig,
    power: &mut impl PowerControl,
) -> BodyVelocityCommand {
    apply_buttons(now, input.extra_button, mode, platform, power);

    let linear = mode.linear_limit;
    let angular = mode.angular_limit(platform);

    if mode.follow_me_enabled {
        follow(now, detection, mode, linear, angular)
    } else {
        manual(input, mode, linear, angular)
    }
}

fn apply_buttons(
    now: Instant,
    button: ExtraButton,
    mode: &mut BehaviorMode,
    platform: &PlatformConfig,
    power: &mut impl PowerControl,
) {
    match button {
        ExtraButton::Select => {
            if mode.select_debounce.fire(now, TOGGLE_DEBOUNCE) {
                mode.follow_me_enabled = !mode.follow_me_enabled;
                info!("Follow-me {}", on_off(mode.follow_me_enabled));
            }
        }
        ExtraButton::Start => {
            if mode.start_debounce.fire(now, TOGGLE_DEBOUNCE) {
                mode.sideways_enabled = !mode.sideways_enabled;
                info!("Sideways {}", on_off(mode.sideways_enabled));
            }
        }
        // setting the same preset every tick is harmless
        ExtraButton::Triangle => mode.linear_limit = platform.slow_linear_speed,
        ExtraButton::Cross => mode.linear_limit = platform.fast_linear_speed,
        ExtraButton::Circle => {
            if mode.circle_debounce.fire(now, TOGGLE_DEBOUNCE) {
                mode.tool_speed = next_tool_speed(mode.tool_speed);
                info!("Tool speed {}", mode.tool_speed);
            }
        }
        ExtraButton::Rectangle => {
            if mode.rectangle_debounce.fire(now, TOGGLE_DEBOUNCE) {
                power.shutdown();
            }
        }
        ExtraButton::Released => {}
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn follow(
    now: Instant,
    detection: Option<&DetectionResult>,
    mode: &mut BehaviorMode,
    linear: f32,
    angular: f32,
) -> BodyVelocityCommand {
    let mut cmd = BodyVelocityCommand::zero();
    let target = detection.filter(|d| d.is_usable());

    if let Some(d) = target {
        if d.center_x > TRACK_TURN_RIGHT_ABOVE {
            cmd.angular_z = angular;
            mode.track_timeout_at = Some(now + TRACK_TIMEOUT);
        } else if d.center_x < TRACK_TURN_LEFT_BELOW {
            cmd.angular_z = -angular;
            mode.track_timeout_at = Some(now + TRACK_TIMEOUT);
        } else if d.center_y > TRACK_APPROACH_MIN_Y && d.center_y < TRACK_APPROACH_MAX_Y {
            cmd.linear_x = linear;
            mode.track_timeout_at = Some(now + TRACK_TIMEOUT);
        }
    }

    let lost = mode.track_timeout_at.is_none_or(|at| now > at);
    if target.is_none() || lost {
        // search: sweep one way, reverse every period
        if mode.oscillate_timeout_at.is_none_or(|at| now > at) {
            mode.oscillate_timeout_at = Some(now + OSCILLATE_PERIOD);
            mode.oscillate_left = !mode.oscillate_left;
        }
        cmd = BodyVelocityCommand::zero();
        cmd.angular_z = if mode.oscillate_left { -angular } else { angular };
    }

    cmd
}

fn manual(input: &InputState, mode: &BehaviorMode, linear: f32, angular: f32) -> BodyVelocityCommand {
    let mut cmd = BodyVelocityCommand::zero();

    match input.mode {
        PadMode::Analog => {
            cmd.linear_x = input.analog_y * linear;
            if mode.sideways_enabled {
                cmd.linear_y = input.analog_x * linear;
            } else {
                cmd.angular_z = input.analog_x * angular;
            }
        }
        PadMode::Digital => match input.joystick_button {
            JoystickButton::Up => cmd.linear_x = linear,
            JoystickButton::Down => cmd.linear_x = -linear,
            JoystickButton::Right => cmd.angular_z = -angular,
            JoystickButton::Left => cmd.angular_z = angular,
            JoystickButton::Released => {}
        },
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingPower {
        calls: usize,
    }

    impl PowerControl for CountingPower {
        fn shutdown(&mut self) {
            self.calls += 1;
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn pressed(extra: ExtraButton) -> InputState {
        InputState {
            extra_button: extra,
            ..Default::default()
        }
    }

    fn digital(button: JoystickButton) -> InputState {
        InputState {
            joystick_button: button,
            ..Default::default()
        }
    }

    fn analog(x: f32, y: f32) -> InputState {
        InputState {
            mode: PadMode::Analog,
            analog_x: x,
            analog_y: y,
            ..Default::default()
        }
    }

    struct Rig {
        t0: Instant,
        mode: BehaviorMode,
        platform: PlatformConfig,
        power: CountingPower,
    }

    impl Rig {
        fn new() -> Self {
            let platform = PlatformConfig::differential();
            Self {
                t0: Instant::now(),
                mode: BehaviorMode::new(&platform),
                platform,
                power: CountingPower::default(),
            }
        }

        fn step(
            &mut self,
            at_ms: u64,
            input: InputState,
            detection: Option<DetectionResult>,
        ) -> BodyVelocityCommand {
            step(
                self.t0 + ms(at_ms),
                &input,
                detection.as_ref(),
                &mut self.mode,
                &self.platform,
                &mut self.power,
            )
        }
    }

    #[test]
    fn test_held_select_toggles_once_per_window() {
        let mut rig = Rig::new();
        rig.step(0, pressed(ExtraButton::Select), None);
        assert!(rig.mode.follow_me_enabled);

        // still held 10ms later, and again at 499ms
        rig.step(10, pressed(ExtraButton::Select), None);
        rig.step(499, pressed(ExtraButton::Select), None);
        assert!(rig.mode.follow_me_enabled);

        rig.step(500, pressed(ExtraButton::Select), None);
        assert!(!rig.mode.follow_me_enabled);

        rig.step(1000, pressed(ExtraButton::Select), None);
        assert!(rig.mode.follow_me_enabled);
    }

    #[test]
    fn test_toggle_buttons_debounce_independently() {
        let mut rig = Rig::new();
        rig.step(0, pressed(ExtraButton::Start), None);
        rig.step(100, pressed(ExtraButton::Circle), None);
        assert!(rig.mode.sideways_enabled);
        assert_eq!(rig.mode.tool_speed, 100.0);
    }

    #[test]
    fn test_circle_cycles_tool_speed() {
        let mut rig = Rig::new();
        let mut seen = Vec::new();
        for i in 0..4 {
            rig.step(i * 600, pressed(ExtraButton::Circle), None);
            seen.push(rig.mode.tool_speed);
        }
        assert_eq!(seen, vec![100.0, 300.0, 0.0, 100.0]);
    }

    #[test]
    fn test_rectangle_shuts_down_once_per_window() {
        let mut rig = Rig::new();
        for t in [0, 50, 100, 400] {
            rig.step(t, pressed(ExtraButton::Rectangle), None);
        }
        assert_eq!(rig.power.calls, 1);
        rig.step(600, pressed(ExtraButton::Rectangle), None);
        assert_eq!(rig.power.calls, 2);
    }

    #[test]
    fn test_speed_presets_scale_digital_drive() {
        let mut rig = Rig::new();
        let full = rig.step(0, digital(JoystickButton::Up), None);
        assert_eq!(full.linear_x, 0.5);

        rig.step(10, pressed(ExtraButton::Triangle), None);
        let slow = rig.step(20, digital(JoystickButton::Up), None);
        assert!((slow.linear_x - 0.3).abs() < 1e-6);

        // angular follows the preset: 1.0 * 0.3 / 0.5
        let turn = rig.step(30, digital(JoystickButton::Left), None);
        assert!((turn.angular_z - 0.6).abs() < 1e-6);

        rig.step(40, pressed(ExtraButton::Cross), None);
        let fast = rig.step(50, digital(JoystickButton::Down), None);
        assert_eq!(fast.linear_x, -0.5);
    }

    #[test]
    fn test_digital_directions() {
        let mut rig = Rig::new();
        let right = rig.step(0, digital(JoystickButton::Right), None);
        assert_eq!(right, BodyVelocityCommand { linear_x: 0.0, linear_y: 0.0, angular_z: -1.0 });
        let left = rig.step(10, digital(JoystickButton::Left), None);
        assert_eq!(left.angular_z, 1.0);
        let released = rig.step(20, digital(JoystickButton::Released), None);
        assert_eq!(released, BodyVelocityCommand::zero());
    }

    #[test]
    fn test_analog_turn_or_strafe() {
        let mut rig = Rig::new();
        let turn = rig.step(0, analog(0.5, 1.0), None);
        assert_eq!(turn.linear_x, 0.5);
        assert_eq!(turn.angular_z, 0.5);
        assert_eq!(turn.linear_y, 0.0);

        rig.mode.sideways_enabled = true;
        let strafe = rig.step(10, analog(0.5, 1.0), None);
        assert_eq!(strafe.linear_y, 0.25);
        assert_eq!(strafe.angular_z, 0.0);
    }

    #[test]
    fn test_follow_me_ignores_joystick_and_tracks() {
        let mut rig = Rig::new();
        rig.mode.follow_me_enabled = true;

        let right = rig.step(0, digital(JoystickButton::Up), Some(DetectionResult::at(0.8, 0.5)));
        assert_eq!(right, BodyVelocityCommand { linear_x: 0.0, linear_y: 0.0, angular_z: 1.0 });
        assert_eq!(rig.mode.track_timeout_at, Some(rig.t0 + ms(2000)));

        let left = rig.step(10, InputState::default(), Some(DetectionResult::at(0.2, 0.5)));
        assert_eq!(left.angular_z, -1.0);

        let ahead = rig.step(20, InputState::default(), Some(DetectionResult::at(0.5, 0.5)));
        assert_eq!(ahead, BodyVelocityCommand { linear_x: 0.5, linear_y: 0.0, angular_z: 0.0 });
    }

    #[test]
    fn test_follow_me_centered_but_too_close_holds_still() {
        let mut rig = Rig::new();
        rig.mode.follow_me_enabled = true;
        rig.step(0, InputState::default(), Some(DetectionResult::at(0.8, 0.5)));

        let hold = rig.step(100, InputState::default(), Some(DetectionResult::at(0.5, 0.9)));
        assert_eq!(hold, BodyVelocityCommand::zero());
    }

    #[test]
    fn test_follow_me_scans_when_target_lost() {
        let mut rig = Rig::new();
        rig.mode.follow_me_enabled = true;

        // starts with oscillate_left = true, first scan flips it
        let first = rig.step(0, InputState::default(), None);
        assert_eq!(first.angular_z, 1.0);
        assert!(!rig.mode.oscillate_left);

        let same = rig.step(1500, InputState::default(), None);
        assert_eq!(same.angular_z, 1.0);

        let flipped = rig.step(2001, InputState::default(), None);
        assert_eq!(flipped.angular_z, -1.0);
    }

    #[test]
    fn test_follow_me_track_timeout_overrides_stale_detection() {
        let mut rig = Rig::new();
        rig.mode.follow_me_enabled = true;
        rig.step(0, InputState::default(), Some(DetectionResult::at(0.8, 0.5)));

        // a detection that matches no branch does not refresh the timeout
        let cmd = rig.step(2100, InputState::default(), Some(DetectionResult::at(0.5, 0.95)));
        assert_ne!(cmd.angular_z, 0.0);
        assert_eq!(cmd.linear_x, 0.0);
    }

    #[test]
    fn test_unusable_detection_counts_as_absent() {
        let mut rig = Rig::new();
        rig.mode.follow_me_enabled = true;
        let cmd = rig.step(0, InputState::default(), Some(DetectionResult::at(0.0, 0.5)));
        assert_ne!(cmd.angular_z, 0.0);
        assert!(rig.mode.track_timeout_at.is_none());
    }

    #[test]
    fn test_step_is_deterministic() {
        let mut a = Rig::new();
        let mut b = Rig {
            t0: a.t0,
            ..Rig::new()
        };
        a.mode.follow_me_enabled = true;
        b.mode.follow_me_enabled = true;
        for t in [0, 700, 1400, 2500, 4600] {
            let det = Some(DetectionResult::at(0.3, 0.4));
            assert_eq!(a.step(t, InputState::default(), det), b.step(t, InputState::default(), det));
        }
    }
}
