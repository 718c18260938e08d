// Timeouts, topics, platform configuration
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::motor::kinematics::MotorId;
use crate::motor::owl_can::MAX_NODE_ID;

// Runtime loop period (the controller pushes packets far slower than this)
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

// Accepted tick periods: 100 Hz down to 10 Hz
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(10);
pub const MAX_TICK_PERIOD: Duration = Duration::from_millis(100);

// Input watchdog: no packet for this long means the pad is gone, stop the robot
pub const INPUT_TIMEOUT: Duration = Duration::from_millis(1000);

// Detections older than this are treated as absent
pub const DETECTION_MAX_AGE: Duration = Duration::from_millis(300);

// Zenoh topics
pub const TOPIC_INPUT: &str = "owl/input/gamepad"; // raw 8-byte controller packets
pub const TOPIC_DETECTION: &str = "owl/vision/detection"; // detection results (JSON)
pub const TOPIC_BUS_TX: &str = "owl/bus/tx"; // encoded bus frames
pub const TOPIC_HEALTH: &str = "owl/state/health"; // health status

// Bus addressing
pub const BUS_MSG_ID: u16 = 300; // arbitration id shared by all drive frames
pub const MY_NODE_ID: u8 = 60;

// Minimum spacing between two frames to the same node/register
pub const BUS_MIN_INTERVAL: Duration = Duration::from_millis(100);

// A send that takes longer than this is abandoned
pub const BUS_SEND_TIMEOUT: Duration = Duration::from_millis(200);

// Serial CAN adapter defaults
pub const SERIAL_PORT: &str = "/dev/ttyACM0";
pub const SERIAL_BAUDRATE: u32 = 115_200;

// Behavior timing
pub const TOGGLE_DEBOUNCE: Duration = Duration::from_millis(500);
pub const TRACK_TIMEOUT: Duration = Duration::from_secs(2);
pub const OSCILLATE_PERIOD: Duration = Duration::from_secs(2);

/// Tool motor speed cycle (rad/s) stepped by the circle button
pub const TOOL_SPEEDS: [f32; 3] = [0.0, 100.0, 300.0];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    #[default]
    Differential,
    Mecanum,
}

/// Drive platform description, read once at startup
///
/// Fields missing from a config file come from the preset of the named
/// topology, node map included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "PlatformFile")]
pub struct PlatformConfig {
    pub topology: Topology,
    /// Body speed limits (m/s, rad/s)
    pub max_linear_speed: f32,
    pub max_angular_speed: f32,
    /// Linear speed presets selected by the triangle / cross buttons (m/s)
    pub slow_linear_speed: f32,
    pub fast_linear_speed: f32,
    /// Wheel speed ceiling (rad/s)
    pub max_wheel_speed: f32,
    /// Wheel geometry (m), used by the mecanum mapping
    pub wheel_radius: f32,
    pub wheel_to_center_x: f32,
    pub wheel_to_center_y: f32,
    /// Bus node id of every motor on this platform
    pub nodes: BTreeMap<MotorId, u8>,
}

impl PlatformConfig {
    pub fn differential() -> Self {
        Self {
            topology: Topology::Differential,
            max_linear_speed: 0.5,
            max_angular_speed: 1.0,
            slow_linear_speed: 0.3,
            fast_linear_speed: 0.5,
            max_wheel_speed: 100.0,
            wheel_radius: 0.0,
            wheel_to_center_x: 0.0,
            wheel_to_center_y: 0.0,
            nodes: BTreeMap::from([(MotorId::Left, 1), (MotorId::Right, 2), (MotorId::Tool, 3)]),
        }
    }

    pub fn mecanum() -> Self {
        Self {
            topology: Topology::Mecanum,
            max_linear_speed: 0.5,
            max_angular_speed: 1.0,
            slow_linear_speed: 0.3,
            fast_linear_speed: 0.5,
            max_wheel_speed: 100.0,
            wheel_radius: 0.05,
            wheel_to_center_x: 0.15,
            wheel_to_center_y: 0.2,
            // no tool motor: node 3 is a wheel on this platform
            nodes: BTreeMap::from([
                (MotorId::LeftBack, 1),
                (MotorId::RightBack, 2),
                (MotorId::RightFront, 3),
                (MotorId::LeftFront, 4),
            ]),
        }
    }

    pub fn preset(topology: Topology) -> Self {
        match topology {
            Topology::Differential => Self::differential(),
            Topology::Mecanum => Self::mecanum(),
        }
    }

    pub fn node_id(&self, motor: MotorId) -> Option<u8> {
        self.nodes.get(&motor).copied()
    }

    /// Wheels driven by the kinematics of this topology
    pub fn wheels(&self) -> &'static [MotorId] {
        match self.topology {
            Topology::Differential => &MotorId::DIFFERENTIAL,
            Topology::Mecanum => &MotorId::MECANUM,
        }
    }

    /// Why the kinematics cannot use these numbers, if they cannot
    pub fn geometry_problem(&self) -> Option<&'static str> {
        match self.topology {
            Topology::Differential
                if self.max_linear_speed <= 0.0
                    || self.max_angular_speed <= 0.0
                    || self.max_wheel_speed <= 0.0 =>
            {
                Some("differential base needs positive max_linear_speed, max_angular_speed and max_wheel_speed")
            }
            Topology::Mecanum
                if self.wheel_radius <= 0.0
                    || self.wheel_to_center_x <= 0.0
                    || self.wheel_to_center_y <= 0.0 =>
            {
                Some("mecanum base needs positive wheel_radius and wheel_to_center_x/y")
            }
            _ => None,
        }
    }

    /// Every wheel has its own node, and no node id is shared
    fn check_nodes(&self) -> Result<(), ConfigError> {
        for &wheel in self.wheels() {
            if self.node_id(wheel).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{:?} platform has no node id for {:?}",
                    self.topology, wheel
                )));
            }
        }

        let mut seen = BTreeMap::new();
        for (&motor, &node) in &self.nodes {
            if node > MAX_NODE_ID {
                return Err(ConfigError::Invalid(format!(
                    "node id {} of {:?} is above 63",
                    node, motor
                )));
            }
            if let Some(other) = seen.insert(node, motor) {
                return Err(ConfigError::Invalid(format!(
                    "node id {} used by both {:?} and {:?}",
                    node, other, motor
                )));
            }
        }
        Ok(())
    }
}

/// Platform as written in a config file, before the preset fills the gaps
#[derive(Deserialize)]
struct PlatformFile {
    #[serde(default)]
    topology: Topology,
    max_linear_speed: Option<f32>,
    max_angular_speed: Option<f32>,
    slow_linear_speed: Option<f32>,
    fast_linear_speed: Option<f32>,
    max_wheel_speed: Option<f32>,
    wheel_radius: Option<f32>,
    wheel_to_center_x: Option<f32>,
    wheel_to_center_y: Option<f32>,
    nodes: Option<BTreeMap<MotorId, u8>>,
}

impl From<PlatformFile> for PlatformConfig {
    fn from(file: PlatformFile) -> Self {
        let base = PlatformConfig::preset(file.topology);
        Self {
            topology: file.topology,
            max_linear_speed: file.max_linear_speed.unwrap_or(base.max_linear_speed),
            max_angular_speed: file.max_angular_speed.unwrap_or(base.max_angular_speed),
            slow_linear_speed: file.slow_linear_speed.unwrap_or(base.slow_linear_speed),
            fast_linear_speed: file.fast_linear_speed.unwrap_or(base.fast_linear_speed),
            max_wheel_speed: file.max_wheel_speed.unwrap_or(base.max_wheel_speed),
            wheel_radius: file.wheel_radius.unwrap_or(base.wheel_radius),
            wheel_to_center_x: file.wheel_to_center_x.unwrap_or(base.wheel_to_center_x),
            wheel_to_center_y: file.wheel_to_center_y.unwrap_or(base.wheel_to_center_y),
            nodes: file.nodes.unwrap_or(base.nodes),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::differential()
    }
}

/// Everything the runtime reads at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub platform: PlatformConfig,
    #[serde(with = "millis")]
    pub tick_period: Duration,
    #[serde(with = "millis")]
    pub input_timeout: Duration,
    #[serde(with = "millis")]
    pub detection_max_age: Duration,
    #[serde(with = "millis")]
    pub bus_min_interval: Duration,
    #[serde(with = "millis")]
    pub bus_send_timeout: Duration,
    pub node_id: u8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            tick_period: TICK_PERIOD,
            input_timeout: INPUT_TIMEOUT,
            detection_max_age: DETECTION_MAX_AGE,
            bus_min_interval: BUS_MIN_INTERVAL,
            bus_send_timeout: BUS_SEND_TIMEOUT,
            node_id: MY_NODE_ID,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reject settings the runtime cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TICK_PERIOD..=MAX_TICK_PERIOD).contains(&self.tick_period) {
            return Err(ConfigError::Invalid(format!(
                "tick_period {:?} outside {:?}..={:?}",
                self.tick_period, MIN_TICK_PERIOD, MAX_TICK_PERIOD
            )));
        }
        if self.node_id > MAX_NODE_ID {
            return Err(ConfigError::Invalid(format!("node_id {} is above 63", self.node_id)));
        }
        self.platform.check_nodes()
    }
}

/// Durations are written as integer milliseconds in config files
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
