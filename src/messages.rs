// Message types crossing the runtime boundary

use serde::{Deserialize, Serialize};

/// Body-frame velocity produced by the behavior selector every tick
/// (x forward, y left, z up, counter-clockwise positive)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct BodyVelocityCommand {
    pub linear_x: f32,
    pub linear_y: f32,
    pub angular_z: f32,
}

impl BodyVelocityCommand {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Detection rectangle from the vision subsystem -> runtime
/// Centers are normalized frame coordinates in [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct DetectionResult {
    pub present: bool,
    #[serde(default)]
    pub center_x: f32,
    #[serde(default)]
    pub center_y: f32,
}

impl DetectionResult {
    pub fn at(center_x: f32, center_y: f32) -> Self {
        Self {
            present: true,
            center_x,
            center_y,
        }
    }

    /// A zero coordinate means the detector produced no usable rectangle
    pub fn is_usable(&self) -> bool {
        self.present && self.center_x > 0.0 && self.center_y > 0.0
    }
}

/// Encoded bus frame published to the bus bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusFrame {
    pub id: u16,
    pub data: Vec<u8>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    InputStale,
}
