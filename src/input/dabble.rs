// Dabble gamepad packet decoder
//
// Packet format (8 bytes, as written to the BLE UART characteristic):
// [0xFF, module, function, arg_count, arg_len, extra_buttons, direction, 0x00]
//
// Only byte 2 (function), byte 5 (extra buttons) and byte 6 (direction or
// packed angle/radius) carry state.

use std::f32::consts::PI;

/// Exact packet length; anything else is dropped
pub const PACKET_LEN: usize = 8;

const FUNCTION_DIGITAL: u8 = 0x01;
const FUNCTION_ANALOG: u8 = 0x02;
const FUNCTION_TILT: u8 = 0x03;

/// Analog angle resolution (degrees per step of the upper 5 bits)
const ANGLE_STEP_DEG: f32 = 15.0;

/// Radius divisor. The pad reports radius 0..=7 but the app divides by 6,
/// so full deflection reads ~1.1667, not 1.0.
const RADIUS_DIVISOR: f32 = 6.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("Bad packet length: expected 8 bytes, got {len}")]
    BadLength { len: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PadMode {
    #[default]
    Digital,
    Analog,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoystickButton {
    Up,
    Down,
    Left,
    Right,
    #[default]
    Released,
}

impl JoystickButton {
    fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Up,
            0x02 => Self::Down,
            0x04 => Self::Left,
            0x08 => Self::Right,
            _ => Self::Released,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Up => 0x01,
            Self::Down => 0x02,
            Self::Left => 0x04,
            Self::Right => 0x08,
            Self::Released => 0x00,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExtraButton {
    Start,
    Select,
    Triangle,
    Circle,
    Cross,
    Rectangle,
    #[default]
    Released,
}

impl ExtraButton {
    fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Start,
            0x02 => Self::Select,
            0x04 => Self::Triangle,
            0x08 => Self::Circle,
            0x10 => Self::Cross,
            0x20 => Self::Rectangle,
            // unused bit patterns are treated as "no button"
            _ => Self::Released,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Start => 0x01,
            Self::Select => 0x02,
            Self::Triangle => 0x04,
            Self::Circle => 0x08,
            Self::Cross => 0x10,
            Self::Rectangle => 0x20,
            Self::Released => 0x00,
        }
    }
}

/// Snapshot of the gamepad, replaced wholesale on every decoded packet
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub mode: PadMode,
    pub joystick_button: JoystickButton,
    /// Roughly [-1.17, 1.17], see `RADIUS_DIVISOR`
    pub analog_x: f32,
    pub analog_y: f32,
    pub extra_button: ExtraButton,
}

impl InputState {
    /// Decode a packet on top of this snapshot.
    ///
    /// Pure: returns a new snapshot and never touches `self`. The previous
    /// snapshot only matters when byte 2 names an unknown pad function, in
    /// which case the mode fields are carried over unchanged.
    pub fn apply(&self, packet: &[u8]) -> Result<InputState, DecodeError> {
        if packet.len() != PACKET_LEN {
            return Err(DecodeError::BadLength { len: packet.len() });
        }

        let mut next = *self;
        next.extra_button = ExtraButton::from_code(packet[5]);

        match packet[2] {
            FUNCTION_ANALOG | FUNCTION_TILT => {
                let (x, y) = unpack_polar(packet[6]);
                next.mode = PadMode::Analog;
                next.joystick_button = JoystickButton::Released;
                next.analog_x = x;
                next.analog_y = y;
            }
            FUNCTION_DIGITAL => {
                next.mode = PadMode::Digital;
                next.joystick_button = JoystickButton::from_code(packet[6]);
                next.analog_x = 0.0;
                next.analog_y = 0.0;
            }
            _ => {}
        }

        Ok(next)
    }
}

/// Decode a packet starting from the neutral snapshot
pub fn decode(packet: &[u8]) -> Result<InputState, DecodeError> {
    InputState::default().apply(packet)
}

/// Split the analog byte into (x, y): upper 5 bits angle step, lower 3 bits radius
fn unpack_polar(value: u8) -> (f32, f32) {
    let angle_deg = (value >> 3) as f32 * ANGLE_STEP_DEG;
    let radius = (value & 0x07) as f32;
    let angle_rad = angle_deg * PI / 180.0;

    (
        radius * angle_rad.cos() / RADIUS_DIVISOR,
        radius * angle_rad.sin() / RADIUS_DIVISOR,
    )
}

/// Build the packet the Dabble app would send for a digital pad state
pub fn encode_digital(button: JoystickButton, extra: ExtraButton) -> [u8; PACKET_LEN] {
    [
        0xFF,
        0x01,
        FUNCTION_DIGITAL,
        0x01,
        0x02,
        extra.code(),
        button.code(),
        0x00,
    ]
}

/// Build the packet the Dabble app would send for an analog stick position
///
/// `angle_step` is in 15° units (0..=23), `radius` in 0..=7.
pub fn encode_analog(angle_step: u8, radius: u8, extra: ExtraButton) -> [u8; PACKET_LEN] {
    let packed = ((angle_step & 0x1F) << 3) | (radius & 0x07);
    [
        0xFF,
        0x01,
        FUNCTION_ANALOG,
        0x01,
        0x02,
        extra.code(),
        packed,
        0x00,
    ]
}
