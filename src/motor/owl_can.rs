// owlRobotics motor-node bus protocol
//
// Every frame rides on the same arbitration id; the addressing lives in the
// first two data bytes:
// [header_lo, header_hi, cmd, val, payload...]
//
// header (u16, little-endian): bits 0..6 source node, 6..12 dest node,
// 12..16 reserved (always 0)

/// Highest addressable node id (6 bits)
pub const MAX_NODE_ID: u8 = 0x3F;

/// Header + cmd + val
const PREFIX_LEN: usize = 4;

const NODE_MASK: u16 = 0x3F;
const DEST_SHIFT: u16 = 6;
const RESERVED_SHIFT: u16 = 12;

/// What to do with the value
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    Info = 0,
    Request = 1,
    Set = 2,
    Save = 3,
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        Ok(match value {
            0 => Self::Info,
            1 => Self::Request,
            2 => Self::Set,
            3 => Self::Save,
            _ => return Err(FrameError::UnknownCommand(value)),
        })
    }
}

/// Which variable the command acts on
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Target = 0,
    Voltage = 1,
    Current = 2,
    Velocity = 3,
    Angle = 4,
    MotionCtlMode = 5,
    CfgMem = 6,
    MotorEnable = 7,
    AngleP = 8,
    VelocityLimit = 9,      // max velocity of the position controller (rad/s)
    PidVelocityP = 10,
    PidVelocityI = 11,
    PidVelocityD = 12,
    PidVelocityRamp = 13,   // max output change per second
    LpfVelocityTf = 14,     // low-pass time constant (s)
    Error = 15,
    UploadFirmware = 16,
    FirmwareCrc = 17,
    FirmwareVer = 18,
    BroadcastRxEnable = 19,
    FifoTarget = 20,
    EndswitchAllowPosNegDtargets = 21,
    Reboot = 22,
    Endswitch = 23,
    FifoClock = 24,
    ControlError = 25,
    FifoTargetAckResultVal = 26,
    DetectedSupplyVoltage = 27,
    AngleAdd = 28,
    PwmSpeed = 29,          // -1.0..1.0
    OdoTicks = 30,
}

impl TryFrom<u8> for Value {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        use Value::*;
        const ALL: [Value; 31] = [
            Target,
            Voltage,
            Current,
            Velocity,
            Angle,
            MotionCtlMode,
            CfgMem,
            MotorEnable,
            AngleP,
            VelocityLimit,
            PidVelocityP,
            PidVelocityI,
            PidVelocityD,
            PidVelocityRamp,
            LpfVelocityTf,
            Error,
            UploadFirmware,
            FirmwareCrc,
            FirmwareVer,
            BroadcastRxEnable,
            FifoTarget,
            EndswitchAllowPosNegDtargets,
            Reboot,
            Endswitch,
            FifoClock,
            ControlError,
            FifoTargetAckResultVal,
            DetectedSupplyVoltage,
            AngleAdd,
            PwmSpeed,
            OdoTicks,
        ];
        ALL.get(value as usize)
            .copied()
            .ok_or(FrameError::UnknownValue(value))
    }
}

/// Payload encoding carried by a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// No payload (triggers)
    Empty,
    /// 1 byte
    Byte,
    /// 4 byte little-endian i32
    Int,
    /// 4 byte little-endian u32
    UInt,
    /// 4 byte little-endian IEEE-754
    Float,
}

impl PayloadKind {
    pub fn width(self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Byte => 1,
            Self::Int | Self::UInt | Self::Float => 4,
        }
    }
}

impl Value {
    pub fn payload_kind(self) -> PayloadKind {
        use Value::*;
        match self {
            Reboot | FifoClock => PayloadKind::Empty,
            MotionCtlMode | CfgMem | MotorEnable | Error | BroadcastRxEnable
            | EndswitchAllowPosNegDtargets | Endswitch | FifoTargetAckResultVal => {
                PayloadKind::Byte
            }
            OdoTicks => PayloadKind::Int,
            UploadFirmware | FirmwareCrc | FirmwareVer => PayloadKind::UInt,
            Target | Voltage | Current | Velocity | Angle | AngleP | VelocityLimit
            | PidVelocityP | PidVelocityI | PidVelocityD | PidVelocityRamp | LpfVelocityTf
            | FifoTarget | ControlError | DetectedSupplyVoltage | AngleAdd | PwmSpeed => {
                PayloadKind::Float
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Empty,
    Byte(u8),
    Int(i32),
    UInt(u32),
    Float(f32),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Empty => PayloadKind::Empty,
            Self::Byte(_) => PayloadKind::Byte,
            Self::Int(_) => PayloadKind::Int,
            Self::UInt(_) => PayloadKind::UInt,
            Self::Float(_) => PayloadKind::Float,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match *self {
            Self::Empty => {}
            Self::Byte(b) => out.push(b),
            Self::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::UInt(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn read(kind: PayloadKind, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != kind.width() {
            return None;
        }
        Some(match kind {
            PayloadKind::Empty => Self::Empty,
            PayloadKind::Byte => Self::Byte(bytes[0]),
            PayloadKind::Int => Self::Int(i32::from_le_bytes(bytes.try_into().ok()?)),
            PayloadKind::UInt => Self::UInt(u32::from_le_bytes(bytes.try_into().ok()?)),
            PayloadKind::Float => Self::Float(f32::from_le_bytes(bytes.try_into().ok()?)),
        })
    }
}

/// Error states reported by a node with `Value::Error`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFault {
    Ok = 0,
    NoComm = 1,
    NoSettings = 2,
    Undervoltage = 3,
    Overvoltage = 4,
    Overcurrent = 5,
    Overtemp = 6,
}

impl NodeFault {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            1 => Self::NoComm,
            2 => Self::NoSettings,
            3 => Self::Undervoltage,
            4 => Self::Overvoltage,
            5 => Self::Overcurrent,
            6 => Self::Overtemp,
            _ => return None,
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("Node id {0} out of range (max 63)")]
    NodeIdOutOfRange(u8),

    #[error("Value {value:?} carries a {expected:?} payload, got {got:?}")]
    PayloadMismatch {
        value: Value,
        expected: PayloadKind,
        got: PayloadKind,
    },

    #[error("Value {value:?} cannot carry a {len}-byte payload")]
    BadPayloadLength { value: Value, len: usize },

    #[error("Frame too short: {0} bytes")]
    Truncated(usize),

    #[error("Unknown command byte {0}")]
    UnknownCommand(u8),

    #[error("Unknown value byte {0}")]
    UnknownValue(u8),

    #[error("Reserved header bits set: 0x{0:04X}")]
    ReservedBits(u16),
}

/// Source/destination pair packed into the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHeader {
    pub source: u8,
    pub dest: u8,
}

impl NodeHeader {
    pub fn new(source: u8, dest: u8) -> Result<Self, FrameError> {
        for id in [source, dest] {
            if id > MAX_NODE_ID {
                return Err(FrameError::NodeIdOutOfRange(id));
            }
        }
        Ok(Self { source, dest })
    }

    pub fn pack(&self) -> u16 {
        (self.source as u16 & NODE_MASK) | ((self.dest as u16 & NODE_MASK) << DEST_SHIFT)
    }

    pub fn unpack(raw: u16) -> Result<Self, FrameError> {
        if raw >> RESERVED_SHIFT != 0 {
            return Err(FrameError::ReservedBits(raw));
        }
        Ok(Self {
            source: (raw & NODE_MASK) as u8,
            dest: ((raw >> DEST_SHIFT) & NODE_MASK) as u8,
        })
    }
}

/// One command to one node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanFrame {
    pub header: NodeHeader,
    pub cmd: Command,
    pub val: Value,
    pub payload: Payload,
}

impl CanFrame {
    /// Build a frame, checking the payload against the value's declared kind.
    ///
    /// Requests carry no payload; every other command must match.
    pub fn new(
        source: u8,
        dest: u8,
        cmd: Command,
        val: Value,
        payload: Payload,
    ) -> Result<Self, FrameError> {
        let header = NodeHeader::new(source, dest)?;
        let expected = match cmd {
            Command::Request => PayloadKind::Empty,
            _ => val.payload_kind(),
        };
        if payload.kind() != expected {
            return Err(FrameError::PayloadMismatch {
                value: val,
                expected,
                got: payload.kind(),
            });
        }
        Ok(Self {
            header,
            cmd,
            val,
            payload,
        })
    }

    /// Velocity set-point for a motor node (rad/s)
    pub fn set_velocity(source: u8, dest: u8, rad_per_sec: f32) -> Result<Self, FrameError> {
        Self::new(
            source,
            dest,
            Command::Set,
            Value::Velocity,
            Payload::Float(rad_per_sec),
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX_LEN + self.payload.kind().width());
        out.extend_from_slice(&self.header.pack().to_le_bytes());
        out.push(self.cmd as u8);
        out.push(self.val as u8);
        self.payload.write(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < PREFIX_LEN {
            return Err(FrameError::Truncated(bytes.len()));
        }
        let header = NodeHeader::unpack(u16::from_le_bytes([bytes[0], bytes[1]]))?;
        let cmd = Command::try_from(bytes[2])?;
        let val = Value::try_from(bytes[3])?;
        let body = &bytes[PREFIX_LEN..];

        let kind = if body.is_empty() {
            PayloadKind::Empty
        } else {
            val.payload_kind()
        };
        let payload = Payload::read(kind, body).ok_or(FrameError::BadPayloadLength {
            value: val,
            len: body.len(),
        })?;

        Ok(Self {
            header,
            cmd,
            val,
            payload,
        })
    }

    /// Fault code if this is an error report
    pub fn fault(&self) -> Option<NodeFault> {
        match (self.val, self.payload) {
            (Value::Error, Payload::Byte(code)) => NodeFault::from_code(code),
            _ => None,
        }
    }
}

/// Free-function form of `CanFrame::new(..).encode()`
pub fn encode(
    source: u8,
    dest: u8,
    cmd: Command,
    val: Value,
    payload: Payload,
) -> Result<Vec<u8>, FrameError> {
    Ok(CanFrame::new(source, dest, cmd, val, payload)?.encode())
}
