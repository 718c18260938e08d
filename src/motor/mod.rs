// Motor side of the pipeline
//
// Provides:
// - Inverse kinematics for differential and mecanum bases (body velocity -> wheel rad/s)
// - owlRobotics node protocol frame codec
// - Rate-limited bus writer and frame sinks

mod driver;
pub mod kinematics;
pub mod owl_can;
pub mod slcan;

pub use driver::{BusError, BusWriter, FlushReport, FrameSink};
pub use kinematics::{map_to_motors, MotorId, MotorTarget};
pub use owl_can::{CanFrame, Command, FrameError, Payload, Value};
pub use slcan::SerialCanSink;
