// Teleoperation runtime for owlRobotics wheeled platforms
//
// gamepad packet -> InputState -> BodyVelocityCommand -> MotorTarget -> bus frames

pub mod behavior;
pub mod config;
pub mod input;
pub mod messages;
pub mod motor;
pub mod runtime;
