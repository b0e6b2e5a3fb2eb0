//! # arm-core
//!
//! Shared library for the servo arm control panel containing the joint domain
//! types and the line-oriented serial wire protocol.
//!
//! It has no dependencies on serial ports, threads, or UI frameworks, so the
//! same types can be used by the panel, by tests and by device simulators.
//!
//! - **`domain`** – joints, clamped angles, joint commands and the arm pose.
//! - **`protocol`** – the `J <joint> <angle>\n` frame codec and the
//!   telemetry line type for text coming back from the device.

pub mod domain;
pub mod protocol;

pub use domain::joint::{Angle, ArmPose, Joint, JointCommand, JointError, JOINT_COUNT};
pub use protocol::frame::{decode_frame, encode_frame, FrameError};
pub use protocol::telemetry::{LineOrigin, TelemetryLine};
