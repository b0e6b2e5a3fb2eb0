//! Serial wire protocol: the outbound joint frame and inbound telemetry lines.

pub mod frame;
pub mod telemetry;

pub use frame::{decode_frame, encode_frame, FrameError, FRAME_TAG, FRAME_TERMINATOR};
pub use telemetry::{LineOrigin, TelemetryLine};
