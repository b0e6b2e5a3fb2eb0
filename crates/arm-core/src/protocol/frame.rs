//! Text codec for the joint command frame.
//!
//! Wire format (one frame per line, ASCII):
//! ```text
//! J <joint> <angle>\n
//! ```
//! `joint` is the decimal wire index (0–5) and `angle` the decimal angle in
//! degrees (0–180).  The firmware tokenises on single spaces, so the literal
//! `"J "`, the separating space and the trailing `'\n'` must never change.

use thiserror::Error;

use crate::domain::joint::{Angle, Joint, JointCommand};

/// Leading token of every joint frame.
pub const FRAME_TAG: &str = "J";

/// Frame terminator.
pub const FRAME_TERMINATOR: char = '\n';

/// Errors produced while decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not newline-terminated")]
    MissingTerminator,

    #[error("frame must start with \"J \": {0:?}")]
    BadTag(String),

    #[error("frame must have exactly three fields: {0:?}")]
    FieldCount(String),

    #[error("invalid joint field {0:?}")]
    BadJoint(String),

    #[error("invalid angle field {0:?}")]
    BadAngle(String),
}

/// Encodes `command` as a complete, newline-terminated frame.
///
/// # Examples
///
/// ```rust
/// use arm_core::{encode_frame, Angle, Joint, JointCommand};
///
/// let cmd = JointCommand::new(Joint::Elbow, Angle::clamped(45));
/// assert_eq!(encode_frame(&cmd), "J 3 45\n");
/// ```
pub fn encode_frame(command: &JointCommand) -> String {
    format!(
        "{FRAME_TAG} {} {}{FRAME_TERMINATOR}",
        command.joint.index(),
        command.angle.degrees()
    )
}

/// Decodes one complete frame, including its terminator.
///
/// Decoding is strict: out-of-range angles are rejected rather than clamped,
/// because a frame on the wire is expected to have been clamped already.
///
/// # Errors
///
/// Returns a [`FrameError`] describing the first malformed part.
pub fn decode_frame(frame: &str) -> Result<JointCommand, FrameError> {
    let body = frame
        .strip_suffix(FRAME_TERMINATOR)
        .ok_or(FrameError::MissingTerminator)?;
    let body = body.strip_suffix('\r').unwrap_or(body);

    let fields: Vec<&str> = body.split(' ').collect();
    if fields.first() != Some(&FRAME_TAG) {
        return Err(FrameError::BadTag(body.to_string()));
    }
    if fields.len() != 3 {
        return Err(FrameError::FieldCount(body.to_string()));
    }

    let joint = fields[1]
        .parse::<usize>()
        .ok()
        .and_then(Joint::from_index)
        .ok_or_else(|| FrameError::BadJoint(fields[1].to_string()))?;
    let angle = fields[2]
        .parse::<u8>()
        .ok()
        .and_then(|deg| Angle::try_from(deg).ok())
        .ok_or_else(|| FrameError::BadAngle(fields[2].to_string()))?;

    Ok(JointCommand::new(joint, angle))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(joint: usize, angle: i64) -> JointCommand {
        JointCommand::from_raw(joint, angle).unwrap()
    }

    #[test]
    fn test_encode_frame_joint_3_angle_45() {
        assert_eq!(encode_frame(&cmd(3, 45)), "J 3 45\n");
    }

    #[test]
    fn test_encode_frame_uses_clamped_angle() {
        assert_eq!(encode_frame(&cmd(0, -10)), "J 0 0\n");
        assert_eq!(encode_frame(&cmd(5, 999)), "J 5 180\n");
    }

    #[test]
    fn test_encode_frame_keeps_literal_tokens_for_every_joint() {
        for joint in Joint::ALL {
            for deg in [0, 1, 90, 179, 180] {
                let frame = encode_frame(&JointCommand::new(joint, Angle::clamped(deg)));
                assert!(frame.starts_with("J "), "{frame:?}");
                assert!(frame.ends_with('\n'), "{frame:?}");
                assert_eq!(frame.matches(' ').count(), 2, "{frame:?}");
            }
        }
    }

    #[test]
    fn test_decode_frame_parses_valid_frame() {
        assert_eq!(decode_frame("J 5 170\n"), Ok(cmd(5, 170)));
    }

    #[test]
    fn test_decode_frame_tolerates_crlf() {
        assert_eq!(decode_frame("J 1 10\r\n"), Ok(cmd(1, 10)));
    }

    #[test]
    fn test_decode_frame_requires_terminator() {
        assert_eq!(decode_frame("J 1 10"), Err(FrameError::MissingTerminator));
    }

    #[test]
    fn test_decode_frame_rejects_wrong_tag() {
        assert!(matches!(decode_frame("K 1 10\n"), Err(FrameError::BadTag(_))));
    }

    #[test]
    fn test_decode_frame_rejects_extra_fields() {
        assert!(matches!(
            decode_frame("J 1 10 20\n"),
            Err(FrameError::FieldCount(_))
        ));
    }

    #[test]
    fn test_decode_frame_rejects_joint_out_of_range() {
        assert_eq!(
            decode_frame("J 6 10\n"),
            Err(FrameError::BadJoint("6".to_string()))
        );
    }

    #[test]
    fn test_decode_frame_rejects_angle_out_of_range() {
        assert_eq!(
            decode_frame("J 0 181\n"),
            Err(FrameError::BadAngle("181".to_string()))
        );
    }
}
