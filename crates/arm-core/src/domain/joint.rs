//! Joint, angle and pose domain entities.
//!
//! The arm has six hobby servos.  Each one is addressed on the wire by its
//! index (0–5) and driven to an absolute angle in whole degrees (0–180).
//! Operators see the joints by name; the firmware only ever sees the index.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of servo joints on the arm.
pub const JOINT_COUNT: usize = 6;

/// Errors raised when building domain values from untrusted input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JointError {
    /// The joint index is not in `0..JOINT_COUNT`.
    #[error("joint index {0} is out of range (expected 0..=5)")]
    IndexOutOfRange(usize),
}

/// One of the six servo joints, in wire-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Joint {
    Gripper = 0,
    Wrist = 1,
    Twist = 2,
    Elbow = 3,
    Shoulder = 4,
    Base = 5,
}

impl Joint {
    /// All joints ordered by wire index.
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::Gripper,
        Joint::Wrist,
        Joint::Twist,
        Joint::Elbow,
        Joint::Shoulder,
        Joint::Base,
    ];

    /// Returns the joint addressed by `index`, or `None` if out of range.
    pub fn from_index(index: usize) -> Option<Joint> {
        Self::ALL.get(index).copied()
    }

    /// The index used on the wire and in per-joint tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Human-readable joint name shown next to the slider.
    pub fn name(self) -> &'static str {
        match self {
            Joint::Gripper => "Gripper",
            Joint::Wrist => "Wrist",
            Joint::Twist => "Twist",
            Joint::Elbow => "Elbow",
            Joint::Shoulder => "Shoulder",
            Joint::Base => "Base",
        }
    }
}

impl TryFrom<usize> for Joint {
    type Error = JointError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Joint::from_index(index).ok_or(JointError::IndexOutOfRange(index))
    }
}

impl std::fmt::Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.index(), self.name())
    }
}

/// A servo angle in whole degrees, always within `[Angle::MIN, Angle::MAX]`.
///
/// The only way to build an `Angle` from arbitrary input is
/// [`Angle::clamped`], so every `Angle` in the program is already valid for
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Angle(u8);

impl Angle {
    pub const MIN: Angle = Angle(0);
    pub const MAX: Angle = Angle(180);
    /// Neutral position every joint is reset to.
    pub const HOME: Angle = Angle(90);

    /// Clamps `raw` to `[0, 180]`.
    ///
    /// Slider widgets may report fractional or overshooting values; the caller
    /// rounds toward zero before calling this, the same way the slider value
    /// is truncated to an integer.
    pub fn clamped(raw: i64) -> Angle {
        Angle(raw.clamp(Self::MIN.0 as i64, Self::MAX.0 as i64) as u8)
    }

    /// Angle in degrees.
    pub fn degrees(self) -> u8 {
        self.0
    }
}

impl Default for Angle {
    fn default() -> Self {
        Angle::HOME
    }
}

impl TryFrom<u8> for Angle {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(Angle(value))
        } else {
            Err(format!("angle {value} exceeds {}", Self::MAX.0))
        }
    }
}

impl From<Angle> for u8 {
    fn from(angle: Angle) -> u8 {
        angle.0
    }
}

impl std::fmt::Display for Angle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to drive one joint to one angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointCommand {
    pub joint: Joint,
    pub angle: Angle,
}

impl JointCommand {
    pub fn new(joint: Joint, angle: Angle) -> Self {
        Self { joint, angle }
    }

    /// Builds a command from raw presentation values, clamping the angle.
    ///
    /// # Errors
    ///
    /// Returns [`JointError::IndexOutOfRange`] if `joint_index` does not name
    /// one of the six joints.
    pub fn from_raw(joint_index: usize, raw_angle: i64) -> Result<Self, JointError> {
        Ok(Self {
            joint: Joint::try_from(joint_index)?,
            angle: Angle::clamped(raw_angle),
        })
    }
}

/// The last requested angle of every joint.
///
/// This mirrors the slider positions of the panel, so "send all" can
/// retransmit the whole arm and "reset" can put every joint back to
/// [`Angle::HOME`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmPose {
    angles: [Angle; JOINT_COUNT],
}

impl ArmPose {
    /// A pose with every joint at [`Angle::HOME`].
    pub fn home() -> Self {
        Self {
            angles: [Angle::HOME; JOINT_COUNT],
        }
    }

    pub fn angle(&self, joint: Joint) -> Angle {
        self.angles[joint.index()]
    }

    pub fn set(&mut self, joint: Joint, angle: Angle) {
        self.angles[joint.index()] = angle;
    }

    /// One command per joint, in wire-index order.
    pub fn commands(&self) -> impl Iterator<Item = JointCommand> + '_ {
        Joint::ALL
            .iter()
            .map(move |&joint| JointCommand::new(joint, self.angle(joint)))
    }

    /// Angles in wire-index order.
    pub fn angles(&self) -> [Angle; JOINT_COUNT] {
        self.angles
    }
}

impl Default for ArmPose {
    fn default() -> Self {
        Self::home()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
