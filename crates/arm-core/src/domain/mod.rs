//! Domain entities for the servo arm.
//!
//! Pure values with no I/O: which joints exist, what an angle is, and the
//! pose the operator has asked for.  Everything the serial bridge sends is
//! built from these types, so an out-of-range joint or angle cannot reach the
//! wire.

pub mod joint;
