//! Application layer of the arm panel.
//!
//! These use cases orchestrate the serial bridge without knowing which serial
//! implementation sits underneath.  They depend on `arm_core` and on the
//! [`link::SerialLink`] / [`link::LinkOpener`] traits; the infrastructure layer
//! supplies the implementations.
//!
//! # Sub-modules
//!
//! - **`link`** – link traits, link settings and the [`link::LinkError`] type.
//!
//! - **`read_telemetry`** – the reader loop thread that moves device lines
//!   into the inbound queue.
//!
//! - **`dispatch_commands`** – per-joint debounce and the ordered frame
//!   writer.
//!
//! - **`bridge_controller`** – connect/disconnect lifecycle; the single source
//!   of truth for "are we connected".

pub mod bridge_controller;
pub mod dispatch_commands;
pub mod link;
pub mod read_telemetry;
