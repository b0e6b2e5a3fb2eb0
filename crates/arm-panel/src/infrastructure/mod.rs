//! Infrastructure layer of the arm panel.
//!
//! Contains OS-facing adapters: the serial transport (real and simulated),
//! port discovery, file-system storage and the UI command bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and `arm_core`,
//! but MUST NOT be imported by the `application` layer.

pub mod ports;
pub mod serial;
pub mod storage;
pub mod ui_bridge;
