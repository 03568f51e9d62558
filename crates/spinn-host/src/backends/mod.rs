//! Transceiver implementations
//!
//! - **Software**: an in-memory virtual machine. Chip SDRAM, the extra
//!   monitor's route-table commands and the tag table are simulated, with
//!   failure injection for NAKs, lost replies and short writes.
//!
//! Real transports (UDP, with their own retry policy) live outside this crate
//! and implement [`Transceiver`](crate::Transceiver) directly.

pub mod software;

pub use software::{SoftwareTransceiver, WireOp};
