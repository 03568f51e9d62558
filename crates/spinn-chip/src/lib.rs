//! Hardware model for the neuromorphic mesh fabric.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of what the host has to agree on with the cores: address
//! ranges, SCP/SDP command encodings, tag slots, the data-specification
//! bytecode, the region pointer table, the provenance counter block and the
//! send-buffer entry layout.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`address`] | Chip/core address ranges (256×256 chips, 18 cores each) |
//! | [`scp`] | SDP header layout, ports, flags, command codes, result codes |
//! | [`tags`] | IP tag slot count and reserved ports |
//! | [`dse`] | Data-specification command words and region pointer table |
//! | [`provenance`] | System provenance counter block |
//! | [`eieio`] | Send-buffer entry layout and key prefix types |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod dse;
pub mod eieio;
pub mod provenance;
pub mod scp;
pub mod tags;
