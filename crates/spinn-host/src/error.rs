//! Error types for host-side fabric operations

use crate::address::ChipAddress;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for host-side operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur while configuring or talking to the fabric
#[derive(Debug, Error)]
pub enum HostError {
    /// Core id outside the chip's core range
    #[error("Invalid core address ({x}, {y}, {p})")]
    InvalidAddress {
        /// Chip X
        x: u8,
        /// Chip Y
        y: u8,
        /// Processor id
        p: u8,
    },

    /// Key count of zero or beyond the 32-bit key space
    #[error("Invalid key count {n_keys}: must be between 1 and 2^32")]
    InvalidKeyCount {
        /// Requested number of keys
        n_keys: u64,
    },

    /// Base key, prefix and mask cannot form one multicast key
    #[error("Key 0x{key:08x} with prefix 0x{prefix:08x} does not fit mask 0x{mask:08x}")]
    KeyPrefixConflict {
        /// Fixed base key
        key: u32,
        /// Mask derived from the key count
        mask: u32,
        /// Independently supplied prefix
        prefix: u32,
    },

    /// Region re-reserved with a different size
    #[error("Region {region} on core {core} already reserved with {declared} bytes, not {requested}")]
    RegionSizeConflict {
        /// Core owning the region
        core: ChipAddress,
        /// Region id
        region: u8,
        /// Size of the existing reservation
        declared: u32,
        /// Size requested now
        requested: u32,
    },

    /// Region used before being reserved
    #[error("Region {region} on core {core} was not reserved")]
    RegionNotReserved {
        /// Core owning the region
        core: ChipAddress,
        /// Region id
        region: u8,
    },

    /// Data specification could not be executed
    #[error("Data specification error: {reason}")]
    Specification {
        /// Reason for failure
        reason: String,
    },

    /// Tag id outside the managed slot range
    #[error("Tag {tag} is outside the managed tag range")]
    InvalidTagId {
        /// Tag id
        tag: u8,
    },

    /// Tag has no board address to load it onto
    #[error("Tag {tag} has no board address")]
    TagAddressMissing {
        /// Tag id
        tag: u8,
    },

    /// No IP tag allocated for a vertex that sends to the host
    #[error("No IP tag allocated for {label}")]
    MissingNotificationTag {
        /// Vertex label
        label: String,
    },

    /// Vertex has no placement
    #[error("Vertex {label} has no placement")]
    VertexNotPlaced {
        /// Vertex label
        label: String,
    },

    /// Refill requested on a stream that has already ended
    #[error("Stream already exhausted{}", after_tick.map(|t| format!(" after tick {t}")).unwrap_or_default())]
    StreamAlreadyExhausted {
        /// Last tick that carried data, if known
        after_tick: Option<u32>,
    },

    /// Remote memory write failed or was short
    #[error("Write of region {} at 0x{address:08x} on core {core} failed: {reason}", region.map_or_else(|| "-".to_string(), |r| r.to_string()))]
    RemoteWriteFailed {
        /// Target core
        core: ChipAddress,
        /// Region being written, if known
        region: Option<u8>,
        /// Start address
        address: u32,
        /// Reason for failure
        reason: String,
    },

    /// Remote memory read failed or was short
    #[error("Read of {length} bytes at 0x{address:08x} on chip ({x}, {y}) failed: {reason}")]
    RemoteReadFailed {
        /// Chip X
        x: u8,
        /// Chip Y
        y: u8,
        /// Start address
        address: u32,
        /// Requested length
        length: usize,
        /// Reason for failure
        reason: String,
    },

    /// Core answered with a result code other than OK
    #[error("Command {opcode} to core {core} failed with {} (0x{rc:02x})", spinn_chip::scp::result::name(*rc))]
    NegativeAcknowledgement {
        /// Command code
        opcode: u16,
        /// Target core
        core: ChipAddress,
        /// Result code received
        rc: u16,
    },

    /// No response arrived
    #[error("Command {opcode} to core {core} timed out")]
    Timeout {
        /// Command code
        opcode: u16,
        /// Target core
        core: ChipAddress,
    },

    /// Response could not be decoded
    #[error("Malformed response to command {opcode} from core {core}: {reason}")]
    MalformedResponse {
        /// Command code
        opcode: u16,
        /// Target core
        core: ChipAddress,
        /// Reason for failure
        reason: String,
    },

    /// Transport-level failure reported by the transceiver
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for failure
        reason: String,
    },

    /// One or more requests of a batched exchange failed
    #[error("{} of {total} requests failed: {}", failures.len(), FailureList(failures))]
    BatchFailed {
        /// Requests submitted in the batch
        total: usize,
        /// Every failure, in completion order
        failures: Vec<ProtocolFailure>,
    },

    /// Report directory could not be created
    #[error("Could not create report directory {path}: {source}")]
    ReportDirectory {
        /// Directory that was attempted
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

/// One failed request of a batched exchange
#[derive(Debug)]
pub struct ProtocolFailure {
    /// Target core
    pub core: ChipAddress,
    /// Command code
    pub opcode: u16,
    /// What went wrong
    pub error: HostError,
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} cmd {}] {}", self.core, self.opcode, self.error)
    }
}

struct FailureList<'a>(&'a [ProtocolFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl HostError {
    /// Create a data specification error
    pub fn specification(reason: impl Into<String>) -> Self {
        Self::Specification {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a remote write failure
    pub fn remote_write_failed(
        core: ChipAddress,
        region: Option<u8>,
        address: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::RemoteWriteFailed {
            core,
            region,
            address,
            reason: reason.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed_response(opcode: u16, core: ChipAddress, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            opcode,
            core,
            reason: reason.into(),
        }
    }

    /// True for errors detectable before any wire traffic
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::InvalidKeyCount { .. }
                | Self::KeyPrefixConflict { .. }
                | Self::RegionSizeConflict { .. }
                | Self::RegionNotReserved { .. }
                | Self::Specification { .. }
                | Self::InvalidTagId { .. }
                | Self::TagAddressMissing { .. }
                | Self::MissingNotificationTag { .. }
                | Self::VertexNotPlaced { .. }
        )
    }

    /// Addresses of the failed requests when this is a batch failure
    #[must_use]
    pub fn failed_cores(&self) -> Vec<ChipAddress> {
        match self {
            Self::BatchFailed { failures, .. } => failures.iter().map(|f| f.core).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_told_apart_from_wire_errors() {
        assert!(HostError::InvalidKeyCount { n_keys: 0 }.is_configuration_error());
        assert!(HostError::specification("bad opcode").is_configuration_error());
        assert!(!HostError::transport("link down").is_configuration_error());

        let core = ChipAddress::new(0, 0, 1).unwrap();
        let timeout = HostError::Timeout { opcode: 6, core };
        assert!(!timeout.is_configuration_error());
        assert!(timeout.failed_cores().is_empty());
    }
}
