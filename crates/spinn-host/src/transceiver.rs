//! Transceiver abstraction
//!
//! The transport to the fabric is an external collaborator: it owns sockets,
//! retries and timeouts. This layer only needs remote memory access, one
//! request/response exchange and the three tag operations.

use crate::address::ChipAddress;
use crate::error::{HostError, Result};
use crate::tags::{IpTag, ReverseIpTag};
use bytes::Bytes;
use std::fmt::Debug;

/// Transport capability consumed by this layer
///
/// Implementations must be shareable across threads: batched exchanges
/// issue requests concurrently from a bounded pool of workers.
pub trait Transceiver: Debug + Send + Sync {
    /// Write `data` to chip memory starting at `address`
    ///
    /// Returns the number of bytes the chip acknowledged.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the write.
    fn write_memory(&self, x: u8, y: u8, address: u32, data: &[u8]) -> Result<usize>;

    /// Read `length` bytes of chip memory starting at `address`
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot complete the read.
    fn read_memory(&self, x: u8, y: u8, address: u32, length: usize) -> Result<Bytes>;

    /// Send one SCP datagram to `destination` and wait for its reply
    ///
    /// `Ok(None)` means no reply arrived within the transport's timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the datagram could not be sent at all.
    fn exchange(&self, destination: ChipAddress, datagram: Bytes) -> Result<Option<Bytes>>;

    /// Clear one tag slot
    ///
    /// # Errors
    ///
    /// Returns error if the board refuses the request.
    fn clear_ip_tag(&self, tag: u8) -> Result<()>;

    /// Set an IP tag
    ///
    /// # Errors
    ///
    /// Returns error if the board refuses the request.
    fn set_ip_tag(&self, tag: &IpTag) -> Result<()>;

    /// Set a reverse IP tag
    ///
    /// # Errors
    ///
    /// Returns error if the board refuses the request.
    fn set_reverse_ip_tag(&self, tag: &ReverseIpTag) -> Result<()>;
}

/// Read exactly `length` bytes, treating a short read as a failure
///
/// # Errors
///
/// Returns `HostError::RemoteReadFailed` if the transport fails or returns
/// fewer bytes than requested.
pub fn read_exact(
    transceiver: &dyn Transceiver,
    x: u8,
    y: u8,
    address: u32,
    length: usize,
) -> Result<Bytes> {
    let data = transceiver
        .read_memory(x, y, address, length)
        .map_err(|e| HostError::RemoteReadFailed {
            x,
            y,
            address,
            length,
            reason: e.to_string(),
        })?;
    if data.len() != length {
        return Err(HostError::RemoteReadFailed {
            x,
            y,
            address,
            length,
            reason: format!("short read of {} bytes", data.len()),
        });
    }
    Ok(data)
}

/// Read one little-endian word
///
/// # Errors
///
/// Returns `HostError::RemoteReadFailed` if the read fails.
pub fn read_word(transceiver: &dyn Transceiver, x: u8, y: u8, address: u32) -> Result<u32> {
    let data = read_exact(transceiver, x, y, address, 4)?;
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}
