// SPDX-License-Identifier: AGPL-3.0-only

//! Software (virtual machine) transceiver
//!
//! Implements [`Transceiver`] entirely in host memory. Each chip gets a
//! sparse SDRAM image, the extra monitor on every core answers the
//! route-table commands, and the board tag table is modelled as a map. This
//! enables:
//!
//! 1. **CI without hardware**: every protocol in this crate runs end to end
//!    against the same trait a real transport implements.
//!
//! 2. **Failure drills**: NAKs per `(core, opcode)`, silent cores (lost
//!    replies), short writes and refused tag operations can be injected to
//!    exercise the aggregated-error and partial-reload paths.
//!
//! 3. **Wire accounting**: every operation is appended to a log so tests can
//!    assert ordering (all tag clears before any set) and counts (no write
//!    for an unchanged vertex).

use crate::address::ChipAddress;
use crate::error::{HostError, Result};
use crate::scp::{ScpCommand, ScpRequest, ScpResponse};
use crate::tags::{IpTag, ReverseIpTag};
use crate::transceiver::Transceiver;
use bytes::Bytes;
use parking_lot::Mutex;
use spinn_chip::address::{SDRAM_BASE_ADDRESS, SDRAM_BYTES};
use spinn_chip::scp::result;
use spinn_chip::tags::MAX_TAG_ID;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

const PAGE_BYTES: usize = 4096;

/// One operation observed by the software transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    /// Memory write
    WriteMemory {
        /// Chip X
        x: u8,
        /// Chip Y
        y: u8,
        /// Start address
        address: u32,
        /// Bytes requested
        length: usize,
    },
    /// Memory read
    ReadMemory {
        /// Chip X
        x: u8,
        /// Chip Y
        y: u8,
        /// Start address
        address: u32,
        /// Bytes requested
        length: usize,
    },
    /// SCP request
    Scp {
        /// Target core
        core: ChipAddress,
        /// Command code
        opcode: u16,
    },
    /// Tag slot cleared
    ClearTag(u8),
    /// IP tag set
    SetIpTag(u8),
    /// Reverse IP tag set
    SetReverseIpTag(u8),
}

#[derive(Debug, Default)]
struct MachineState {
    pages: HashMap<(u8, u8, u32), Box<[u8]>>,
    log: Vec<WireOp>,
    naks: HashMap<(ChipAddress, u16), u16>,
    silent: HashSet<ChipAddress>,
    short_writes: HashSet<(u8, u8, u32)>,
    refused_tags: HashSet<u8>,
    ip_tags: BTreeMap<u8, IpTag>,
    reverse_ip_tags: BTreeMap<u8, ReverseIpTag>,
    system_routes: HashSet<ChipAddress>,
    application_routes: HashSet<ChipAddress>,
    saved_routes: HashSet<ChipAddress>,
}

/// In-memory virtual machine implementing [`Transceiver`]
#[derive(Debug, Default)]
pub struct SoftwareTransceiver {
    state: Mutex<MachineState>,
}

impl SoftwareTransceiver {
    /// Create an empty machine
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to `opcode` on `core` with result code `rc` instead of OK
    pub fn inject_nak(&self, core: ChipAddress, opcode: u16, rc: u16) {
        self.state.lock().naks.insert((core, opcode), rc);
    }

    /// Never reply to requests addressed to `core`
    pub fn make_silent(&self, core: ChipAddress) {
        self.state.lock().silent.insert(core);
    }

    /// Acknowledge only half of the next write starting at `address`
    pub fn inject_short_write(&self, x: u8, y: u8, address: u32) {
        self.state.lock().short_writes.insert((x, y, address));
    }

    /// Refuse clear/set requests for `tag`
    pub fn refuse_tag(&self, tag: u8) {
        self.state.lock().refused_tags.insert(tag);
    }

    /// Pre-load a tag as if a previous run had left it behind
    pub fn preload_ip_tag(&self, tag: IpTag) {
        self.state.lock().ip_tags.insert(tag.tag, tag);
    }

    /// Snapshot of every operation so far
    pub fn log(&self) -> Vec<WireOp> {
        self.state.lock().log.clone()
    }

    /// Forget the operation log
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Number of logged operations matching `pred`
    pub fn count(&self, pred: impl Fn(&WireOp) -> bool) -> usize {
        self.state.lock().log.iter().filter(|op| pred(op)).count()
    }

    /// IP tag currently held in slot `tag`
    pub fn ip_tag(&self, tag: u8) -> Option<IpTag> {
        self.state.lock().ip_tags.get(&tag).cloned()
    }

    /// Reverse IP tag currently held in slot `tag`
    pub fn reverse_ip_tag(&self, tag: u8) -> Option<ReverseIpTag> {
        self.state.lock().reverse_ip_tags.get(&tag).cloned()
    }

    /// True once the system table has been loaded on `core`
    pub fn system_routes_loaded(&self, core: ChipAddress) -> bool {
        self.state.lock().system_routes.contains(&core)
    }

    /// True once the application table has been loaded on `core`
    pub fn application_routes_loaded(&self, core: ChipAddress) -> bool {
        self.state.lock().application_routes.contains(&core)
    }

    /// True once the application table has been saved on `core`
    pub fn application_routes_saved(&self, core: ChipAddress) -> bool {
        self.state.lock().saved_routes.contains(&core)
    }

    fn check_range(address: u32, length: usize) -> Result<()> {
        let end = u64::from(address) + length as u64;
        let sdram_end = u64::from(SDRAM_BASE_ADDRESS) + u64::from(SDRAM_BYTES);
        if address < SDRAM_BASE_ADDRESS || end > sdram_end {
            return Err(HostError::transport(format!(
                "access of {length} bytes at 0x{address:08x} is outside SDRAM"
            )));
        }
        Ok(())
    }

    fn handle_scp(state: &mut MachineState, request: &ScpRequest) -> u16 {
        let core = request.destination();
        if let Some(&rc) = state.naks.get(&(core, request.opcode())) {
            return rc;
        }
        match ScpCommand::from_opcode(request.opcode()) {
            Some(ScpCommand::LoadSystemMcRoutes) => {
                state.application_routes.remove(&core);
                state.system_routes.insert(core);
                result::OK
            }
            Some(ScpCommand::LoadApplicationMcRoutes) => {
                state.system_routes.remove(&core);
                state.application_routes.insert(core);
                result::OK
            }
            Some(ScpCommand::SaveApplicationMcRoutes) => {
                state.saved_routes.insert(core);
                result::OK
            }
            None => result::CMD,
        }
    }
}

impl Transceiver for SoftwareTransceiver {
    fn write_memory(&self, x: u8, y: u8, address: u32, data: &[u8]) -> Result<usize> {
        Self::check_range(address, data.len())?;
        let mut state = self.state.lock();
        state.log.push(WireOp::WriteMemory {
            x,
            y,
            address,
            length: data.len(),
        });

        let accepted = if state.short_writes.remove(&(x, y, address)) {
            data.len() / 2
        } else {
            data.len()
        };

        let mut offset = 0usize;
        while offset < accepted {
            let absolute = address as usize + offset;
            let page = (absolute / PAGE_BYTES) as u32;
            let in_page = absolute % PAGE_BYTES;
            let n = (PAGE_BYTES - in_page).min(accepted - offset);
            let buf = state
                .pages
                .entry((x, y, page))
                .or_insert_with(|| vec![0u8; PAGE_BYTES].into_boxed_slice());
            buf[in_page..in_page + n].copy_from_slice(&data[offset..offset + n]);
            offset += n;
        }

        debug!("SW write ({x}, {y}) 0x{address:08x}: {accepted}/{} bytes", data.len());
        Ok(accepted)
    }

    fn read_memory(&self, x: u8, y: u8, address: u32, length: usize) -> Result<Bytes> {
        Self::check_range(address, length)?;
        let mut state = self.state.lock();
        state.log.push(WireOp::ReadMemory {
            x,
            y,
            address,
            length,
        });

        let mut out = vec![0u8; length];
        let mut offset = 0usize;
        while offset < length {
            let absolute = address as usize + offset;
            let page = (absolute / PAGE_BYTES) as u32;
            let in_page = absolute % PAGE_BYTES;
            let n = (PAGE_BYTES - in_page).min(length - offset);
            if let Some(buf) = state.pages.get(&(x, y, page)) {
                out[offset..offset + n].copy_from_slice(&buf[in_page..in_page + n]);
            }
            offset += n;
        }
        Ok(Bytes::from(out))
    }

    fn exchange(&self, destination: ChipAddress, datagram: Bytes) -> Result<Option<Bytes>> {
        let (request, seq) = ScpRequest::decode(&datagram)?;
        let mut state = self.state.lock();
        state.log.push(WireOp::Scp {
            core: destination,
            opcode: request.opcode(),
        });
        if state.silent.contains(&destination) {
            debug!("SW core {destination} dropped command {}", request.opcode());
            return Ok(None);
        }
        let rc = Self::handle_scp(&mut state, &request);
        Ok(Some(ScpResponse::encode(destination, rc, seq)))
    }

    fn clear_ip_tag(&self, tag: u8) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(WireOp::ClearTag(tag));
        if tag >= MAX_TAG_ID || state.refused_tags.contains(&tag) {
            return Err(HostError::transport(format!("board refused to clear tag {tag}")));
        }
        state.ip_tags.remove(&tag);
        state.reverse_ip_tags.remove(&tag);
        Ok(())
    }

    fn set_ip_tag(&self, tag: &IpTag) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(WireOp::SetIpTag(tag.tag));
        if state.refused_tags.contains(&tag.tag) {
            return Err(HostError::transport(format!("board refused IP tag {}", tag.tag)));
        }
        state.reverse_ip_tags.remove(&tag.tag);
        state.ip_tags.insert(tag.tag, tag.clone());
        Ok(())
    }

    fn set_reverse_ip_tag(&self, tag: &ReverseIpTag) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(WireOp::SetReverseIpTag(tag.tag));
        if state.refused_tags.contains(&tag.tag) {
            return Err(HostError::transport(format!(
                "board refused reverse IP tag {}",
                tag.tag
            )));
        }
        state.ip_tags.remove(&tag.tag);
        state.reverse_ip_tags.insert(tag.tag, tag.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip_across_pages() {
        let machine = SoftwareTransceiver::new();
        let address = SDRAM_BASE_ADDRESS + PAGE_BYTES as u32 - 3;
        let data: Vec<u8> = (0..10).collect();

        assert_eq!(machine.write_memory(1, 2, address, &data).unwrap(), 10);
        let back = machine.read_memory(1, 2, address, 10).unwrap();
        assert_eq!(back.as_ref(), data.as_slice());

        // Other chips are independent
        let other = machine.read_memory(2, 1, address, 10).unwrap();
        assert!(other.iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_access_outside_sdram() {
        let machine = SoftwareTransceiver::new();
        assert!(machine.write_memory(0, 0, 0x1000, &[1, 2, 3]).is_err());
        assert!(machine.read_memory(0, 0, u32::MAX - 1, 4).is_err());
    }

    #[test]
    fn short_write_is_one_shot() {
        let machine = SoftwareTransceiver::new();
        machine.inject_short_write(0, 0, SDRAM_BASE_ADDRESS);
        assert_eq!(machine.write_memory(0, 0, SDRAM_BASE_ADDRESS, &[1; 8]).unwrap(), 4);
        assert_eq!(machine.write_memory(0, 0, SDRAM_BASE_ADDRESS, &[1; 8]).unwrap(), 8);
    }
}
