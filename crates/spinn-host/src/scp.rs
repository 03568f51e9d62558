//! SCP request/response messages
//!
//! Requests are SDP datagrams carrying an SCP header; every command in this
//! layer expects exactly one reply whose result code must be `RC_OK`.

use crate::address::ChipAddress;
use crate::error::{HostError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use spinn_chip::scp::{
    command, flags, port_cpu, ports, result, CPU_MASK, HOST_CHIP, HOST_PORT_CPU, HOST_TAG,
    PORT_SHIFT, SCP_HEADER_LEN, SDP_HEADER_LEN,
};

/// Commands handled by the extra monitor on each chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScpCommand {
    /// Install the fixed system multicast table
    LoadSystemMcRoutes,
    /// Install the application multicast table
    LoadApplicationMcRoutes,
    /// Save the loaded application multicast table
    SaveApplicationMcRoutes,
}

impl ScpCommand {
    /// Wire command code
    #[must_use]
    pub const fn opcode(self) -> u16 {
        match self {
            Self::LoadSystemMcRoutes => command::LOAD_SYSTEM_MC_ROUTES,
            Self::LoadApplicationMcRoutes => command::LOAD_APPLICATION_MC_ROUTES,
            Self::SaveApplicationMcRoutes => command::SAVE_APPLICATION_MC_ROUTES,
        }
    }

    /// Operation name used in logs
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::LoadSystemMcRoutes => "load system multicast routes",
            Self::LoadApplicationMcRoutes => "load application multicast routes",
            Self::SaveApplicationMcRoutes => "save application multicast routes",
        }
    }

    /// Look up a command by wire code
    #[must_use]
    pub const fn from_opcode(opcode: u16) -> Option<Self> {
        match opcode {
            command::LOAD_SYSTEM_MC_ROUTES => Some(Self::LoadSystemMcRoutes),
            command::LOAD_APPLICATION_MC_ROUTES => Some(Self::LoadApplicationMcRoutes),
            command::SAVE_APPLICATION_MC_ROUTES => Some(Self::SaveApplicationMcRoutes),
            _ => None,
        }
    }
}

/// An addressed SCP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpRequest {
    destination: ChipAddress,
    port: u8,
    opcode: u16,
}

impl ScpRequest {
    /// Request for `cmd` to the extra monitor at `destination`
    #[must_use]
    pub const fn new(destination: ChipAddress, cmd: ScpCommand) -> Self {
        Self {
            destination,
            port: ports::EXTRA_MONITOR_DATA_IN_SPEED_UP,
            opcode: cmd.opcode(),
        }
    }

    /// Install the system multicast table on `destination`
    #[must_use]
    pub const fn load_system_mc_routes(destination: ChipAddress) -> Self {
        Self::new(destination, ScpCommand::LoadSystemMcRoutes)
    }

    /// Install the application multicast table on `destination`
    #[must_use]
    pub const fn load_application_mc_routes(destination: ChipAddress) -> Self {
        Self::new(destination, ScpCommand::LoadApplicationMcRoutes)
    }

    /// Target core
    #[must_use]
    pub const fn destination(&self) -> ChipAddress {
        self.destination
    }

    /// Command code
    #[must_use]
    pub const fn opcode(&self) -> u16 {
        self.opcode
    }

    /// Encode as an SDP datagram with sequence number `seq`
    #[must_use]
    pub fn encode(&self, seq: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(SDP_HEADER_LEN + SCP_HEADER_LEN);
        buf.put_u8(flags::REPLY_EXPECTED);
        buf.put_u8(HOST_TAG);
        buf.put_u8(port_cpu(self.port, self.destination.p()));
        buf.put_u8(HOST_PORT_CPU);
        buf.put_u8(self.destination.y());
        buf.put_u8(self.destination.x());
        buf.put_u8(HOST_CHIP);
        buf.put_u8(HOST_CHIP);
        buf.put_u16_le(self.opcode);
        buf.put_u16_le(seq);
        buf.freeze()
    }

    /// Decode a request datagram, returning it with its sequence number
    ///
    /// # Errors
    ///
    /// Returns `HostError::Transport` if the datagram is too short or names
    /// an invalid core.
    pub fn decode(datagram: &[u8]) -> Result<(Self, u16)> {
        if datagram.len() < SDP_HEADER_LEN + SCP_HEADER_LEN {
            return Err(HostError::transport(format!(
                "SCP request too short: {} bytes",
                datagram.len()
            )));
        }
        let mut buf = datagram;
        let _flags = buf.get_u8();
        let _tag = buf.get_u8();
        let dest_port_cpu = buf.get_u8();
        let _src_port_cpu = buf.get_u8();
        let y = buf.get_u8();
        let x = buf.get_u8();
        buf.advance(2);
        let opcode = buf.get_u16_le();
        let seq = buf.get_u16_le();

        let destination = ChipAddress::new(x, y, dest_port_cpu & CPU_MASK)?;
        Ok((
            Self {
                destination,
                port: dest_port_cpu >> PORT_SHIFT,
                opcode,
            },
            seq,
        ))
    }
}

/// Decoded SCP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpResponse {
    /// Result code
    pub rc: u16,
    /// Sequence number echoed from the request
    pub seq: u16,
    /// Bytes after the SCP header
    pub payload: Bytes,
}

impl ScpResponse {
    /// Encode a reply from `source` to the host
    #[must_use]
    pub fn encode(source: ChipAddress, rc: u16, seq: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(SDP_HEADER_LEN + SCP_HEADER_LEN);
        buf.put_u8(flags::REPLY_NOT_EXPECTED);
        buf.put_u8(HOST_TAG);
        buf.put_u8(HOST_PORT_CPU);
        buf.put_u8(port_cpu(ports::EXTRA_MONITOR_DATA_IN_SPEED_UP, source.p()));
        buf.put_u8(HOST_CHIP);
        buf.put_u8(HOST_CHIP);
        buf.put_u8(source.y());
        buf.put_u8(source.x());
        buf.put_u16_le(rc);
        buf.put_u16_le(seq);
        buf.freeze()
    }

    /// Decode the reply to `request` sent with sequence number `seq`
    ///
    /// # Errors
    ///
    /// Returns `HostError::MalformedResponse` if the datagram is truncated or
    /// carries the wrong sequence number.
    pub fn decode(request: &ScpRequest, seq: u16, datagram: Bytes) -> Result<Self> {
        if datagram.len() < SDP_HEADER_LEN + SCP_HEADER_LEN {
            return Err(HostError::malformed_response(
                request.opcode,
                request.destination,
                format!("{} bytes is shorter than the SCP header", datagram.len()),
            ));
        }
        let mut buf = datagram;
        buf.advance(SDP_HEADER_LEN);
        let rc = buf.get_u16_le();
        let got_seq = buf.get_u16_le();
        if got_seq != seq {
            return Err(HostError::malformed_response(
                request.opcode,
                request.destination,
                format!("sequence {got_seq} does not match request {seq}"),
            ));
        }
        Ok(Self {
            rc,
            seq: got_seq,
            payload: buf,
        })
    }

    /// Check for `RC_OK`
    ///
    /// # Errors
    ///
    /// Returns `HostError::NegativeAcknowledgement` for any other code.
    pub fn check_ok(&self, request: &ScpRequest) -> Result<()> {
        if self.rc == result::OK {
            Ok(())
        } else {
            Err(HostError::NegativeAcknowledgement {
                opcode: request.opcode,
                core: request.destination,
                rc: self.rc,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> ChipAddress {
        ChipAddress::new(3, 4, 5).unwrap()
    }

    #[test]
    fn request_header_layout() {
        let datagram = ScpRequest::load_application_mc_routes(core()).encode(0x1234);
        assert_eq!(
            datagram.as_ref(),
            &[0x87, 0xFF, 0xC5, 0xFF, 4, 3, 0, 0, 7, 0, 0x34, 0x12]
        );
    }

    #[test]
    fn request_decodes_back() {
        let request = ScpRequest::load_system_mc_routes(core());
        let (decoded, seq) = ScpRequest::decode(&request.encode(9)).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(seq, 9);
    }

    #[test]
    fn nak_carries_opcode_and_core() {
        let request = ScpRequest::load_system_mc_routes(core());
        let reply = ScpResponse::encode(core(), result::ARG, 1);
        let response = ScpResponse::decode(&request, 1, reply).unwrap();
        match response.check_ok(&request) {
            Err(HostError::NegativeAcknowledgement { opcode, core: c, rc }) => {
                assert_eq!(opcode, command::LOAD_SYSTEM_MC_ROUTES);
                assert_eq!(c, core());
                assert_eq!(rc, result::ARG);
            }
            other => panic!("expected NAK, got {other:?}"),
        }
    }

    #[test]
    fn truncated_and_out_of_sequence_replies_are_malformed() {
        let request = ScpRequest::load_system_mc_routes(core());
        assert!(matches!(
            ScpResponse::decode(&request, 1, Bytes::from_static(&[0x07, 0xFF])),
            Err(HostError::MalformedResponse { .. })
        ));
        let reply = ScpResponse::encode(core(), result::OK, 2);
        assert!(matches!(
            ScpResponse::decode(&request, 1, reply),
            Err(HostError::MalformedResponse { .. })
        ));
    }
}
