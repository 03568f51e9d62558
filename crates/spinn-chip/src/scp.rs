//! SDP/SCP framing constants.
//!
//! ```text
//! Offset  Size  Field
//! ──────  ────  ─────────────────────────────────────────────
//!  0      1     flags            (0x87 = reply expected)
//!  1      1     tag              (0xFF on host-originated traffic)
//!  2      1     dest_port << 5 | dest_cpu
//!  3      1     src_port  << 5 | src_cpu
//!  4      1     dest_y
//!  5      1     dest_x
//!  6      1     src_y
//!  7      1     src_x
//! ──────  ────  ───────────── SCP ───────────────────────────
//!  8      2     cmd_rc           (command on request, result on reply)
//! 10      2     seq
//! 12      ..    arguments / payload
//! ```
//!
//! All multi-byte fields are little endian.

/// Length of the SDP header in bytes.
pub const SDP_HEADER_LEN: usize = 8;

/// Length of the SCP header (`cmd_rc` + `seq`) in bytes.
pub const SCP_HEADER_LEN: usize = 4;

/// Shift applied to an SDP port before OR-ing in the cpu id.
pub const PORT_SHIFT: u8 = 5;

/// Mask of the cpu bits in a port/cpu byte.
pub const CPU_MASK: u8 = 0x1F;

/// Tag value used on packets that originate at the host.
pub const HOST_TAG: u8 = 0xFF;

/// Host-side source port/cpu byte.
pub const HOST_PORT_CPU: u8 = 0xFF;

/// Host-side source chip coordinate.
pub const HOST_CHIP: u8 = 0;

/// SDP flag values.
pub mod flags {
    /// A reply is expected.
    pub const REPLY_EXPECTED: u8 = 0x87;
    /// No reply is expected.
    pub const REPLY_NOT_EXPECTED: u8 = 0x07;
}

/// SDP ports that cores listen on.
pub mod ports {
    /// Input buffering (send-buffer refill) traffic.
    pub const INPUT_BUFFERING: u8 = 1;
    /// Extra monitor fast data-in; also carries the route-table commands.
    pub const EXTRA_MONITOR_DATA_IN_SPEED_UP: u8 = 6;
}

/// Command codes understood by the extra monitor's data-in handler.
pub mod command {
    /// Save the currently loaded application multicast table.
    pub const SAVE_APPLICATION_MC_ROUTES: u16 = 6;
    /// Install the saved application multicast table.
    pub const LOAD_APPLICATION_MC_ROUTES: u16 = 7;
    /// Install the system multicast table used for fast data-in.
    pub const LOAD_SYSTEM_MC_ROUTES: u16 = 8;
}

/// SCP result codes.
pub mod result {
    /// Command completed.
    pub const OK: u16 = 0x80;
    /// Bad packet length.
    pub const LEN: u16 = 0x81;
    /// Bad checksum.
    pub const SUM: u16 = 0x82;
    /// Bad or invalid command.
    pub const CMD: u16 = 0x83;
    /// Invalid arguments.
    pub const ARG: u16 = 0x84;
    /// Bad port number.
    pub const PORT: u16 = 0x85;
    /// Timeout on the core side.
    pub const TIMEOUT: u16 = 0x86;
    /// No P2P route.
    pub const ROUTE: u16 = 0x87;
    /// Bad CPU number.
    pub const CPU: u16 = 0x88;
    /// Destination dead.
    pub const DEAD: u16 = 0x89;
    /// No free shared buffer.
    pub const BUF: u16 = 0x8A;
    /// No reply to an open.
    pub const P2P_NOREPLY: u16 = 0x8B;
    /// Open rejected.
    pub const P2P_REJECT: u16 = 0x8C;
    /// Destination busy.
    pub const P2P_BUSY: u16 = 0x8D;
    /// Destination did not respond.
    pub const P2P_TIMEOUT: u16 = 0x8E;
    /// Packet transmission failed.
    pub const PKT_TX: u16 = 0x8F;

    /// Human-readable name of a result code.
    #[must_use]
    pub const fn name(rc: u16) -> &'static str {
        match rc {
            OK => "RC_OK",
            LEN => "RC_LEN",
            SUM => "RC_SUM",
            CMD => "RC_CMD",
            ARG => "RC_ARG",
            PORT => "RC_PORT",
            TIMEOUT => "RC_TIMEOUT",
            ROUTE => "RC_ROUTE",
            CPU => "RC_CPU",
            DEAD => "RC_DEAD",
            BUF => "RC_BUF",
            P2P_NOREPLY => "RC_P2P_NOREPLY",
            P2P_REJECT => "RC_P2P_REJECT",
            P2P_BUSY => "RC_P2P_BUSY",
            P2P_TIMEOUT => "RC_P2P_TIMEOUT",
            PKT_TX => "RC_PKT_TX",
            _ => "RC_UNKNOWN",
        }
    }
}

/// Pack an SDP port and cpu id into one header byte.
#[must_use]
pub const fn port_cpu(port: u8, cpu: u8) -> u8 {
    (port << PORT_SHIFT) | (cpu & CPU_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_cpu_packing() {
        assert_eq!(port_cpu(ports::EXTRA_MONITOR_DATA_IN_SPEED_UP, 3), 0xC3);
        assert_eq!(port_cpu(1, 17), 0x31);
    }

    #[test]
    fn result_names() {
        assert_eq!(result::name(result::OK), "RC_OK");
        assert_eq!(result::name(0x42), "RC_UNKNOWN");
    }
}
