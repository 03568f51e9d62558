//! IP tag and reverse IP tag loading
//!
//! The tag slots of an Ethernet chip are a single shared resource. Loading
//! never trusts what a previous run left behind: every managed slot is
//! cleared first, then the new tags are set one request at a time.

use crate::address::ChipAddress;
use crate::error::{HostError, Result};
use crate::transceiver::Transceiver;
use spinn_chip::tags::{is_valid_tag, MAX_TAG_ID};
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Host endpoint that packets leaving the fabric are forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpTag {
    /// Ethernet chip holding the tag
    pub board_address: Option<Ipv4Addr>,
    /// Tag slot
    pub tag: u8,
    /// Host address
    pub ip_address: Ipv4Addr,
    /// Host UDP port
    pub port: u16,
    /// Strip the SDP header before forwarding
    pub strip_sdp: bool,
    /// Traffic class sharing this tag
    pub traffic_identifier: String,
}

impl IpTag {
    /// Create a tag with the default traffic class
    pub fn new(
        board_address: Option<Ipv4Addr>,
        tag: u8,
        ip_address: Ipv4Addr,
        port: u16,
        strip_sdp: bool,
    ) -> Self {
        Self {
            board_address,
            tag,
            ip_address,
            port,
            strip_sdp,
            traffic_identifier: "DEFAULT".to_string(),
        }
    }

    /// Set the traffic class
    #[must_use]
    pub fn with_traffic_identifier(mut self, traffic_identifier: impl Into<String>) -> Self {
        self.traffic_identifier = traffic_identifier.into();
        self
    }
}

/// Board UDP port whose packets are delivered into the fabric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseIpTag {
    /// Ethernet chip holding the tag
    pub board_address: Option<Ipv4Addr>,
    /// Tag slot
    pub tag: u8,
    /// UDP port listened on by the board
    pub port: u16,
    /// Core the packets are delivered to
    pub destination: ChipAddress,
    /// SDP port on the destination core
    pub sdp_port: u8,
}

/// Check a tag before any wire traffic
fn validate_tag(tag: u8, board_address: Option<Ipv4Addr>) -> Result<()> {
    if !is_valid_tag(tag) {
        return Err(HostError::InvalidTagId { tag });
    }
    if board_address.is_none() {
        return Err(HostError::TagAddressMissing { tag });
    }
    Ok(())
}

/// Clears the tag table and loads a new set of tags
#[derive(Debug, Default)]
pub struct TagsLoader;

impl TagsLoader {
    /// Create a loader
    pub const fn new() -> Self {
        Self
    }

    /// Clear every managed tag slot, then load `ip_tags` and `reverse_ip_tags`
    ///
    /// Returns `(ip_tags_loaded, reverse_ip_tags_loaded)`, both true on
    /// success. Every tag is validated before the first clear, so a
    /// configuration error leaves the tag table untouched.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid tag, or the transceiver's
    /// error for the first failed clear or set.
    pub fn load(
        &self,
        transceiver: &dyn Transceiver,
        ip_tags: &[IpTag],
        reverse_ip_tags: &[ReverseIpTag],
    ) -> Result<(bool, bool)> {
        for tag in ip_tags {
            validate_tag(tag.tag, tag.board_address)?;
        }
        for tag in reverse_ip_tags {
            validate_tag(tag.tag, tag.board_address)?;
        }

        info!("Clearing {} tag slots", MAX_TAG_ID);
        for tag_id in 0..MAX_TAG_ID {
            transceiver.clear_ip_tag(tag_id)?;
        }

        info!(
            "Loading {} IP tags and {} reverse IP tags",
            ip_tags.len(),
            reverse_ip_tags.len()
        );
        Self::load_ip_tags(transceiver, ip_tags)?;
        Self::load_reverse_ip_tags(transceiver, reverse_ip_tags)?;

        Ok((true, true))
    }

    fn load_ip_tags(transceiver: &dyn Transceiver, ip_tags: &[IpTag]) -> Result<()> {
        for tag in ip_tags {
            debug!(
                "IP tag {} -> {}:{} (strip={})",
                tag.tag, tag.ip_address, tag.port, tag.strip_sdp
            );
            transceiver.set_ip_tag(tag)?;
        }
        Ok(())
    }

    fn load_reverse_ip_tags(
        transceiver: &dyn Transceiver,
        reverse_ip_tags: &[ReverseIpTag],
    ) -> Result<()> {
        for tag in reverse_ip_tags {
            debug!(
                "Reverse IP tag {}: port {} -> {} sdp port {}",
                tag.tag, tag.port, tag.destination, tag.sdp_port
            );
            transceiver.set_reverse_ip_tag(tag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_out_of_range_and_unaddressed_tags() {
        let board = Some(Ipv4Addr::new(192, 168, 240, 1));
        assert!(validate_tag(0, board).is_ok());
        assert!(matches!(
            validate_tag(MAX_TAG_ID, board),
            Err(HostError::InvalidTagId { .. })
        ));
        assert!(matches!(
            validate_tag(2, None),
            Err(HostError::TagAddressMissing { tag: 2 })
        ));
    }
}
