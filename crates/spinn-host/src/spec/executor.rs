//! Host-side data specification interpreter

use crate::error::{HostError, Result};
use crate::regions::MemoryRegion;
use crate::spec::writer::DataSpecification;
use bytes::{Bytes, BytesMut};
use spinn_chip::dse::{data_len_bytes, extra_words_of, field, opcode, opcode_of, MAX_REGIONS};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

/// Bytes produced for one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionImage {
    /// Region declaration
    pub region: MemoryRegion,
    /// Bytes written by the specification (at most `region.size`)
    pub data: Bytes,
}

/// Result of running a specification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutedSpecification {
    /// Images by region id
    pub images: BTreeMap<u8, RegionImage>,
    /// One line per command, with comments, for report renderings
    pub listing: Vec<String>,
}

impl ExecutedSpecification {
    /// Image of `region`, if reserved
    #[must_use]
    pub fn image(&self, region: u8) -> Option<&RegionImage> {
        self.images.get(&region)
    }

    /// Declared regions in id order
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.images.values().map(|i| &i.region)
    }

    /// Listing as text, newline terminated
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for line in &self.listing {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

struct Building {
    region: MemoryRegion,
    data: BytesMut,
}

/// Interprets data specification bytecode
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecificationExecutor;

impl SpecificationExecutor {
    /// Create an executor
    pub const fn new() -> Self {
        Self
    }

    /// Run `spec`, producing region images and a listing
    ///
    /// # Errors
    ///
    /// Returns `HostError::Specification` for truncated or unknown commands,
    /// writes with no focus or past the end of a region, `BREAK`, and a
    /// missing `END_SPEC`.
    pub fn execute(&self, spec: &DataSpecification) -> Result<ExecutedSpecification> {
        let bytes = &spec.bytes;
        if bytes.len() % 4 != 0 {
            return Err(HostError::specification(format!(
                "length {} is not a whole number of words",
                bytes.len()
            )));
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let mut regions: BTreeMap<u8, Building> = BTreeMap::new();
        let mut listing = Vec::new();
        let mut focus: Option<u8> = None;
        let mut ended = false;
        let mut pc = 0usize;

        while pc < words.len() {
            if let Some(comments) = spec.comments.get(&(pc * 4)) {
                listing.extend(comments.iter().map(|c| format!("# {c}")));
            }
            let cmd = words[pc];
            let op = opcode_of(cmd);
            let extra = usize::from(extra_words_of(cmd));
            let operands = words.get(pc + 1..pc + 1 + extra).ok_or_else(|| {
                HostError::specification(format!("command at word {pc} is truncated"))
            })?;
            let mut line = format!("{:08X}: {}", pc * 4, opcode::mnemonic(op));
            let mut consumed = 1 + extra;

            match op {
                opcode::NOP => {}
                opcode::BREAK => {
                    return Err(HostError::specification(format!("BREAK at word {pc}")));
                }
                opcode::RESERVE => {
                    #[allow(clippy::cast_possible_truncation)]
                    let id = (cmd & field::RESERVE_REGION_MASK) as u8;
                    let unfilled = cmd & field::UNFILLED_BIT != 0;
                    let size = operand(operands, 0, pc)?;
                    if id >= MAX_REGIONS {
                        return Err(HostError::specification(format!(
                            "RESERVE of region {id} beyond the table"
                        )));
                    }
                    if regions.contains_key(&id) {
                        return Err(HostError::specification(format!(
                            "region {id} reserved twice"
                        )));
                    }
                    let _ = write!(line, " region={id} size={size}");
                    if unfilled {
                        line.push_str(" UNFILLED");
                    }
                    regions.insert(
                        id,
                        Building {
                            region: MemoryRegion::new(id, size, &format!("region_{id}"), unfilled),
                            data: BytesMut::new(),
                        },
                    );
                }
                opcode::SWITCH_FOCUS => {
                    #[allow(clippy::cast_possible_truncation)]
                    let id = ((cmd >> field::FOCUS_SHIFT) & 0xF) as u8;
                    if !regions.contains_key(&id) {
                        return Err(HostError::specification(format!(
                            "focus on unreserved region {id}"
                        )));
                    }
                    let _ = write!(line, " region={id}");
                    focus = Some(id);
                }
                opcode::WRITE => {
                    let len_code = (cmd >> field::LEN_CODE_SHIFT) & 0x3;
                    let width = data_len_bytes(len_code).ok_or_else(|| {
                        HostError::specification(format!("bad data length code {len_code}"))
                    })?;
                    let repeats = (cmd & field::REPEAT_MASK) as usize;
                    let value = operand(operands, 0, pc)?;
                    let _ = write!(line, " value=0x{value:X} bytes={width} repeats={repeats}");
                    let le = value.to_le_bytes();
                    let target = focused(&mut regions, focus, pc)?;
                    for _ in 0..repeats {
                        append(target, &le[..width])?;
                    }
                }
                opcode::WRITE_ARRAY => {
                    let count = operand(operands, 0, pc)? as usize;
                    let start = pc + 1 + extra;
                    let data = words.get(start..start + count).ok_or_else(|| {
                        HostError::specification(format!("array at word {pc} is truncated"))
                    })?;
                    let _ = write!(line, " words={count}");
                    let target = focused(&mut regions, focus, pc)?;
                    for word in data {
                        append(target, &word.to_le_bytes())?;
                    }
                    consumed += count;
                }
                opcode::END_SPEC => {
                    listing.push(line);
                    ended = true;
                    break;
                }
                other => {
                    return Err(HostError::specification(format!(
                        "unknown opcode 0x{other:02X} at word {pc}"
                    )));
                }
            }

            listing.push(line);
            pc += consumed;
        }

        if !ended {
            return Err(HostError::specification("missing END_SPEC"));
        }

        let images = regions
            .into_iter()
            .map(|(id, b)| {
                (
                    id,
                    RegionImage {
                        region: b.region,
                        data: b.data.freeze(),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        debug!("Executed specification: {} regions", images.len());
        Ok(ExecutedSpecification { images, listing })
    }
}

fn operand(operands: &[u32], i: usize, pc: usize) -> Result<u32> {
    operands
        .get(i)
        .copied()
        .ok_or_else(|| HostError::specification(format!("command at word {pc} lacks operand {i}")))
}

fn focused(
    regions: &mut BTreeMap<u8, Building>,
    focus: Option<u8>,
    pc: usize,
) -> Result<&mut Building> {
    focus
        .and_then(|id| regions.get_mut(&id))
        .ok_or_else(|| HostError::specification(format!("write at word {pc} with no focus")))
}

fn append(target: &mut Building, bytes: &[u8]) -> Result<()> {
    if target.data.len() + bytes.len() > target.region.size as usize {
        return Err(HostError::specification(format!(
            "write past the end of region {} ({} bytes)",
            target.region.id, target.region.size
        )));
    }
    target.data.extend_from_slice(bytes);
    Ok(())
}
