//! Data specification builder

use crate::error::{HostError, Result};
use crate::regions::MemoryRegion;
use bytes::{BufMut, Bytes, BytesMut};
use spinn_chip::dse::{command_word, field, opcode, MAX_REGIONS};
use std::collections::BTreeMap;

/// Width of each value emitted by a `WRITE` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    /// 1 byte
    U8,
    /// 2 bytes
    U16,
    /// 4 bytes
    U32,
}

impl DataWidth {
    const fn len_code(self) -> u32 {
        match self {
            Self::U8 => 0,
            Self::U16 => 1,
            Self::U32 => 2,
        }
    }
}

/// Finished specification: bytecode plus comments for text listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSpecification {
    /// Little-endian command words
    pub bytes: Bytes,
    /// Comments keyed by the byte offset of the command they precede
    pub comments: BTreeMap<usize, Vec<String>>,
}

impl DataSpecification {
    /// Wrap raw bytecode that carries no comments
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            comments: BTreeMap::new(),
        }
    }
}

/// Builds a data specification one command at a time
///
/// Structural mistakes (writing with no focus, switching to an undeclared
/// region) are caught here rather than at execution.
#[derive(Debug, Default)]
pub struct SpecificationWriter {
    buf: BytesMut,
    regions: BTreeMap<u8, MemoryRegion>,
    focus: Option<u8>,
    comments: BTreeMap<usize, Vec<String>>,
}

impl SpecificationWriter {
    /// Create an empty specification
    pub fn new() -> Self {
        Self::default()
    }

    /// Regions declared so far
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.values()
    }

    /// Declare a region of `size` bytes
    ///
    /// # Errors
    ///
    /// Returns a specification error for a region id beyond the table or a
    /// region already declared.
    pub fn reserve_memory_region(
        &mut self,
        region: u8,
        size: u32,
        label: &str,
        unfilled: bool,
    ) -> Result<()> {
        if region >= MAX_REGIONS {
            return Err(HostError::specification(format!(
                "region {region} beyond the {MAX_REGIONS}-entry table"
            )));
        }
        if self.regions.contains_key(&region) {
            return Err(HostError::specification(format!(
                "region {region} ({label}) declared twice"
            )));
        }
        let flags = if unfilled { field::UNFILLED_BIT } else { 0 };
        self.put_command(opcode::RESERVE, &[size], flags | u32::from(region));
        self.regions
            .insert(region, MemoryRegion::new(region, size, label, unfilled));
        Ok(())
    }

    /// Direct following writes to `region`
    ///
    /// # Errors
    ///
    /// Returns a specification error if `region` has not been declared.
    pub fn switch_write_focus(&mut self, region: u8) -> Result<()> {
        if !self.regions.contains_key(&region) {
            return Err(HostError::specification(format!(
                "focus on undeclared region {region}"
            )));
        }
        self.put_command(opcode::SWITCH_FOCUS, &[], u32::from(region) << field::FOCUS_SHIFT);
        self.focus = Some(region);
        Ok(())
    }

    /// Write one 32-bit value
    ///
    /// # Errors
    ///
    /// Returns a specification error if no region has focus.
    pub fn write_value(&mut self, value: u32) -> Result<()> {
        self.write_repeated(value, 1, DataWidth::U32)
    }

    /// Write `value` `repeats` times at the given width
    ///
    /// # Errors
    ///
    /// Returns a specification error if no region has focus or `repeats` is 0.
    pub fn write_repeated(&mut self, value: u32, repeats: u8, width: DataWidth) -> Result<()> {
        self.require_focus()?;
        if repeats == 0 {
            return Err(HostError::specification("WRITE with zero repeats"));
        }
        let fields = (width.len_code() << field::LEN_CODE_SHIFT) | u32::from(repeats);
        self.put_command(opcode::WRITE, &[value], fields);
        Ok(())
    }

    /// Write a run of 32-bit words
    ///
    /// # Errors
    ///
    /// Returns a specification error if no region has focus.
    pub fn write_array(&mut self, values: &[u32]) -> Result<()> {
        self.require_focus()?;
        let count = u32::try_from(values.len())
            .map_err(|_| HostError::specification("array too long"))?;
        self.put_command(opcode::WRITE_ARRAY, &[count], 0);
        for &v in values {
            self.buf.put_u32_le(v);
        }
        Ok(())
    }

    /// Attach a comment to the next command (listing only)
    pub fn comment(&mut self, text: impl Into<String>) {
        self.comments
            .entry(self.buf.len())
            .or_default()
            .push(text.into());
    }

    /// Terminate the specification
    pub fn end_specification(mut self) -> DataSpecification {
        self.put_command(opcode::END_SPEC, &[], 0);
        DataSpecification {
            bytes: self.buf.freeze(),
            comments: self.comments,
        }
    }

    fn require_focus(&self) -> Result<()> {
        if self.focus.is_none() {
            return Err(HostError::specification("write with no region in focus"));
        }
        Ok(())
    }

    fn put_command(&mut self, op: u8, operands: &[u32], fields: u32) {
        #[allow(clippy::cast_possible_truncation)]
        self.buf
            .put_u32_le(command_word(op, operands.len() as u8, fields));
        for &word in operands {
            self.buf.put_u32_le(word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinn_chip::dse::{extra_words_of, opcode_of};

    fn words(spec: &DataSpecification) -> Vec<u32> {
        spec.bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn emits_commands_in_order() {
        let mut w = SpecificationWriter::new();
        w.reserve_memory_region(1, 8, "config", false).unwrap();
        w.switch_write_focus(1).unwrap();
        w.write_value(0xDEAD_BEEF).unwrap();
        w.write_array(&[1, 2]).unwrap();
        let spec = w.end_specification();

        let words = words(&spec);
        assert_eq!(opcode_of(words[0]), opcode::RESERVE);
        assert_eq!(extra_words_of(words[0]), 1);
        assert_eq!(words[1], 8);
        assert_eq!(opcode_of(words[2]), opcode::SWITCH_FOCUS);
        assert_eq!(opcode_of(words[3]), opcode::WRITE);
        assert_eq!(words[4], 0xDEAD_BEEF);
        assert_eq!(opcode_of(words[5]), opcode::WRITE_ARRAY);
        assert_eq!(&words[6..9], &[2, 1, 2]);
        assert_eq!(opcode_of(words[9]), opcode::END_SPEC);
    }

    #[test]
    fn rejects_structural_mistakes() {
        let mut w = SpecificationWriter::new();
        assert!(w.write_value(1).is_err());
        assert!(w.switch_write_focus(0).is_err());
        assert!(w.reserve_memory_region(MAX_REGIONS, 4, "x", false).is_err());
        w.reserve_memory_region(0, 4, "system", false).unwrap();
        assert!(w.reserve_memory_region(0, 4, "system", false).is_err());
    }

    #[test]
    fn comments_attach_to_next_command() {
        let mut w = SpecificationWriter::new();
        w.comment("system region");
        w.reserve_memory_region(0, 4, "system", false).unwrap();
        w.comment("done");
        let spec = w.end_specification();
        assert_eq!(spec.comments[&0], vec!["system region".to_string()]);
        assert_eq!(spec.comments[&8], vec!["done".to_string()]);
    }
}
