//! Data-specification bytecode and the region pointer table.
//!
//! A data specification is a little-endian stream of 32-bit words. Each
//! command starts with a command word:
//!
//! ```text
//!  31    28 27            20 19    14 13  12 11     8 7 6   5 4       0
//! ┌────────┬────────────────┬────────┬──────┬────────┬─┬─────┬─────────┐
//! │ extra  │     opcode     │   -    │ len  │ focus  │U│  -  │ region  │
//! │ words  │                │        │ code │ region │ │     │ (RSV)   │
//! └────────┴────────────────┴────────┴──────┴────────┴─┴─────┴─────────┘
//!                            WRITE uses bits 7:0 as the repeat count.
//! ```
//!
//! `extra` counts the fixed operand words that follow the command word.
//! `WRITE_ARRAY` is the one variable-length command: its single operand is
//! the number of data words that follow it.
//!
//! Executing a specification yields one byte image per reserved region.
//! The images are placed on the core behind a pointer table:
//!
//! ```text
//! base + 0x00   MAGIC       0xAD130AD6
//! base + 0x04   VERSION     0x00010000
//! base + 0x08   region 0 address (0 if not reserved)
//! base + 0x0C   region 1 address
//!   ...
//! base + 0x44   region 15 address
//! base + 0x48   first region body (word aligned)
//! ```

/// Regions a single core may declare.
pub const MAX_REGIONS: u8 = 16;

/// Pointer table magic number.
pub const TABLE_MAGIC: u32 = 0xAD13_0AD6;

/// Pointer table format version.
pub const TABLE_VERSION: u32 = 0x0001_0000;

/// Size of the pointer table header (magic + version) in bytes.
pub const TABLE_HEADER_BYTES: u32 = 8;

/// Total size of the pointer table in bytes.
pub const TABLE_BYTES: u32 = TABLE_HEADER_BYTES + 4 * MAX_REGIONS as u32;

/// Byte offset of region `region`'s pointer within the table.
#[must_use]
pub const fn pointer_offset(region: u8) -> u32 {
    TABLE_HEADER_BYTES + 4 * region as u32
}

/// Command opcodes.
pub mod opcode {
    /// Halt execution with an error.
    pub const BREAK: u8 = 0x00;
    /// No operation.
    pub const NOP: u8 = 0x01;
    /// Reserve a memory region.
    pub const RESERVE: u8 = 0x02;
    /// Write a repeated value.
    pub const WRITE: u8 = 0x42;
    /// Write an array of words.
    pub const WRITE_ARRAY: u8 = 0x43;
    /// Move the write pointer to another region.
    pub const SWITCH_FOCUS: u8 = 0x50;
    /// End of specification.
    pub const END_SPEC: u8 = 0xFF;

    /// Mnemonic used in text renderings.
    #[must_use]
    pub const fn mnemonic(op: u8) -> &'static str {
        match op {
            BREAK => "BREAK",
            NOP => "NOP",
            RESERVE => "RESERVE",
            WRITE => "WRITE",
            WRITE_ARRAY => "WRITE_ARRAY",
            SWITCH_FOCUS => "SWITCH_FOCUS",
            END_SPEC => "END_SPEC",
            _ => "UNKNOWN",
        }
    }
}

/// Bit positions within a command word.
pub mod field {
    /// Extra-word count shift.
    pub const EXTRA_SHIFT: u32 = 28;
    /// Opcode shift.
    pub const OPCODE_SHIFT: u32 = 20;
    /// WRITE data length code shift (0 = 1 byte, 1 = 2 bytes, 2 = 4 bytes).
    pub const LEN_CODE_SHIFT: u32 = 12;
    /// SWITCH_FOCUS region shift.
    pub const FOCUS_SHIFT: u32 = 8;
    /// RESERVE unfilled flag.
    pub const UNFILLED_BIT: u32 = 1 << 7;
    /// RESERVE region mask.
    pub const RESERVE_REGION_MASK: u32 = 0x1F;
    /// WRITE repeat mask.
    pub const REPEAT_MASK: u32 = 0xFF;
}

/// Build a command word from an opcode, extra-word count and low fields.
#[must_use]
pub const fn command_word(op: u8, extra_words: u8, fields: u32) -> u32 {
    ((extra_words as u32 & 0xF) << field::EXTRA_SHIFT)
        | ((op as u32) << field::OPCODE_SHIFT)
        | (fields & 0x000F_FFFF)
}

/// Opcode of a command word.
#[must_use]
pub const fn opcode_of(word: u32) -> u8 {
    ((word >> field::OPCODE_SHIFT) & 0xFF) as u8
}

/// Extra-word count of a command word.
#[must_use]
pub const fn extra_words_of(word: u32) -> u8 {
    ((word >> field::EXTRA_SHIFT) & 0xF) as u8
}

/// Byte width encoded by a WRITE length code, or `None` for an invalid code.
#[must_use]
pub const fn data_len_bytes(len_code: u32) -> Option<usize> {
    match len_code {
        0 => Some(1),
        1 => Some(2),
        2 => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_fields() {
        let word = command_word(opcode::RESERVE, 1, field::UNFILLED_BIT | 5);
        assert_eq!(opcode_of(word), opcode::RESERVE);
        assert_eq!(extra_words_of(word), 1);
        assert_eq!(word & field::RESERVE_REGION_MASK, 5);
        assert_ne!(word & field::UNFILLED_BIT, 0);
    }

    #[test]
    fn table_geometry() {
        assert_eq!(TABLE_BYTES, 72);
        assert_eq!(pointer_offset(0), 8);
        assert_eq!(pointer_offset(15), 68);
    }
}
