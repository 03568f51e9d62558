//! Chip and core address ranges.
//!
//! Every request on the wire names its destination as `(chip_x, chip_y,
//! core_p)`. Chip coordinates are a byte each; cores are numbered from 0 on
//! each chip, with core 0 running the monitor.
//!
//! ```text
//!   y
//!   ▲  (0,1) ── (1,1) ── (2,1)
//!   │    │  ╲     │  ╲     │
//!   │  (0,0) ── (1,0) ── (2,0)      each chip: cores 0..=17
//!   └──────────────────────────▶ x
//! ```

/// Cores per chip on the reference hardware generation.
pub const CORES_PER_CHIP: u8 = 18;

/// Largest valid core id (`CORES_PER_CHIP - 1`).
pub const MAX_CORE_ID: u8 = CORES_PER_CHIP - 1;

/// Start of the shared SDRAM on every chip.
pub const SDRAM_BASE_ADDRESS: u32 = 0x6000_0000;

/// Size of the shared SDRAM on the reference board (128 MiB).
pub const SDRAM_BYTES: u32 = 128 * 1024 * 1024;

/// True if `p` names a core that exists on a chip.
#[must_use]
pub const fn is_valid_core(p: u8) -> bool {
    p <= MAX_CORE_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_range() {
        assert!(is_valid_core(0));
        assert!(is_valid_core(17));
        assert!(!is_valid_core(18));
        assert_eq!(MAX_CORE_ID, 17);
    }
}
