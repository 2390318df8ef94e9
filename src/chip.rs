//! Chip memory model, reported by the bootloader and consumed by the host.

use crate::protocol::{CHIPINFO_LEN, MAX_PAGE_SIZE, VERSION_LEN};

/// Memory layout of a target device.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ChipInfo {
    /// Device signature bytes
    pub signature: [u8; 3],
    /// Flash page size in bytes
    pub page_size: u8,
    /// First flash address occupied by the bootloader, writable flash ends here
    pub flash_end: u16,
    /// EEPROM size in bytes
    pub eeprom_size: u16,
}

/// Reasons a chip info block is not usable.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChipInfoError {
    PageSize(u8),
    FlashEnd(u16),
}

impl ChipInfo {
    pub const ATMEGA8: ChipInfo = ChipInfo {
        signature: [0x1E, 0x93, 0x07],
        page_size: 64,
        flash_end: 0x1C00,
        eeprom_size: 0x0200,
    };

    pub const ATMEGA88: ChipInfo = ChipInfo {
        signature: [0x1E, 0x93, 0x0A],
        page_size: 64,
        flash_end: 0x1C00,
        eeprom_size: 0x0200,
    };

    pub const ATMEGA168: ChipInfo = ChipInfo {
        signature: [0x1E, 0x94, 0x06],
        page_size: 128,
        flash_end: 0x3C00,
        eeprom_size: 0x0200,
    };

    /// Encode as sent on the bus: signature, page size, flash end and eeprom size
    /// (16-bit fields big-endian)
    pub fn to_bytes(&self) -> [u8; CHIPINFO_LEN] {
        let [fh, fl] = self.flash_end.to_be_bytes();
        let [eh, el] = self.eeprom_size.to_be_bytes();
        [
            self.signature[0],
            self.signature[1],
            self.signature[2],
            self.page_size,
            fh,
            fl,
            eh,
            el,
        ]
    }

    pub fn from_bytes(b: &[u8; CHIPINFO_LEN]) -> Self {
        Self {
            signature: [b[0], b[1], b[2]],
            page_size: b[3],
            flash_end: u16::from_be_bytes([b[4], b[5]]),
            eeprom_size: u16::from_be_bytes([b[6], b[7]]),
        }
    }

    /// Page size as a buffer length
    pub fn page_len(&self) -> usize {
        self.page_size as usize
    }

    /// Check the page size is usable and flash ends on a page boundary
    pub const fn validate(&self) -> Result<(), ChipInfoError> {
        let ps = self.page_size as usize;
        if ps == 0 || !ps.is_power_of_two() || ps > MAX_PAGE_SIZE {
            return Err(ChipInfoError::PageSize(self.page_size));
        }
        if self.flash_end as usize % ps != 0 {
            return Err(ChipInfoError::FlashEnd(self.flash_end));
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        chip_name(&self.signature)
    }
}

const CHIPS: &[([u8; 3], &str)] = &[
    ([0x1E, 0x93, 0x07], "AVR Mega 8"),
    ([0x1E, 0x93, 0x0A], "AVR Mega 88"),
    ([0x1E, 0x94, 0x06], "AVR Mega 168"),
    ([0x1E, 0x95, 0x02], "AVR Mega 32"),
];

/// Look up a human readable name for a device signature
pub fn chip_name(signature: &[u8; 3]) -> &'static str {
    CHIPS
        .iter()
        .find(|(sig, _)| sig == signature)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

/// Build a zero padded version string at compile time
pub const fn version_string(s: &str) -> [u8; VERSION_LEN] {
    let b = s.as_bytes();
    let mut out = [0u8; VERSION_LEN];
    let mut i = 0;
    while i < b.len() && i < VERSION_LEN {
        out[i] = b[i];
        i += 1;
    }
    out
}
