//! TWIBOOT wire protocol definitions, shared by the device engine and the host driver.
//!
//! Every transaction starts with SLA+W and a single command byte:
//!
//! ```text
//! abort boot timeout:     SLA+W, 0x00, STO
//! show bootloader version SLA+W, 0x01, SLA+R, {16 bytes}, STO
//! start application       SLA+W, 0x01, 0x80, STO
//! read chip info          SLA+W, 0x02, 0x00, addrh, addrl, SLA+R, {8 bytes}, STO
//! read flash / eeprom     SLA+W, 0x02, 0x01|0x02, addrh, addrl, SLA+R, {* bytes}, STO
//! write one flash page    SLA+W, 0x02, 0x01, addrh, addrl, {page bytes}, STO
//! write eeprom bytes      SLA+W, 0x02, 0x02, addrh, addrl, {* bytes}, STO
//! ```

/// Cancel the boot timeout without any other effect
pub const CMD_WAIT: u8 = 0x00;
/// SLA+W: switch application, SLA+R: read version
pub const CMD_SWITCH_APPLICATION: u8 = 0x01;
/// Read / write memory, followed by a memory type and a 16-bit address
pub const CMD_ACCESS_MEMORY: u8 = 0x02;

/// Alias of [`CMD_SWITCH_APPLICATION`] when followed by SLA+R
pub const CMD_READ_VERSION: u8 = CMD_SWITCH_APPLICATION;

/// `CMD_SWITCH_APPLICATION` parameter: stay in (or enter) the bootloader
pub const BOOTTYPE_BOOTLOADER: u8 = 0x00;
/// `CMD_SWITCH_APPLICATION` parameter: start the application
pub const BOOTTYPE_APPLICATION: u8 = 0x80;

/// Length of the version string returned by `CMD_READ_VERSION`
pub const VERSION_LEN: usize = 16;
/// Length of the chip info block
pub const CHIPINFO_LEN: usize = 8;

/// Number of bytes preceding the data phase of a memory access
pub const ACCESS_HEADER_LEN: usize = 4;

/// Bytes in one flash/eeprom read request
pub const READ_BLOCK_SIZE: usize = 128;
/// Bytes in one eeprom write request
pub const EEPROM_WRITE_BLOCK_SIZE: usize = 16;

/// Largest flash page the protocol can describe (page size is a single byte)
pub const MAX_PAGE_SIZE: usize = 128;

/// Value of erased flash, used to pad partial pages
pub const ERASED: u8 = 0xFF;

/// Returned on reads of commands without readable data
pub const NO_DATA: u8 = 0xFF;

/// Memory selector following `CMD_ACCESS_MEMORY`
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemType {
    ChipInfo = 0x00,
    Flash = 0x01,
    Eeprom = 0x02,
}

impl MemType {
    /// Decode a memory selector byte
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(MemType::ChipInfo),
            0x01 => Some(MemType::Flash),
            0x02 => Some(MemType::Eeprom),
            _ => None,
        }
    }

    /// Resolve a user-facing memory name (`flash`, `eeprom`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "flash" => Some(MemType::Flash),
            "eeprom" => Some(MemType::Eeprom),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MemType::ChipInfo => "chipinfo",
            MemType::Flash => "flash",
            MemType::Eeprom => "eeprom",
        }
    }
}

impl core::fmt::Display for MemType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(feature = "std")]
impl std::str::FromStr for MemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemType::from_name(s).ok_or_else(|| format!("invalid memtype: '{}'", s))
    }
}

/// Command resolved by the device engine for the current transaction.
///
/// The first byte of a write selects `Wait`, `SwitchApplication` or `AccessMemory`,
/// the second refines the latter two. `WriteFlashPage` / `WriteEepromPage` mark a
/// buffered page that must be committed when the transaction ends.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Command {
    Wait,
    /// Also answers SLA+R with the version string
    SwitchApplication,
    BootBootloader,
    BootApplication,
    AccessMemory,
    AccessChipInfo,
    AccessFlash,
    AccessEeprom,
    WriteFlashPage,
    WriteEepromPage,
}

impl Command {
    /// Decode a leading command byte, `None` for anything outside the protocol
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            CMD_WAIT => Some(Command::Wait),
            CMD_SWITCH_APPLICATION => Some(Command::SwitchApplication),
            CMD_ACCESS_MEMORY => Some(Command::AccessMemory),
            _ => None,
        }
    }
}

/// Header for a memory access: command, memory type, big-endian address
pub fn access_header(memtype: MemType, address: u16) -> [u8; ACCESS_HEADER_LEN] {
    let [hi, lo] = address.to_be_bytes();
    [CMD_ACCESS_MEMORY, memtype as u8, hi, lo]
}
