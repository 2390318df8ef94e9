use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_hal::blocking::i2c::{Read, Write};

use crate::chip::ChipInfo;
use crate::protocol::{
    access_header, MemType, ACCESS_HEADER_LEN, BOOTTYPE_APPLICATION, BOOTTYPE_BOOTLOADER, CHIPINFO_LEN,
    CMD_READ_VERSION, CMD_SWITCH_APPLICATION, EEPROM_WRITE_BLOCK_SIZE, ERASED, READ_BLOCK_SIZE,
    VERSION_LEN,
};

/// High level operation in progress when an error occurred
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Operation {
    Read,
    Write,
    Verify,
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Verify => "verify",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error<E: Debug> {
    /// Bus could not be opened or the bootloader did not answer the handshake
    #[error("device unreachable ({stage}): {detail}")]
    DeviceUnreachable { stage: &'static str, detail: String },

    /// Options can not be used with this device
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Handshake answered with something other than a bootloader
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Flash writes must start on a page boundary
    #[error("address 0x{address:04x} not aligned to page size 0x{page_size:02x}")]
    Alignment { address: u16, page_size: u8 },

    /// Range does not fit the target memory
    #[error("invalid {memtype} range: 0x{address:04x} + 0x{len:04x} > 0x{size:04x}")]
    Size {
        memtype: MemType,
        address: u16,
        len: usize,
        size: usize,
    },

    /// A single bus transaction failed
    #[error("{op} {memtype} failed at 0x{offset:04x}: {bus:?}")]
    Bus {
        op: Operation,
        memtype: MemType,
        offset: usize,
        bus: E,
    },

    /// Read back differs from the written image
    #[error("verify {memtype} failed at 0x{offset:04x}")]
    VerifyMismatch { memtype: MemType, offset: usize },
}

impl<E: Debug> Error<E> {
    fn unreachable(stage: &'static str, e: E) -> Self {
        Error::DeviceUnreachable {
            stage,
            detail: format!("{:?}", e),
        }
    }
}

/// Parse a bus address given in hex (`0x21` or `21`)
pub fn parse_address(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    match u8::from_str_radix(digits, 16) {
        Ok(v) if (0x01..=0x7F).contains(&v) => Ok(v),
        _ => Err(format!("invalid address: '{}'", s)),
    }
}

/// Parse a non-zero transfer block size
pub fn parse_block_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(format!("invalid block size: '{}'", s)),
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Bootloader bus address (hex, 0x01 - 0x7F)
    #[cfg_attr(feature = "structopt", structopt(short = "a", long, default_value = "0x21", parse(try_from_str = parse_address)))]
    pub address: u8,

    /// Bytes in one flash/eeprom read request
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "128", parse(try_from_str = parse_block_size)))]
    pub read_block_size: usize,

    /// Bytes in one eeprom write request
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "16", parse(try_from_str = parse_block_size)))]
    pub eeprom_block_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            address: 0x21,
            read_block_size: READ_BLOCK_SIZE,
            eeprom_block_size: EEPROM_WRITE_BLOCK_SIZE,
        }
    }
}

/// Contents of a memory range, owned by the caller
#[derive(Clone, PartialEq, Debug)]
pub struct MemoryImage {
    /// Start address on the device
    pub address: u16,
    pub data: Vec<u8>,
}

impl MemoryImage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { address: 0, data }
    }

    pub fn at(address: u16, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Progress callback: `(label, position, total)`.
///
/// Called before every block and once with `position == total` on completion.
/// `position == -1` reports an aborted operation.
pub type ProgressCallback = Box<dyn FnMut(&str, i64, i64)>;

/// Host side of the bootloader protocol.
pub struct Twiboot<I, E> {
    i2c: I,
    options: Options,
    version: String,
    chip: ChipInfo,
    progress: Option<ProgressCallback>,
    _err: PhantomData<E>,
}

impl<I, E> Twiboot<I, E>
where
    I: Read<Error = E> + Write<Error = E>,
    E: Debug,
{
    /// Force the target into the bootloader and fetch its version and chip info
    pub fn open(i2c: I, options: Options) -> Result<Self, Error<E>> {
        if options.read_block_size == 0 || options.eeprom_block_size == 0 {
            error!("Zero block size in {:?}", options);
            return Err(Error::InvalidOptions("block sizes must be non-zero".to_string()));
        }

        let mut t = Self {
            i2c,
            options,
            version: String::new(),
            chip: ChipInfo {
                signature: [0; 3],
                page_size: 0,
                flash_end: 0,
                eeprom_size: 0,
            },
            progress: None,
            _err: PhantomData,
        };

        debug!("Switching device 0x{:02x} to bootloader", t.options.address);
        t.switch_application(BOOTTYPE_BOOTLOADER)
            .map_err(|e| Error::unreachable("switch to bootloader (invalid address?)", e))?;

        debug!("Reading bootloader version");
        let mut version = [0u8; VERSION_LEN];
        t.i2c
            .write(t.options.address, &[CMD_READ_VERSION])
            .and_then(|_| t.i2c.read(t.options.address, &mut version))
            .map_err(|e| Error::unreachable("read version", e))?;

        if version.iter().all(|b| *b == 0xFF) || version.iter().all(|b| *b == 0x00) {
            error!("No bootloader version returned: {}", hex::encode(&version));
            return Err(Error::ProtocolMismatch("no bootloader version".to_string()));
        }
        t.version = decode_version(&version);

        debug!("Reading chip info");
        let mut info = [0u8; CHIPINFO_LEN];
        t.read_memory(MemType::ChipInfo, 0x0000, &mut info)
            .map_err(|e| Error::unreachable("read chipinfo", e))?;

        let chip = ChipInfo::from_bytes(&info);
        if let Err(e) = chip.validate() {
            error!("Invalid chip info {}: {:?}", hex::encode(&info), e);
            return Err(Error::ProtocolMismatch(format!("invalid chip info: {:?}", e)));
        }
        t.chip = chip;

        // Buffered eeprom writes hold at most one page
        if t.options.eeprom_block_size > t.chip.page_len() {
            error!(
                "EEPROM block size {} exceeds page size {}",
                t.options.eeprom_block_size, t.chip.page_size
            );
            return Err(Error::InvalidOptions(format!(
                "eeprom block size {} exceeds page size {}",
                t.options.eeprom_block_size, t.chip.page_size
            )));
        }

        info!(
            "Connected to '{}' ({}, page size {}, flash 0x{:04x}, eeprom 0x{:04x})",
            t.version,
            t.chip.name(),
            t.chip.page_size,
            t.chip.flash_end,
            t.chip.eeprom_size
        );

        Ok(t)
    }

    /// Start the application and release the bus
    pub fn close(mut self) -> I {
        debug!("Switching device to application");
        if let Err(e) = self.switch_application(BOOTTYPE_APPLICATION) {
            warn!("Failed to start application: {:?}", e);
        }
        self.i2c
    }

    /// Set (or clear) the progress callback
    pub fn set_progress(&mut self, progress: Option<ProgressCallback>) {
        self.progress = progress;
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn chip_info(&self) -> &ChipInfo {
        &self.chip
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Borrow the underlying bus
    pub fn inner(&self) -> &I {
        &self.i2c
    }

    pub fn inner_mut(&mut self) -> &mut I {
        &mut self.i2c
    }

    /// Resolve a memory name, `None` for unknown names
    pub fn get_memtype(&self, name: &str) -> Option<MemType> {
        MemType::from_name(name)
    }

    /// Size of a memory as reported by the device, zero for non-programmable types
    pub fn get_memsize(&self, memtype: MemType) -> usize {
        match memtype {
            MemType::Flash => self.chip.flash_end as usize,
            MemType::Eeprom => self.chip.eeprom_size as usize,
            MemType::ChipInfo => 0,
        }
    }

    /// Read the first `length` bytes of a memory
    pub fn read(&mut self, memtype: MemType, length: usize) -> Result<MemoryImage, Error<E>> {
        self.check_range(memtype, 0, length)?;

        let label = format!("reading {}", memtype);
        let block = self.options.read_block_size;
        let mut data = vec![0u8; length];

        let mut pos = 0;
        while pos < length {
            self.report(&label, pos as i64, length as i64);

            let len = block.min(length - pos);
            if let Err(e) = self.read_memory(memtype, pos as u16, &mut data[pos..pos + len]) {
                self.report(&label, -1, -1);
                error!("Reading {} failed at 0x{:04x}: {:?}", memtype, pos, e);
                return Err(Error::Bus {
                    op: Operation::Read,
                    memtype,
                    offset: pos,
                    bus: e,
                });
            }

            pos += len;
        }

        self.report(&label, length as i64, length as i64);

        Ok(MemoryImage::new(data))
    }

    /// Write an image, flash in whole pages and eeprom in small blocks
    pub fn write(&mut self, memtype: MemType, image: &MemoryImage) -> Result<(), Error<E>> {
        let block = match memtype {
            MemType::Flash => {
                let page_size = self.chip.page_len();
                if image.address as usize % page_size != 0 {
                    error!(
                        "Address 0x{:04x} not aligned to page size 0x{:02x}",
                        image.address, page_size
                    );
                    return Err(Error::Alignment {
                        address: image.address,
                        page_size: self.chip.page_size,
                    });
                }
                page_size
            }
            _ => self.options.eeprom_block_size,
        };
        self.check_range(memtype, image.address, image.len())?;

        let label = format!("writing {}", memtype);
        let total = image.len();

        let mut pos = 0;
        while pos < total {
            self.report(&label, pos as i64, total as i64);

            let len = block.min(total - pos);
            let address = image.address + pos as u16;
            if let Err(e) = self.write_memory(memtype, address, &image.data[pos..pos + len]) {
                self.report(&label, -1, -1);
                error!("Writing {} failed at 0x{:04x}: {:?}", memtype, address, e);
                return Err(Error::Bus {
                    op: Operation::Write,
                    memtype,
                    offset: address as usize,
                    bus: e,
                });
            }

            pos += len;
        }

        self.report(&label, total as i64, total as i64);

        Ok(())
    }

    /// Read back the image's range and compare, stopping at the first differing block
    pub fn verify(&mut self, memtype: MemType, image: &MemoryImage) -> Result<(), Error<E>> {
        self.check_range(memtype, image.address, image.len())?;

        let label = format!("verifying {}", memtype);
        let block = self.options.read_block_size;
        let total = image.len();
        let mut buff = vec![0u8; block];

        let mut pos = 0;
        while pos < total {
            self.report(&label, pos as i64, total as i64);

            let len = block.min(total - pos);
            let address = image.address + pos as u16;
            if let Err(e) = self.read_memory(memtype, address, &mut buff[..len]) {
                self.report(&label, -1, -1);
                error!("Reading {} failed at 0x{:04x}: {:?}", memtype, address, e);
                return Err(Error::Bus {
                    op: Operation::Verify,
                    memtype,
                    offset: address as usize,
                    bus: e,
                });
            }

            if buff[..len] != image.data[pos..pos + len] {
                self.report(&label, -1, -1);
                error!("Verify failed at 0x{:04x}", address);
                return Err(Error::VerifyMismatch {
                    memtype,
                    offset: address as usize,
                });
            }

            pos += len;
        }

        self.report(&label, total as i64, total as i64);

        Ok(())
    }

    fn check_range(&self, memtype: MemType, address: u16, len: usize) -> Result<(), Error<E>> {
        let size = self.get_memsize(memtype);
        if address as usize + len > size {
            error!(
                "Invalid {} range: 0x{:04x} + 0x{:04x} > 0x{:04x}",
                memtype, address, len, size
            );
            return Err(Error::Size {
                memtype,
                address,
                len,
                size,
            });
        }
        Ok(())
    }

    fn report(&mut self, label: &str, pos: i64, total: i64) {
        if let Some(cb) = self.progress.as_mut() {
            cb(label, pos, total);
        }
    }

    fn switch_application(&mut self, boot_type: u8) -> Result<(), E> {
        self.i2c
            .write(self.options.address, &[CMD_SWITCH_APPLICATION, boot_type])
    }

    fn read_memory(&mut self, memtype: MemType, address: u16, buff: &mut [u8]) -> Result<(), E> {
        let cmd = access_header(memtype, address);
        trace!("=> {}", hex::encode(&cmd));

        self.i2c.write(self.options.address, &cmd)?;
        self.i2c.read(self.options.address, buff)?;

        trace!("<= {}", hex::encode(&buff[..]));
        Ok(())
    }

    fn write_memory(&mut self, memtype: MemType, address: u16, data: &[u8]) -> Result<(), E> {
        let mut cmd = access_header(memtype, address).to_vec();
        cmd.extend_from_slice(data);

        // Flash is always written in whole pages
        if memtype == MemType::Flash {
            cmd.resize(ACCESS_HEADER_LEN + self.chip.page_len(), ERASED);
        }

        debug!("Writing {} bytes to {} 0x{:04x}", data.len(), memtype, address);
        trace!("=> {}", hex::encode(&cmd));

        self.i2c.write(self.options.address, &cmd)
    }
}

fn decode_version(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| b & 0x7F)
        .take_while(|b| *b != 0)
        .map(char::from)
        .collect::<String>()
        .trim_end()
        .to_string()
}
