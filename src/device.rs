//! Device protocol engine.
//!
//! The bootloader side of the protocol, as an explicit state machine. A TWI
//! interrupt (or polling loop) reads the hardware status, converts it with
//! [`TwiEvent::from_status`], feeds it to [`Engine::handle`] and applies the
//! returned [`Response`] to the peripheral. Memory access goes through
//! [`TargetMemory`] so the engine runs unchanged against real flash or RAM.
//!
//! Flash pages are buffered for the whole transaction and committed once, when
//! the transaction ends. An erase/program cycle takes milliseconds and would not
//! fit in the acknowledge window of a single byte.

use crate::chip::{version_string, ChipInfo};
use crate::protocol::{
    Command, MemType, ACCESS_HEADER_LEN, BOOTTYPE_APPLICATION, CHIPINFO_LEN, MAX_PAGE_SIZE,
    NO_DATA, VERSION_LEN,
};

/// Boot timeout in timer ticks (40 * 25ms)
pub const BOOT_TIMEOUT_TICKS: u8 = 40;

/// Boot timeout timer period
pub const TICK_PERIOD_MS: u32 = 25;

/// Memory operations needed by the engine.
pub trait TargetMemory {
    /// Read one byte of program memory
    fn read_flash(&mut self, address: u16) -> u8;

    /// Read one byte of EEPROM
    fn read_eeprom(&mut self, address: u16) -> u8;

    /// Write one byte of EEPROM, blocking until the write completes
    fn write_eeprom(&mut self, address: u16, value: u8);

    /// Erase and program the page starting at `address`, blocking until done
    /// and re-enabling reads from the programmed section.
    fn program_flash_page(&mut self, address: u16, data: &[u8]);
}

/// How EEPROM writes are performed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EepromMode {
    /// Each received byte is written immediately, stretching the bus clock
    WriteThrough,
    /// Bytes are buffered like a flash page and written when the transaction ends
    Buffered,
}

/// Compiled-in description of the running bootloader.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DeviceConfig {
    pub chip: ChipInfo,
    pub version: [u8; VERSION_LEN],
    pub boot_timeout: u8,
    pub eeprom_mode: EepromMode,
}

impl DeviceConfig {
    /// Panics (at compile time for constants) if `chip` does not validate
    pub const fn new(chip: ChipInfo, version: [u8; VERSION_LEN]) -> Self {
        assert!(chip.validate().is_ok(), "invalid chip info");
        Self {
            chip,
            version,
            boot_timeout: BOOT_TIMEOUT_TICKS,
            eeprom_mode: EepromMode::WriteThrough,
        }
    }

    pub const ATMEGA8: DeviceConfig =
        DeviceConfig::new(ChipInfo::ATMEGA8, version_string("TWIBOOT m8v2.0"));

    pub const ATMEGA88: DeviceConfig =
        DeviceConfig::new(ChipInfo::ATMEGA88, version_string("TWIBOOT m88v2.0"));

    pub const ATMEGA168: DeviceConfig =
        DeviceConfig::new(ChipInfo::ATMEGA168, version_string("TWIBOOT m168v2.0"));

    /// Find a built-in profile by short name (`atmega8`, `atmega88`, `atmega168`)
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "atmega8" | "m8" => Some(Self::ATMEGA8),
            "atmega88" | "m88" => Some(Self::ATMEGA88),
            "atmega168" | "m168" => Some(Self::ATMEGA168),
            _ => None,
        }
    }
}

/// TWI slave bus events, named after the AVR TWSR status codes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TwiEvent {
    /// Own SLA+W received (START of a write transaction)
    AddressedWrite,
    /// Data byte received and acknowledged
    Received(u8),
    /// Data byte received after we answered NACK, no longer addressed
    ReceivedAfterNack,
    /// STOP or repeated START while addressed
    Stop,
    /// Own SLA+R received (START of a read transaction), first byte wanted
    AddressedRead,
    /// Previous byte acknowledged by the master, next byte wanted
    ReadRequested,
    /// Master answered NACK or took the last byte
    ReadDone,
    /// Bus error or no relevant state
    IllegalState,
}

impl TwiEvent {
    /// Decode a TWSR value (prescaler bits are masked), `data` is the current TWDR.
    /// Codes with nothing to do for a slave return `None`.
    pub fn from_status(status: u8, data: u8) -> Option<Self> {
        match status & 0xF8 {
            0x60 | 0x68 => Some(TwiEvent::AddressedWrite),
            0x80 => Some(TwiEvent::Received(data)),
            0x88 => Some(TwiEvent::ReceivedAfterNack),
            0xA0 => Some(TwiEvent::Stop),
            0xA8 | 0xB0 => Some(TwiEvent::AddressedRead),
            0xB8 => Some(TwiEvent::ReadRequested),
            0xC0 | 0xC8 => Some(TwiEvent::ReadDone),
            0x00 | 0xF8 => Some(TwiEvent::IllegalState),
            _ => None,
        }
    }
}

/// Action the TWI peripheral must take after an event.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Response {
    /// Continue, acknowledging the next received byte
    Ack,
    /// Continue, answering the next received byte with NACK
    Nack,
    /// Load a byte for the master to read
    Transmit(u8),
    /// Release the bus and reset the peripheral
    ResetBus,
}

/// Boot/application handoff state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BootState {
    BootloaderActive,
    ApplicationActive,
}

/// Per-transaction protocol state machine.
pub struct Engine {
    config: DeviceConfig,
    state: BootState,
    command: Command,
    position: usize,
    address: u16,
    rejecting: bool,
    boot_timeout: u8,
    page: [u8; MAX_PAGE_SIZE],
}

impl Engine {
    pub fn new(config: DeviceConfig) -> Self {
        debug_assert!(config.chip.validate().is_ok());
        let boot_timeout = config.boot_timeout;
        Self {
            config,
            state: BootState::BootloaderActive,
            command: Command::Wait,
            position: 0,
            address: 0,
            rejecting: false,
            boot_timeout,
            page: [0u8; MAX_PAGE_SIZE],
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Remaining boot timeout ticks, zero once cancelled or expired
    pub fn boot_timeout(&self) -> u8 {
        self.boot_timeout
    }

    /// Process one bus event.
    pub fn handle<M: TargetMemory>(&mut self, event: TwiEvent, mem: &mut M) -> Response {
        match event {
            TwiEvent::AddressedWrite => {
                self.end_transaction(mem);
                self.start_transaction();
                Response::Ack
            }
            TwiEvent::Received(data) => self.receive(data, mem),
            TwiEvent::ReceivedAfterNack => {
                self.end_transaction(mem);
                Response::Ack
            }
            TwiEvent::Stop => {
                self.end_transaction(mem);
                Response::Ack
            }
            TwiEvent::AddressedRead => {
                self.end_transaction(mem);
                self.start_transaction();
                Response::Transmit(self.transmit(mem))
            }
            TwiEvent::ReadRequested => Response::Transmit(self.transmit(mem)),
            TwiEvent::ReadDone => Response::Ack,
            TwiEvent::IllegalState => {
                self.abort_transaction();
                Response::ResetBus
            }
        }
    }

    /// Advance the boot timeout by one timer period.
    pub fn tick(&mut self) -> BootState {
        if self.boot_timeout > 1 {
            self.boot_timeout -= 1;
        } else if self.boot_timeout == 1 {
            self.boot_application();
        }
        self.state
    }

    fn boot_application(&mut self) {
        self.command = Command::BootApplication;
        self.state = BootState::ApplicationActive;
        self.boot_timeout = 0;
    }

    fn start_transaction(&mut self) {
        self.position = 0;
        self.rejecting = false;
    }

    fn abort_transaction(&mut self) {
        self.command = match self.command {
            Command::WriteFlashPage => Command::AccessFlash,
            Command::WriteEepromPage => Command::AccessEeprom,
            c => c,
        };
        self.start_transaction();
    }

    fn receive<M: TargetMemory>(&mut self, data: u8, mem: &mut M) -> Response {
        if self.rejecting || self.state == BootState::ApplicationActive {
            return Response::Nack;
        }

        let ack = match self.position {
            0 => self.receive_command(data),
            1 => self.receive_selector(data),
            2 | 3 => {
                self.address = (self.address << 8) | data as u16;
                self.position += 1;
                true
            }
            _ => self.receive_data(data, mem),
        };

        if ack {
            Response::Ack
        } else {
            self.rejecting = true;
            Response::Nack
        }
    }

    fn receive_command(&mut self, data: u8) -> bool {
        match Command::from_u8(data) {
            // Stays at position 0, the next byte is another command
            Some(Command::Wait) => {
                self.boot_timeout = 0;
                self.command = Command::Wait;
                true
            }
            Some(command) => {
                self.boot_timeout = 0;
                self.command = command;
                self.position = 1;
                true
            }
            // Not our protocol, let the application have the bus
            None => {
                self.boot_application();
                false
            }
        }
    }

    fn receive_selector(&mut self, data: u8) -> bool {
        match self.command {
            Command::SwitchApplication => {
                if data == BOOTTYPE_APPLICATION {
                    self.boot_application();
                } else {
                    self.command = Command::BootBootloader;
                }
                false
            }
            Command::AccessMemory => {
                self.position = 2;
                self.command = match MemType::from_u8(data) {
                    Some(MemType::ChipInfo) => Command::AccessChipInfo,
                    Some(MemType::Flash) => Command::AccessFlash,
                    Some(MemType::Eeprom) => Command::AccessEeprom,
                    None => return false,
                };
                true
            }
            _ => false,
        }
    }

    fn receive_data<M: TargetMemory>(&mut self, data: u8, mem: &mut M) -> bool {
        let offset = self.position - ACCESS_HEADER_LEN;
        let page_len = self.config.chip.page_len().min(MAX_PAGE_SIZE);

        match (self.command, self.config.eeprom_mode) {
            (Command::AccessFlash, _) => {
                if offset == 0 && !self.flash_page_writable() {
                    return false;
                }
                self.page[offset] = data;
                self.position += 1;

                if offset + 1 < page_len {
                    true
                } else {
                    self.command = Command::WriteFlashPage;
                    false
                }
            }
            (Command::AccessEeprom, EepromMode::WriteThrough) => {
                if self.address >= self.config.chip.eeprom_size {
                    return false;
                }
                mem.write_eeprom(self.address, data);
                self.address = self.address.wrapping_add(1);
                self.position += 1;
                // The next byte would land past the end
                self.address < self.config.chip.eeprom_size
            }
            (Command::AccessEeprom, EepromMode::Buffered)
            | (Command::WriteEepromPage, EepromMode::Buffered) => {
                let target = self.address as usize + offset;
                if target >= self.config.chip.eeprom_size as usize {
                    return false;
                }
                self.page[offset] = data;
                self.position += 1;
                self.command = Command::WriteEepromPage;

                offset + 1 < page_len && target + 1 < self.config.chip.eeprom_size as usize
            }
            _ => false,
        }
    }

    fn flash_page_writable(&self) -> bool {
        if self.config.chip.validate().is_err() {
            return false;
        }
        let page_len = self.config.chip.page_len() as u16;
        self.address % page_len == 0 && self.address < self.config.chip.flash_end
    }

    /// Commit a buffered page, if one is pending.
    fn end_transaction<M: TargetMemory>(&mut self, mem: &mut M) {
        match self.command {
            Command::WriteFlashPage => {
                let page_len = self.config.chip.page_len();
                mem.program_flash_page(self.address, &self.page[..page_len]);
                self.address = self.address.wrapping_add(page_len as u16);
                self.command = Command::AccessFlash;
            }
            Command::WriteEepromPage => {
                let count = self.position - ACCESS_HEADER_LEN;
                for (i, value) in self.page[..count].iter().enumerate() {
                    mem.write_eeprom(self.address.wrapping_add(i as u16), *value);
                }
                self.address = self.address.wrapping_add(count as u16);
                self.command = Command::AccessEeprom;
            }
            _ => (),
        }
    }

    fn transmit<M: TargetMemory>(&mut self, mem: &mut M) -> u8 {
        match self.command {
            Command::SwitchApplication | Command::BootBootloader => {
                let data = self.config.version[self.position % VERSION_LEN];
                self.position = (self.position + 1) % VERSION_LEN;
                data
            }
            Command::AccessChipInfo => {
                let data = self.config.chip.to_bytes()[self.position % CHIPINFO_LEN];
                self.position = (self.position + 1) % CHIPINFO_LEN;
                data
            }
            Command::AccessFlash => {
                let data = mem.read_flash(self.address);
                self.address = self.address.wrapping_add(1);
                data
            }
            Command::AccessEeprom => {
                let data = mem.read_eeprom(self.address);
                self.address = self.address.wrapping_add(1);
                data
            }
            _ => NO_DATA,
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::sim::RamTarget;

    fn setup() -> (Engine, RamTarget) {
        let config = DeviceConfig::ATMEGA8;
        let mem = RamTarget::new(&config.chip);
        (Engine::new(config), mem)
    }

    /// Deliver one write transaction, returning the response to each byte
    fn write(e: &mut Engine, mem: &mut RamTarget, bytes: &[u8]) -> Vec<Response> {
        assert_eq!(e.handle(TwiEvent::AddressedWrite, mem), Response::Ack);
        let r = bytes
            .iter()
            .map(|b| e.handle(TwiEvent::Received(*b), mem))
            .collect();
        e.handle(TwiEvent::Stop, mem);
        r
    }

    fn read(e: &mut Engine, mem: &mut RamTarget, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..len {
            let ev = if i == 0 {
                TwiEvent::AddressedRead
            } else {
                TwiEvent::ReadRequested
            };
            match e.handle(ev, mem) {
                Response::Transmit(b) => out.push(b),
                r => panic!("unexpected response {:?}", r),
            }
        }
        e.handle(TwiEvent::ReadDone, mem);
        out
    }

    #[test]
    fn status_codes() {
        assert_eq!(TwiEvent::from_status(0x60, 0), Some(TwiEvent::AddressedWrite));
        assert_eq!(TwiEvent::from_status(0x81, 0x42), Some(TwiEvent::Received(0x42)));
        assert_eq!(TwiEvent::from_status(0xA8, 0), Some(TwiEvent::AddressedRead));
        assert_eq!(TwiEvent::from_status(0xF8, 0), Some(TwiEvent::IllegalState));
        assert_eq!(TwiEvent::from_status(0x08, 0), None);
    }

    #[test]
    fn read_version_cycles() {
        let (mut e, mut mem) = setup();
        write(&mut e, &mut mem, &[0x01]);
        let v = read(&mut e, &mut mem, 20);
        assert_eq!(&v[..14], b"TWIBOOT m8v2.0");
        assert_eq!(&v[16..20], b"TWIB");
    }

    #[test]
    fn read_chipinfo() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(r, vec![Response::Ack; 4]);
        let info = read(&mut e, &mut mem, 8);
        assert_eq!(info, ChipInfo::ATMEGA8.to_bytes().to_vec());
    }

    #[test]
    fn unknown_command_boots_application() {
        let (mut e, mut mem) = setup();
        assert_eq!(e.boot_timeout(), BOOT_TIMEOUT_TICKS);

        let r = write(&mut e, &mut mem, &[0x55]);
        assert_eq!(r, vec![Response::Nack]);
        assert_eq!(e.state(), BootState::ApplicationActive);
        assert_eq!(e.command(), Command::BootApplication);
    }

    #[test]
    fn application_state_is_terminal() {
        let (mut e, mut mem) = setup();
        write(&mut e, &mut mem, &[0x01, 0x80]);
        assert_eq!(e.state(), BootState::ApplicationActive);

        let r = write(&mut e, &mut mem, &[0x01, 0x00]);
        assert_eq!(r, vec![Response::Nack, Response::Nack]);
        assert_eq!(e.state(), BootState::ApplicationActive);
    }

    #[test]
    fn stay_in_bootloader() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x01, 0x00]);
        assert_eq!(r, vec![Response::Ack, Response::Nack]);
        assert_eq!(e.state(), BootState::BootloaderActive);
        assert_eq!(e.boot_timeout(), 0);

        for _ in 0..100 {
            assert_eq!(e.tick(), BootState::BootloaderActive);
        }
    }

    #[test]
    fn timeout_boots_application() {
        let (mut e, _mem) = setup();
        for _ in 0..BOOT_TIMEOUT_TICKS - 1 {
            assert_eq!(e.tick(), BootState::BootloaderActive);
        }
        assert_eq!(e.tick(), BootState::ApplicationActive);
    }

    #[test]
    fn wait_cancels_timeout() {
        let (mut e, mut mem) = setup();
        e.tick();
        write(&mut e, &mut mem, &[0x00]);
        assert_eq!(e.boot_timeout(), 0);
        assert_eq!(e.command(), Command::Wait);
        for _ in 0..100 {
            assert_eq!(e.tick(), BootState::BootloaderActive);
        }
    }

    #[test]
    fn wait_keeps_command_position() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x00, 0x02, 0x01, 0x00, 0x40]);
        assert_eq!(r, vec![Response::Ack; 5]);
        assert_eq!(e.command(), Command::AccessFlash);
        assert_eq!(e.address(), 0x0040);
    }

    #[test]
    fn invalid_selector_nacks() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x02, 0x07, 0x00]);
        assert_eq!(r, vec![Response::Ack, Response::Nack, Response::Nack]);
        assert_eq!(read(&mut e, &mut mem, 2), vec![0xFF, 0xFF]);
    }

    #[test]
    fn chipinfo_is_read_only() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x02, 0x00, 0x00, 0x00, 0xAA]);
        assert_eq!(*r.last().unwrap(), Response::Nack);
    }

    #[test]
    fn flash_page_commits_at_stop() {
        let (mut e, mut mem) = setup();
        let mut tx = vec![0x02, 0x01, 0x00, 0x40];
        tx.extend((0..64).map(|i| i as u8));

        e.handle(TwiEvent::AddressedWrite, &mut mem);
        let mut last = Response::Ack;
        for b in &tx {
            last = e.handle(TwiEvent::Received(*b), &mut mem);
        }
        // Last byte of the page NACKs anything following
        assert_eq!(last, Response::Nack);
        assert_eq!(e.command(), Command::WriteFlashPage);
        assert_eq!(mem.page_commits(), 0);

        e.handle(TwiEvent::Stop, &mut mem);
        assert_eq!(mem.page_commits(), 1);
        assert_eq!(e.command(), Command::AccessFlash);
        assert_eq!(&mem.flash()[0x40..0x80], &tx[4..]);

        // A second STOP must not commit again
        e.handle(TwiEvent::Stop, &mut mem);
        assert_eq!(mem.page_commits(), 1);
    }

    #[test]
    fn partial_flash_page_is_discarded() {
        let (mut e, mut mem) = setup();
        let mut tx = vec![0x02, 0x01, 0x00, 0x00];
        tx.extend(vec![0x00; 10]);
        write(&mut e, &mut mem, &tx);
        assert_eq!(mem.page_commits(), 0);
        assert!(mem.flash().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn unaligned_flash_page_is_rejected() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x02, 0x01, 0x00, 0x10, 0xAA, 0xBB]);
        assert_eq!(&r[4..], &[Response::Nack, Response::Nack]);
        assert_eq!(mem.page_commits(), 0);
    }

    #[test]
    fn bootloader_section_is_protected() {
        let (mut e, mut mem) = setup();
        let mut tx = vec![0x02, 0x01, 0x1C, 0x00];
        tx.extend(vec![0x00; 64]);
        let r = write(&mut e, &mut mem, &tx);
        assert_eq!(r[4], Response::Nack);
        assert_eq!(mem.page_commits(), 0);
    }

    #[test]
    fn repeated_start_commits_page() {
        let (mut e, mut mem) = setup();
        e.handle(TwiEvent::AddressedWrite, &mut mem);
        for b in [0x02, 0x01, 0x00, 0x00].iter() {
            e.handle(TwiEvent::Received(*b), &mut mem);
        }
        for _ in 0..64 {
            e.handle(TwiEvent::Received(0x5A), &mut mem);
        }
        e.handle(TwiEvent::AddressedWrite, &mut mem);
        assert_eq!(mem.page_commits(), 1);
        assert_eq!(&mem.flash()[..64], &[0x5A; 64][..]);
    }

    #[test]
    fn illegal_state_drops_pending_page() {
        let (mut e, mut mem) = setup();
        e.handle(TwiEvent::AddressedWrite, &mut mem);
        for b in [0x02, 0x01, 0x00, 0x00].iter() {
            e.handle(TwiEvent::Received(*b), &mut mem);
        }
        for _ in 0..64 {
            e.handle(TwiEvent::Received(0x00), &mut mem);
        }
        assert_eq!(e.handle(TwiEvent::IllegalState, &mut mem), Response::ResetBus);
        e.handle(TwiEvent::Stop, &mut mem);
        assert_eq!(mem.page_commits(), 0);
        assert_eq!(e.command(), Command::AccessFlash);
    }

    #[test]
    fn flash_read_auto_increments() {
        let (mut e, mut mem) = setup();
        mem.flash_mut()[0x100..0x104].copy_from_slice(&[1, 2, 3, 4]);
        write(&mut e, &mut mem, &[0x02, 0x01, 0x01, 0x00]);
        assert_eq!(read(&mut e, &mut mem, 4), vec![1, 2, 3, 4]);
        assert_eq!(e.address(), 0x104);
    }

    #[test]
    fn eeprom_write_through() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x02, 0x02, 0x00, 0x10, 0xDE, 0xAD]);
        assert_eq!(r, vec![Response::Ack; 6]);
        assert_eq!(&mem.eeprom()[0x10..0x12], &[0xDE, 0xAD]);

        write(&mut e, &mut mem, &[0x02, 0x02, 0x00, 0x10]);
        assert_eq!(read(&mut e, &mut mem, 2), vec![0xDE, 0xAD]);
    }

    #[test]
    fn eeprom_write_past_end_nacks() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x02, 0x02, 0x01, 0xFF, 0x11, 0x22]);
        // The last cell is written, the byte after it is already refused
        assert_eq!(&r[4..], &[Response::Nack, Response::Nack]);
        assert_eq!(mem.eeprom()[0x1FF], 0x11);
        assert_eq!(e.address(), 0x200);
    }

    #[test]
    fn eeprom_write_starting_past_end_nacks() {
        let (mut e, mut mem) = setup();
        let r = write(&mut e, &mut mem, &[0x02, 0x02, 0x02, 0x00, 0x11]);
        assert_eq!(r[4], Response::Nack);
        assert!(mem.eeprom().iter().all(|b| *b == 0xFF));
    }

    #[test]
    #[should_panic(expected = "invalid chip info")]
    fn config_rejects_oversized_page() {
        let mut chip = ChipInfo::ATMEGA168;
        chip.page_size = 0xFF;
        let _ = DeviceConfig::new(chip, version_string("TWIBOOT"));
    }

    #[test]
    #[should_panic(expected = "invalid chip info")]
    fn config_rejects_empty_page() {
        let mut chip = ChipInfo::ATMEGA8;
        chip.page_size = 0;
        let _ = DeviceConfig::new(chip, version_string("TWIBOOT"));
    }

    #[test]
    fn buffered_eeprom_commits_at_stop() {
        let mut config = DeviceConfig::ATMEGA8;
        config.eeprom_mode = EepromMode::Buffered;
        let mut mem = RamTarget::new(&config.chip);
        let mut e = Engine::new(config);

        e.handle(TwiEvent::AddressedWrite, &mut mem);
        for b in [0x02, 0x02, 0x00, 0x20, 0x01, 0x02, 0x03].iter() {
            assert_eq!(e.handle(TwiEvent::Received(*b), &mut mem), Response::Ack);
        }
        assert_eq!(e.command(), Command::WriteEepromPage);
        assert_eq!(&mem.eeprom()[0x20..0x23], &[0xFF; 3]);

        e.handle(TwiEvent::Stop, &mut mem);
        assert_eq!(&mem.eeprom()[0x20..0x23], &[0x01, 0x02, 0x03]);
        assert_eq!(e.command(), Command::AccessEeprom);
    }
}
