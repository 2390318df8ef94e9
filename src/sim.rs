//! In-memory bootloader simulation.
//!
//! [`SimulatedBus`] implements the blocking I2C traits by running every host
//! transaction through a real [`Engine`] backed by a [`RamTarget`], so the host
//! driver can be exercised without hardware.

use embedded_hal::blocking::i2c::{Read, Write};

use crate::chip::ChipInfo;
use crate::device::{BootState, DeviceConfig, Engine, Response, TargetMemory, TwiEvent};
use crate::protocol::ERASED;

/// Flash and EEPROM contents of a simulated device.
#[derive(Clone, Debug)]
pub struct RamTarget {
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    page_commits: usize,
}

impl RamTarget {
    /// Create an erased target, flash covers the application and bootloader sections
    pub fn new(chip: &ChipInfo) -> Self {
        let flash_size = (chip.flash_end as usize).next_power_of_two();
        Self {
            flash: vec![ERASED; flash_size],
            eeprom: vec![ERASED; chip.eeprom_size as usize],
            page_commits: 0,
        }
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    pub fn eeprom(&self) -> &[u8] {
        &self.eeprom
    }

    pub fn eeprom_mut(&mut self) -> &mut [u8] {
        &mut self.eeprom
    }

    /// Number of flash page erase/program cycles so far
    pub fn page_commits(&self) -> usize {
        self.page_commits
    }
}

impl TargetMemory for RamTarget {
    fn read_flash(&mut self, address: u16) -> u8 {
        self.flash.get(address as usize).copied().unwrap_or(ERASED)
    }

    fn read_eeprom(&mut self, address: u16) -> u8 {
        self.eeprom.get(address as usize).copied().unwrap_or(ERASED)
    }

    fn write_eeprom(&mut self, address: u16, value: u8) {
        if let Some(cell) = self.eeprom.get_mut(address as usize) {
            *cell = value;
        }
    }

    fn program_flash_page(&mut self, address: u16, data: &[u8]) {
        let start = address as usize;
        let end = (start + data.len()).min(self.flash.len());
        let page = &mut self.flash[start..end];

        for b in page.iter_mut() {
            *b = ERASED;
        }
        page.copy_from_slice(&data[..end - start]);

        self.page_commits += 1;
    }
}

/// Errors seen by the bus master of a simulated bus.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// Nobody acknowledged the address
    #[error("address 0x{0:02x} not acknowledged")]
    AddressNack(u8),
    /// Data byte at this index was answered with NACK
    #[error("data byte {0} not acknowledged")]
    DataNack(usize),
    /// Injected failure
    #[error("bus fault")]
    Fault,
}

/// Simulated two-wire bus with a single TWIBOOT device attached.
pub struct SimulatedBus {
    address: u8,
    engine: Engine,
    target: RamTarget,
    write_transactions: usize,
    read_transactions: usize,
    fail_after: Option<usize>,
}

impl SimulatedBus {
    pub fn new(config: DeviceConfig, address: u8) -> Self {
        let target = RamTarget::new(&config.chip);
        Self {
            address,
            engine: Engine::new(config),
            target,
            write_transactions: 0,
            read_transactions: 0,
            fail_after: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn target(&self) -> &RamTarget {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut RamTarget {
        &mut self.target
    }

    /// Advance the device boot timer by one period
    pub fn tick(&mut self) -> BootState {
        self.engine.tick()
    }

    /// Number of master write (SLA+W) transactions seen
    pub fn write_transactions(&self) -> usize {
        self.write_transactions
    }

    /// Number of master read (SLA+R) transactions seen
    pub fn read_transactions(&self) -> usize {
        self.read_transactions
    }

    /// Fail every transaction once `count` more have completed
    pub fn fail_after(&mut self, count: usize) {
        self.fail_after = Some(count);
    }

    fn select(&mut self, address: u8) -> Result<(), SimError> {
        match self.fail_after {
            Some(0) => return Err(SimError::Fault),
            Some(n) => self.fail_after = Some(n - 1),
            None => (),
        }

        // The application does not answer on the bootloader's behalf
        if address != self.address || self.engine.state() == BootState::ApplicationActive {
            return Err(SimError::AddressNack(address));
        }
        Ok(())
    }
}

impl Write for SimulatedBus {
    type Error = SimError;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.select(address)?;
        self.write_transactions += 1;

        let mut ack = self.engine.handle(TwiEvent::AddressedWrite, &mut self.target) == Response::Ack;

        for (i, b) in bytes.iter().enumerate() {
            if !ack {
                self.engine.handle(TwiEvent::ReceivedAfterNack, &mut self.target);
                return Err(SimError::DataNack(i));
            }
            ack = self.engine.handle(TwiEvent::Received(*b), &mut self.target) == Response::Ack;
        }

        self.engine.handle(TwiEvent::Stop, &mut self.target);
        Ok(())
    }
}

impl Read for SimulatedBus {
    type Error = SimError;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.select(address)?;
        self.read_transactions += 1;

        for i in 0..buffer.len() {
            let event = if i == 0 {
                TwiEvent::AddressedRead
            } else {
                TwiEvent::ReadRequested
            };
            buffer[i] = match self.engine.handle(event, &mut self.target) {
                Response::Transmit(b) => b,
                _ => return Err(SimError::Fault),
            };
        }

        self.engine.handle(TwiEvent::ReadDone, &mut self.target);
        Ok(())
    }
}
