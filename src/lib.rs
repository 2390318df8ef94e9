//! TWIBOOT, an I2C/TWI bootloader for AVR microcontrollers.
//!
//! Both ends of the protocol live here:
//!
//! - [`device`] and [`bootloader`] are the `no_std` firmware side: a byte-driven
//!   state machine for the TWI slave interrupt, the boot timeout and the
//!   handoff to the application.
//! - [`Twiboot`] (with `std`) is the host side, reading, writing and verifying
//!   flash and EEPROM over any `embedded-hal` blocking I2C bus, and
//!   [`Twiboot::linux`] opens a Linux `/dev/i2c-N` adapter.
//!
//! [`sim`] connects the two in memory for testing without hardware.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
#[macro_use]
extern crate log;

extern crate embedded_hal;
extern crate nb;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

pub mod bootloader;
pub mod chip;
pub mod device;
pub mod protocol;

#[cfg(feature = "std")]
mod host;
#[cfg(feature = "std")]
pub use host::{
    parse_address, parse_block_size, Error, MemoryImage, Operation, Options, ProgressCallback, Twiboot,
};

#[cfg(feature = "std")]
pub mod sim;

#[cfg(feature = "linux")]
pub mod linux;

pub use chip::ChipInfo;
pub use protocol::MemType;
