use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use linux_embedded_hal::i2cdev::linux::LinuxI2CError;
use linux_embedded_hal::I2cdev;

use crate::{Error, Options, Twiboot};

/// i2c-dev ioctl constants
mod ioctl {
    use nix::ioctl_read_bad;
    use nix::libc::c_ulong;

    /// Adapter supports plain I2C-level commands
    pub const I2C_FUNC_I2C: c_ulong = 0x0000_0001;

    // I2C_FUNCS: get the adapter functionality mask
    ioctl_read_bad!(i2c_funcs, 0x0705, c_ulong);
}

impl Twiboot<I2cdev, LinuxI2CError> {
    /// Open a linux i2c-dev adapter and connect to the bootloader at `options.address`
    pub fn linux<P: AsRef<Path>>(path: P, options: Options) -> Result<Self, Error<LinuxI2CError>> {
        let path = path.as_ref();

        debug!("Opening i2c adapter {}", path.display());
        check_adapter(path)?;

        let i2c = I2cdev::new(path).map_err(|e| Error::DeviceUnreachable {
            stage: "open adapter",
            detail: format!("{}: {}", path.display(), e),
        })?;

        Self::open(i2c, options)
    }
}

/// Check the adapter can issue raw I2C transactions (not only SMBus)
fn check_adapter(path: &Path) -> Result<(), Error<LinuxI2CError>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::DeviceUnreachable {
            stage: "open adapter",
            detail: format!("{}: {}", path.display(), e),
        })?;

    let mut funcs: nix::libc::c_ulong = 0;
    // Safety: the fd is open for the duration of the call and funcs outlives it
    unsafe { ioctl::i2c_funcs(file.as_raw_fd(), &mut funcs) }.map_err(|e| {
        Error::DeviceUnreachable {
            stage: "query adapter",
            detail: format!("ioctl(I2C_FUNCS) on {}: {}", path.display(), e),
        }
    })?;

    debug!("Adapter functionality: 0x{:08x}", funcs);

    if funcs & ioctl::I2C_FUNC_I2C == 0 {
        error!("I2C_FUNC_I2C not supported on {}", path.display());
        return Err(Error::DeviceUnreachable {
            stage: "query adapter",
            detail: format!("I2C_FUNC_I2C not supported on {}", path.display()),
        });
    }

    Ok(())
}
