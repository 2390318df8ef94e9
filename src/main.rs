#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fmt::Debug;
use std::fs;
use std::io::Write as _;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use embedded_hal::blocking::i2c::{Read, Write};
use indicatif::{ProgressBar, ProgressStyle};

use twiboot::device::DeviceConfig;
use twiboot::sim::SimulatedBus;
use twiboot::{MemType, MemoryImage, Options, ProgressCallback, Twiboot};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// I2C adapter to connect to
    #[structopt(short = "d", long, default_value = "/dev/i2c-0")]
    device: String,

    #[structopt(flatten)]
    options: Options,

    /// Read memory to a file (.bin, or `-` for stdout), <flash|eeprom>:<file>
    #[structopt(short = "r", long, number_of_values = 1)]
    read: Vec<Action>,

    /// Write a binary file to memory, <flash|eeprom>:<file>
    #[structopt(short = "w", long, number_of_values = 1)]
    write: Vec<Action>,

    /// Disable verify after write
    #[structopt(short = "n", long)]
    no_verify: bool,

    /// Disable progress bars
    #[structopt(long)]
    no_progress: bool,

    /// Talk to a simulated device instead of hardware (atmega8, atmega88, atmega168)
    #[structopt(long)]
    simulate: Option<String>,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Memory and file for a single read or write
#[derive(Clone, Debug)]
pub struct Action {
    memtype: MemType,
    file: String,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mem, file) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid argument: '{}'", s))?;

        if file.is_empty() {
            return Err(format!("invalid argument: '{}'", s));
        }

        Ok(Self {
            memtype: mem.parse()?,
            file: file.to_string(),
        })
    }
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let res = match &o.simulate {
        Some(name) => simulated(name, &o),
        None => hardware(&o),
    };

    if let Err(e) = res {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn hardware(o: &Args) -> anyhow::Result<()> {
    info!(
        "Connecting to bootloader at {} (address: 0x{:02x})",
        o.device, o.options.address
    );

    let t = Twiboot::linux(&o.device, o.options.clone()).map_err(|e| anyhow!("{}", e))?;
    run(t, o)
}

fn simulated(name: &str, o: &Args) -> anyhow::Result<()> {
    let config =
        DeviceConfig::by_name(name).ok_or_else(|| anyhow!("unknown device profile '{}'", name))?;

    info!("Connecting to simulated {} bootloader", config.chip.name());

    let bus = SimulatedBus::new(config, o.options.address);
    let t = Twiboot::open(bus, o.options.clone()).map_err(|e| anyhow!("{}", e))?;
    run(t, o)
}

/// Run the requested actions, always returning the device to its application
fn run<I, E>(mut t: Twiboot<I, E>, o: &Args) -> anyhow::Result<()>
where
    I: Read<Error = E> + Write<Error = E>,
    E: Debug,
{
    let chip = *t.chip_info();
    info!(
        "version    : {:<16} (sig: {:02x?} => {})",
        t.version(),
        chip.signature,
        chip.name()
    );
    info!(
        "flash size : 0x{:04x} / {:5} (0x{:02x} bytes/page)",
        chip.flash_end, chip.flash_end, chip.page_size
    );
    info!(
        "eeprom size: 0x{:04x} / {:5}",
        chip.eeprom_size, chip.eeprom_size
    );

    if !o.no_progress {
        t.set_progress(Some(progress_bar()));
    }

    let res = execute(&mut t, o);

    t.close();

    res
}

fn execute<I, E>(t: &mut Twiboot<I, E>, o: &Args) -> anyhow::Result<()>
where
    I: Read<Error = E> + Write<Error = E>,
    E: Debug,
{
    for a in &o.read {
        let size = t.get_memsize(a.memtype);
        let image = t
            .read(a.memtype, size)
            .map_err(|e| anyhow!("failed to read from device: {}", e))?;

        write_file(&a.file, &image.data)
            .with_context(|| format!("failed to write file '{}'", a.file))?;

        info!(
            "Read {} of {} to '{}'",
            bytefmt::format(size as u64),
            a.memtype,
            a.file
        );
    }

    for a in &o.write {
        let data =
            fs::read(&a.file).with_context(|| format!("failed to read file '{}'", a.file))?;
        let image = MemoryImage::new(data);

        t.write(a.memtype, &image)
            .map_err(|e| anyhow!("failed to write to device: {}", e))?;

        if !o.no_verify {
            t.verify(a.memtype, &image)
                .map_err(|e| anyhow!("failed to verify: {}", e))?;
        }

        info!(
            "Wrote {} from '{}' to {}",
            bytefmt::format(image.len() as u64),
            a.file,
            a.memtype
        );
    }

    Ok(())
}

fn write_file(name: &str, data: &[u8]) -> std::io::Result<()> {
    if name == "-" {
        let mut out = std::io::stdout();
        out.write_all(data)?;
        out.flush()
    } else {
        fs::write(name, data)
    }
}

/// Render the driver's progress reports as one bar per operation
fn progress_bar() -> ProgressCallback {
    let mut bar: Option<ProgressBar> = None;

    Box::new(move |label: &str, pos: i64, total: i64| {
        if pos < 0 {
            if let Some(b) = bar.take() {
                b.abandon();
            }
            return;
        }

        let b = bar.get_or_insert_with(|| {
            let b = ProgressBar::new(total as u64);
            b.set_style(
                ProgressStyle::default_bar()
                    .template("{msg:15}: [{bar:50}] ({pos}/{len})")
                    .progress_chars("*  "),
            );
            b.set_message(label);
            b
        });
        b.set_position(pos as u64);

        if pos >= total {
            if let Some(b) = bar.take() {
                b.finish();
            }
        }
    })
}
