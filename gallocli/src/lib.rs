//! Command-line front end for a Gallo board.
//!
//! Each invocation opens the board, runs one command and exits. Results go
//! to the writer passed to [`Cli::run`]; failures come back as errors, with
//! the library's classification in the message.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gallo::{Backend, BusConfig, Gallo, GpioState, SerialBackend, SpiPhase, SpiPolarity, UsbBackend};
use std::io::Write;
use std::num::ParseIntError;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "gallo",
    about = "Access I2C, SPI and GPIO through a Gallo bridge board",
    arg_required_else_help = true,
    version
)]
pub struct Cli {
    /// Serial number of the board to open; the first one found otherwise
    #[arg(short, long, env = "GALLO_SERIAL_NUMBER")]
    pub serial_number: Option<String>,

    /// Reach the board through this serial port instead of USB
    #[arg(long, conflicts_with = "serial_number")]
    pub port: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the firmware version
    Version,

    /// Check that the board answers
    Ping {
        /// Value for the board to echo
        #[arg(default_value_t = 0)]
        id: u32,
    },

    /// I2C access
    I2c {
        #[command(subcommand)]
        command: I2cCommand,
    },

    /// SPI access
    Spi {
        #[command(subcommand)]
        command: SpiCommand,
    },

    /// GPIO access
    Gpio {
        #[command(subcommand)]
        command: GpioCommand,
    },

    /// Replace the bus configuration
    SetConfig {
        /// I2C clock in Hz
        #[arg(short, long, default_value_t = gallo::DEFAULT_CONFIG.i2c_frequency)]
        i2c_frequency: u32,

        /// SPI clock in Hz
        #[arg(short, long, default_value_t = gallo::DEFAULT_CONFIG.spi_frequency)]
        spi_frequency: u32,

        /// SPI clock edge on which data is captured
        #[arg(short = 'p', long, value_enum, default_value_t = Phase::First)]
        spi_phase: Phase,

        /// SPI clock level between transfers
        #[arg(short = 'o', long, value_enum, default_value_t = Polarity::IdleLow)]
        spi_polarity: Polarity,
    },
}

#[derive(Subcommand, Debug)]
pub enum I2cCommand {
    /// Probe every address and print a map of those that answer
    Scan {
        /// Probe reserved addresses too
        #[arg(short, long)]
        reserved: bool,
    },

    /// Read from a device
    Read {
        /// Device address
        #[arg(short, long, value_parser = parse_byte)]
        address: u8,

        /// Number of bytes to read
        #[arg(short, long)]
        count: u16,
    },

    /// Write to a device
    Write {
        /// Device address
        #[arg(short, long, value_parser = parse_byte)]
        address: u8,

        /// Bytes to write
        #[arg(short, long, num_args = 1.., required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,
    },

    /// Write to a device, then read back after a repeated start
    WriteRead {
        /// Device address
        #[arg(short, long, value_parser = parse_byte)]
        address: u8,

        /// Bytes to write
        #[arg(short, long, num_args = 1.., required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,

        /// Number of bytes to read
        #[arg(short, long)]
        count: u16,
    },
}

#[derive(Subcommand, Debug)]
pub enum SpiCommand {
    /// Read bytes
    Read {
        #[arg(short, long)]
        count: u16,
    },

    /// Write bytes
    Write {
        #[arg(short, long, num_args = 1.., required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,
    },

    /// Write bytes, then read
    WriteRead {
        #[arg(short, long, num_args = 1.., required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,

        #[arg(short, long)]
        count: u16,
    },

    /// Wait for written data to leave the board
    Flush,
}

#[derive(Subcommand, Debug)]
pub enum GpioCommand {
    /// Read a pin
    Get {
        #[arg(short, long)]
        pin: u8,
    },

    /// Drive a pin
    Put {
        #[arg(short, long)]
        pin: u8,

        #[arg(short, long, value_enum)]
        level: Level,
    },

    /// Block until a pin reaches a level or sees an edge
    Wait {
        #[arg(short, long)]
        pin: u8,

        #[arg(short, long, value_enum)]
        event: Event,

        /// Give up after this many milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<Level> for GpioState {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => GpioState::Low,
            Level::High => GpioState::High,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    High,
    Low,
    Rising,
    Falling,
    Any,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Capture on the first clock transition
    First,
    /// Capture on the second clock transition
    Second,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    IdleLow,
    IdleHigh,
}

impl Cli {
    /// Runs the command against a board reached over USB, or over the
    /// serial port named by `--port`.
    pub async fn execute(&self, out: &mut impl Write) -> Result<()> {
        match &self.port {
            Some(path) => self.run(&SerialBackend::new(path.as_str()), out).await,
            None => self.run(&UsbBackend::default(), out).await,
        }
    }

    /// Runs the command against a board found through `backend`.
    pub async fn run<B: Backend>(&self, backend: &B, out: &mut impl Write) -> Result<()> {
        let board = match (&self.serial_number, &self.port) {
            (Some(serial), _) => gallo::open_with_serial(backend, serial)
                .await
                .with_context(|| format!("cannot open board {}", serial))?,
            (None, Some(path)) => gallo::open_with_serial(backend, path)
                .await
                .with_context(|| format!("cannot open board on {}", path))?,
            (None, None) => gallo::open(backend).await.context("cannot open board")?,
        };
        debug!(serial = board.serial_number(), "running {:?}", self.command);

        match &self.command {
            Command::Version => {
                writeln!(out, "{}", board.version().await?)?;
            }
            Command::Ping { id } => {
                let start = Instant::now();
                let echoed = board.ping(*id).await?;
                anyhow::ensure!(echoed == *id, "board echoed {} for {}", echoed, id);
                writeln!(out, "pong {} in {:?}", echoed, start.elapsed())?;
            }
            Command::I2c { command } => i2c(&board, command, out).await?,
            Command::Spi { command } => spi(&board, command, out).await?,
            Command::Gpio { command } => gpio(&board, command, out).await?,
            Command::SetConfig {
                i2c_frequency,
                spi_frequency,
                spi_phase,
                spi_polarity,
            } => {
                let config = BusConfig {
                    i2c_frequency: *i2c_frequency,
                    spi_frequency: *spi_frequency,
                    spi_phase: match spi_phase {
                        Phase::First => SpiPhase::CaptureOnFirstTransition,
                        Phase::Second => SpiPhase::CaptureOnSecondTransition,
                    },
                    spi_polarity: match spi_polarity {
                        Polarity::IdleLow => SpiPolarity::IdleLow,
                        Polarity::IdleHigh => SpiPolarity::IdleHigh,
                    },
                };
                board.set_config(config).await?;
            }
        }
        Ok(())
    }
}

async fn i2c(board: &Gallo, command: &I2cCommand, out: &mut impl Write) -> Result<()> {
    match command {
        I2cCommand::Scan { reserved } => {
            let scan = board.i2c_scan(*reserved).await?;
            write!(out, "{}", scan)?;
        }
        I2cCommand::Read { address, count } => {
            let data = board
                .i2c_read(*address, *count)
                .await
                .with_context(|| format!("reading from {:#04x}", address))?;
            hex_dump(out, &data)?;
        }
        I2cCommand::Write { address, bytes } => {
            board
                .i2c_write(*address, bytes)
                .await
                .with_context(|| format!("writing to {:#04x}", address))?;
        }
        I2cCommand::WriteRead {
            address,
            bytes,
            count,
        } => {
            let data = board
                .i2c_write_read(*address, bytes, *count)
                .await
                .with_context(|| format!("write-read with {:#04x}", address))?;
            hex_dump(out, &data)?;
        }
    }
    Ok(())
}

async fn spi(board: &Gallo, command: &SpiCommand, out: &mut impl Write) -> Result<()> {
    match command {
        SpiCommand::Read { count } => hex_dump(out, &board.spi_read(*count).await?)?,
        SpiCommand::Write { bytes } => board.spi_write(bytes).await?,
        SpiCommand::WriteRead { bytes, count } => {
            hex_dump(out, &board.spi_write_read(bytes, *count).await?)?
        }
        SpiCommand::Flush => board.spi_flush().await?,
    }
    Ok(())
}

async fn gpio(board: &Gallo, command: &GpioCommand, out: &mut impl Write) -> Result<()> {
    match command {
        GpioCommand::Get { pin } => {
            let level = board.gpio_get(*pin).await?;
            writeln!(out, "{}", if level.is_high() { "high" } else { "low" })?;
        }
        GpioCommand::Put { pin, level } => board.gpio_put(*pin, (*level).into()).await?,
        GpioCommand::Wait {
            pin,
            event,
            timeout,
        } => {
            let wait = async {
                match event {
                    Event::High => board.gpio_wait_for_high(*pin).await,
                    Event::Low => board.gpio_wait_for_low(*pin).await,
                    Event::Rising => board.gpio_wait_for_rising_edge(*pin).await,
                    Event::Falling => board.gpio_wait_for_falling_edge(*pin).await,
                    Event::Any => board.gpio_wait_for_any_edge(*pin).await,
                }
            };
            match timeout {
                Some(ms) => tokio::time::timeout(Duration::from_millis(*ms), wait)
                    .await
                    .with_context(|| format!("pin {} did not change within {} ms", pin, ms))??,
                None => wait.await?,
            }
        }
    }
    Ok(())
}

/// Writes `data` as hex, sixteen bytes to a line.
pub fn hex_dump(out: &mut impl Write, data: &[u8]) -> std::io::Result<()> {
    for (i, b) in data.iter().enumerate() {
        if i > 0 && i % 16 == 0 {
            writeln!(out)?;
        }
        write!(out, "{:02x} ", b)?;
    }
    writeln!(out)
}

/// Parses a byte written in hex (`0x2a`), binary (`0b101010`) or decimal.
pub fn parse_byte(s: &str) -> Result<u8, ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u8::from_str_radix(bin, 2)
    } else {
        s.parse()
    }
}
