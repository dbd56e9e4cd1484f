//! A simulated board, for exercising the host side without hardware.
//!
//! [`SimBoard`] implements [`Board`] on top of shared in-memory state, and
//! [`serve`] runs the real [`Dispatcher`] for it inside a tokio task. The
//! [`Sim`] handle returned alongside the board lets a test drive inputs and
//! inspect outputs while the task is running.
//!
//! The simulated peripherals are deliberately simple:
//!
//! * Each I2C device is a bank of 256 byte-wide registers behind an address
//!   pointer. A write sets the pointer from its first byte and stores any
//!   remaining bytes from there; reads return bytes from the pointer on.
//!   Both auto-increment. Addresses with no device do not acknowledge.
//! * SPI records everything written and answers reads from a queue, or
//!   with `0x00` once the queue is empty.
//! * A GPIO configured as input reads whatever level the test drives onto
//!   it; configured as output, it reads back its own latch.

use crate::bus::{Board, FlexPin, I2cBus, SpiBus};
use crate::dispatch::Dispatcher;
use crate::NUM_GPIOS;
use gallo_proto::frame::{Decoder, MAX_FRAME_SIZE};
use gallo_proto::wire::{BusConfig, BusFault, GpioState, DEFAULT_CONFIG};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// How often the serving task samples pins with an armed wait.
pub const POLL_PERIOD: Duration = Duration::from_millis(1);

const CHANNEL_DEPTH: usize = 64;

struct Device {
    registers: [u8; 256],
    pointer: u8,
    fault: Option<BusFault>,
}

#[derive(Clone, Copy)]
struct Gpio {
    output: bool,
    latch: GpioState,
    driven: GpioState,
}

struct State {
    devices: BTreeMap<u8, Device>,
    spi_queue: VecDeque<u8>,
    spi_written: Vec<u8>,
    pins: [Gpio; NUM_GPIOS],
    config: BusConfig,
    observed: Vec<BusConfig>,
    reboot: bool,
}

type Shared = Arc<Mutex<State>>;

pub struct SimI2c(Shared);

pub struct SimSpi(Shared);

pub struct SimPin {
    index: usize,
    state: Shared,
}

pub struct SimBoard {
    i2c: SimI2c,
    spi: SimSpi,
    pins: Vec<SimPin>,
}

/// Test-side handle onto a [`SimBoard`]'s state.
#[derive(Clone)]
pub struct Sim(Shared);

impl SimBoard {
    pub fn new() -> (SimBoard, Sim) {
        let pin = Gpio {
            output: false,
            latch: GpioState::Low,
            driven: GpioState::Low,
        };
        let state = Arc::new(Mutex::new(State {
            devices: BTreeMap::new(),
            spi_queue: VecDeque::new(),
            spi_written: Vec::new(),
            pins: [pin; NUM_GPIOS],
            config: DEFAULT_CONFIG,
            observed: Vec::new(),
            reboot: false,
        }));
        let board = SimBoard {
            i2c: SimI2c(state.clone()),
            spi: SimSpi(state.clone()),
            pins: (0..NUM_GPIOS)
                .map(|index| SimPin {
                    index,
                    state: state.clone(),
                })
                .collect(),
        };
        (board, Sim(state))
    }
}

impl Board for SimBoard {
    type I2c = SimI2c;
    type Spi = SimSpi;
    type Pin = SimPin;

    fn i2c(&mut self) -> &mut SimI2c {
        &mut self.i2c
    }

    fn spi(&mut self) -> &mut SimSpi {
        &mut self.spi
    }

    fn pin(&mut self, index: u8) -> Option<&mut SimPin> {
        self.pins.get_mut(usize::from(index))
    }

    fn configure(&mut self, config: &BusConfig) {
        self.i2c.0.lock().config = *config;
    }
}

impl State {
    fn device(&mut self, config: &BusConfig, address: u8) -> Result<&mut Device, BusFault> {
        self.observed.push(*config);
        let device = self.devices.get_mut(&address).ok_or(BusFault::AddressNack)?;
        match device.fault {
            Some(fault) => Err(fault),
            None => Ok(device),
        }
    }
}

impl Device {
    fn store(&mut self, bytes: &[u8]) {
        if let Some((&pointer, data)) = bytes.split_first() {
            self.pointer = pointer;
            for &b in data {
                self.registers[usize::from(self.pointer)] = b;
                self.pointer = self.pointer.wrapping_add(1);
            }
        }
    }

    fn load(&mut self, buf: &mut [u8]) {
        for b in buf {
            *b = self.registers[usize::from(self.pointer)];
            self.pointer = self.pointer.wrapping_add(1);
        }
    }
}

impl I2cBus for SimI2c {
    fn read(&mut self, config: &BusConfig, address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        self.0.lock().device(config, address)?.load(buf);
        Ok(())
    }

    fn write(&mut self, config: &BusConfig, address: u8, bytes: &[u8]) -> Result<(), BusFault> {
        self.0.lock().device(config, address)?.store(bytes);
        Ok(())
    }

    fn write_read(
        &mut self,
        config: &BusConfig,
        address: u8,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<(), BusFault> {
        let mut state = self.0.lock();
        let device = state.device(config, address)?;
        device.store(bytes);
        device.load(buf);
        Ok(())
    }
}

impl SpiBus for SimSpi {
    fn read(&mut self, config: &BusConfig, buf: &mut [u8]) -> Result<(), BusFault> {
        let mut state = self.0.lock();
        state.observed.push(*config);
        for b in buf {
            *b = state.spi_queue.pop_front().unwrap_or(0x00);
        }
        Ok(())
    }

    fn write(&mut self, config: &BusConfig, bytes: &[u8]) -> Result<(), BusFault> {
        let mut state = self.0.lock();
        state.observed.push(*config);
        state.spi_written.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self, _config: &BusConfig) -> Result<(), BusFault> {
        Ok(())
    }
}

impl FlexPin for SimPin {
    fn set_as_input(&mut self) {
        self.state.lock().pins[self.index].output = false;
    }

    fn set_as_output(&mut self) {
        self.state.lock().pins[self.index].output = true;
    }

    fn level(&mut self) -> Result<GpioState, BusFault> {
        let pin = self.state.lock().pins[self.index];
        Ok(if pin.output { pin.latch } else { pin.driven })
    }

    fn set_level(&mut self, state: GpioState) -> Result<(), BusFault> {
        self.state.lock().pins[self.index].latch = state;
        Ok(())
    }
}

impl Sim {
    /// Attaches a register device at `address`, with `registers` loaded from
    /// register 0 and the rest zeroed.
    pub fn add_i2c_device(&self, address: u8, registers: &[u8]) {
        let mut device = Device {
            registers: [0; 256],
            pointer: 0,
            fault: None,
        };
        let n = registers.len().min(256);
        device.registers[..n].copy_from_slice(&registers[..n]);
        self.0.lock().devices.insert(address, device);
    }

    pub fn remove_i2c_device(&self, address: u8) {
        self.0.lock().devices.remove(&address);
    }

    /// Makes every transaction with the device at `address` fail with
    /// `fault`, or succeed again with `None`.
    pub fn set_i2c_fault(&self, address: u8, fault: Option<BusFault>) {
        if let Some(device) = self.0.lock().devices.get_mut(&address) {
            device.fault = fault;
        }
    }

    /// Current contents of one register of the device at `address`.
    pub fn i2c_register(&self, address: u8, register: u8) -> Option<u8> {
        let state = self.0.lock();
        let device = state.devices.get(&address)?;
        Some(device.registers[usize::from(register)])
    }

    /// Drives `level` onto `pin` from outside the board.
    pub fn set_input(&self, pin: u8, level: GpioState) {
        if let Some(gpio) = self.0.lock().pins.get_mut(usize::from(pin)) {
            gpio.driven = level;
        }
    }

    /// Level the board drives on `pin`, or `None` while it is an input.
    pub fn output(&self, pin: u8) -> Option<GpioState> {
        let state = self.0.lock();
        let gpio = state.pins.get(usize::from(pin))?;
        gpio.output.then_some(gpio.latch)
    }

    pub fn queue_spi(&self, bytes: &[u8]) {
        self.0.lock().spi_queue.extend(bytes.iter().copied());
    }

    /// Takes everything written on SPI so far.
    pub fn spi_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().spi_written)
    }

    /// The configuration seen by every I2C and SPI transaction so far.
    pub fn observed_configs(&self) -> Vec<BusConfig> {
        self.0.lock().observed.clone()
    }

    /// The configuration most recently applied to the board.
    pub fn config(&self) -> BusConfig {
        self.0.lock().config
    }

    /// Simulates a board reset: the serving task cancels every outstanding
    /// wait on its next tick.
    pub fn reboot(&self) {
        self.0.lock().reboot = true;
    }

    fn take_reboot(&self) -> bool {
        std::mem::take(&mut self.0.lock().reboot)
    }
}

/// Serves `board` from a new tokio task and returns the host's ends of the
/// transport: a sender for request bytes and a receiver for reply frames.
///
/// Input may be split or merged into chunks arbitrarily. Each reply arrives
/// as one chunk holding one encoded frame. Dropping the sender stops the
/// task; dropping the receiver stops it at the next reply.
///
/// Must be called from within a tokio runtime.
pub fn serve(board: SimBoard) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
    let (to_board, mut from_host) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
    let (to_host, from_board) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
    let sim = Sim(board.i2c.0.clone());

    tokio::spawn(async move {
        let mut dispatcher = Dispatcher::new(board);
        let mut decoder = Decoder::<MAX_FRAME_SIZE>::new();
        let mut tick = tokio::time::interval(POLL_PERIOD);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut replies: Vec<Vec<u8>> = Vec::new();
            tokio::select! {
                chunk = from_host.recv() => {
                    let Some(chunk) = chunk else {
                        let dropped = dispatcher.reset(&mut |_| ());
                        debug!(dropped, "host went away, simulated board stopping");
                        return;
                    };
                    for byte in chunk {
                        match decoder.push(byte) {
                            Some(Ok(raw)) => dispatcher.handle(raw, &mut |f: &[u8]| replies.push(f.to_vec())),
                            Some(Err(e)) => warn!("discarding input: {}", e),
                            None => {}
                        }
                    }
                }
                _ = tick.tick() => {
                    if sim.take_reboot() {
                        let cancelled = dispatcher.reset(&mut |f: &[u8]| replies.push(f.to_vec()));
                        debug!(cancelled, "simulated board rebooted");
                    }
                    dispatcher.poll_waits(&mut |f: &[u8]| replies.push(f.to_vec()));
                }
            }

            for reply in replies {
                if to_host.send(reply).await.is_err() {
                    dispatcher.reset(&mut |_| ());
                    return;
                }
            }
        }
    });

    (to_board, from_board)
}
