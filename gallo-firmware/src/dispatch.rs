//! Request routing.
//!
//! [`Dispatcher::handle`] takes one raw frame, decodes it, runs the endpoint
//! and emits the reply through a callback. Requests with bounded latency are
//! answered before `handle` returns. GPIO waits are parked in a
//! [`WaitTable`] instead and answered later by [`Dispatcher::poll_waits`],
//! which the caller runs whenever it has no frame to process.

use crate::bus::{Board, FlexPin};
use crate::gpio::{self, ArmError, PendingWait, WaitState, WaitTable};
use crate::{i2c, spi, BUFFER_SIZE, NUM_GPIOS, VERSION};
use gallo_proto::frame::{decode_body, encode_body, Frame, MAX_FRAME_SIZE};
use gallo_proto::wire::{
    BusConfig, BusFault, Endpoint, Failure, GpioPinRequest, GpioPutRequest, I2cReadRequest,
    I2cWriteReadRequest, I2cWriteRequest, Reply, SpiReadRequest, SpiWriteReadRequest,
    SpiWriteRequest, DEFAULT_CONFIG,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Receives each encoded reply frame, terminator included.
pub type ReplyFn<'r> = dyn FnMut(&[u8]) + 'r;

// Result tag and length prefix on top of the largest data reply.
const BODY_SIZE: usize = BUFFER_SIZE + 8;

pub struct Dispatcher<B: Board> {
    board: B,
    config: BusConfig,
    waits: WaitTable,
    data: [u8; BUFFER_SIZE],
    body: [u8; BODY_SIZE],
    out: [u8; MAX_FRAME_SIZE],
}

fn request<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, Failure> {
    decode_body(body).map_err(|_| Failure::MalformedRequest)
}

/// Pins past [`NUM_GPIOS`] are refused even if the board has them.
fn gpio_pin<B: Board>(board: &mut B, pin: u8) -> Result<&mut B::Pin, Failure> {
    if usize::from(pin) >= NUM_GPIOS {
        return Err(Failure::InvalidPin(pin));
    }
    board.pin(pin).ok_or(Failure::InvalidPin(pin))
}

/// Encodes `value` as the reply to request `seq` and hands it to `reply`.
fn emit<T: Serialize>(
    body: &mut [u8],
    out: &mut [u8],
    seq: u16,
    endpoint: u8,
    value: &Reply<T>,
    reply: &mut ReplyFn<'_>,
) {
    let body = match encode_body(value, body) {
        Ok(body) => body,
        Err(e) => {
            warn!(seq, endpoint, "cannot encode reply: {}", e);
            return;
        }
    };
    let frame = Frame {
        seq,
        endpoint,
        body,
    };
    match frame.encode(out) {
        Ok(encoded) => reply(encoded),
        Err(e) => warn!(seq, endpoint, "cannot frame reply: {}", e),
    }
}

fn finish(
    body: &mut [u8],
    out: &mut [u8],
    wait: &PendingWait,
    state: WaitState,
    value: &Reply<()>,
    reply: &mut ReplyFn<'_>,
) {
    debug!(seq = wait.seq, endpoint = wait.endpoint, state = ?state, "wait finished");
    emit(body, out, wait.seq, wait.endpoint, value, reply);
}

impl<B: Board> Dispatcher<B> {
    /// Takes ownership of the board and programs it with [`DEFAULT_CONFIG`].
    pub fn new(mut board: B) -> Self {
        board.configure(&DEFAULT_CONFIG);
        Self {
            board,
            config: DEFAULT_CONFIG,
            waits: WaitTable::new(),
            data: [0; BUFFER_SIZE],
            body: [0; BODY_SIZE],
            out: [0; MAX_FRAME_SIZE],
        }
    }

    /// Handles one frame, as returned by a
    /// [`Decoder`](gallo_proto::frame::Decoder), and emits at most one reply
    /// for it. A wait request that parks emits nothing now; one that
    /// displaces another wait also emits the displaced wait's reply.
    pub fn handle(&mut self, raw: &mut [u8], reply: &mut ReplyFn<'_>) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping malformed frame: {}", e);
                return;
            }
        };
        let seq = frame.seq;
        let id = frame.endpoint;
        let body = frame.body;

        let Self {
            board,
            config,
            waits,
            data,
            body: body_buf,
            out,
        } = self;

        let endpoint = match Endpoint::from_id(id) {
            Some(endpoint) => endpoint,
            None => {
                warn!(seq, endpoint = id, "unsupported endpoint");
                let value: Reply<()> = Err(Failure::UnsupportedEndpoint(id));
                return emit(body_buf, out, seq, id, &value, reply);
            }
        };
        trace!(seq, %endpoint, len = body.len(), "request");

        match endpoint {
            Endpoint::Ping => {
                let value: Reply<u32> = request(body);
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::Version => {
                let value = request::<()>(body).map(|()| VERSION);
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::SetConfig => {
                let value = request::<BusConfig>(body).and_then(|new| {
                    new.validate().map_err(Failure::Config)?;
                    board.configure(&new);
                    *config = new;
                    debug!(config = ?new, "configuration applied");
                    Ok(())
                });
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::I2cRead => {
                let value = match request::<I2cReadRequest>(body) {
                    Ok(req) => i2c::read(board.i2c(), config, &req, data),
                    Err(failure) => Err(failure),
                };
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::I2cWrite => {
                let value = request::<I2cWriteRequest>(body)
                    .and_then(|req| i2c::write(board.i2c(), config, &req));
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::I2cWriteRead => {
                let value = match request::<I2cWriteReadRequest>(body) {
                    Ok(req) => i2c::write_read(board.i2c(), config, &req, data),
                    Err(failure) => Err(failure),
                };
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::SpiRead => {
                let value = match request::<SpiReadRequest>(body) {
                    Ok(req) => spi::read(board.spi(), config, &req, data),
                    Err(failure) => Err(failure),
                };
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::SpiWrite => {
                let value = request::<SpiWriteRequest>(body)
                    .and_then(|req| spi::write(board.spi(), config, &req));
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::SpiWriteRead => {
                let value = match request::<SpiWriteReadRequest>(body) {
                    Ok(req) => spi::write_read(board.spi(), config, &req, data),
                    Err(failure) => Err(failure),
                };
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::SpiFlush => {
                let value = request::<()>(body).and_then(|()| spi::flush(board.spi(), config));
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::GpioGet => {
                let value = request::<GpioPinRequest>(body).and_then(|req| {
                    if let Some(wait) = waits.supersede(req.pin) {
                        finish(body_buf, out, &wait, WaitState::Superseded, &Err(Failure::WaitSuperseded), reply);
                    }
                    let pin = gpio_pin(board, req.pin)?;
                    gpio::get(pin)
                });
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::GpioPut => {
                let value = request::<GpioPutRequest>(body).and_then(|req| {
                    if let Some(wait) = waits.supersede(req.pin) {
                        finish(body_buf, out, &wait, WaitState::Superseded, &Err(Failure::WaitSuperseded), reply);
                    }
                    let pin = gpio_pin(board, req.pin)?;
                    gpio::put(pin, &req)
                });
                emit(body_buf, out, seq, id, &value, reply);
            }
            Endpoint::GpioWaitForHigh
            | Endpoint::GpioWaitForLow
            | Endpoint::GpioWaitForRising
            | Endpoint::GpioWaitForFalling
            | Endpoint::GpioWaitForAny => {
                let armed = request::<GpioPinRequest>(body).and_then(|req| {
                    let pin = gpio_pin(board, req.pin)?;
                    let level = gpio::get(pin)?;
                    Ok((req.pin, level))
                });
                let (pin, level) = match armed {
                    Ok(armed) => armed,
                    Err(failure) => {
                        let value: Reply<()> = Err(failure);
                        return emit(body_buf, out, seq, id, &value, reply);
                    }
                };
                // Every endpoint in this arm has a condition.
                let condition = match endpoint.wait_condition() {
                    Some(condition) => condition,
                    None => return,
                };
                let wait = PendingWait {
                    seq,
                    endpoint: id,
                    condition,
                    last: level,
                };
                match waits.arm(pin, wait) {
                    Err(ArmError::Conflict(previous)) => {
                        warn!(seq, pin, previous = previous.seq, "wait conflict");
                        finish(body_buf, out, &previous, WaitState::Superseded, &Err(Failure::WaitSuperseded), reply);
                        let value: Reply<()> = Err(Failure::WaitConflict(pin));
                        emit(body_buf, out, seq, id, &value, reply);
                    }
                    Err(ArmError::NoSuchPin) => {
                        let value: Reply<()> = Err(Failure::InvalidPin(pin));
                        emit(body_buf, out, seq, id, &value, reply);
                    }
                    Ok(()) if condition.satisfied(level, level) => {
                        waits.supersede(pin);
                        finish(body_buf, out, &wait, WaitState::Resolved, &Ok(()), reply);
                    }
                    Ok(()) => {
                        debug!(seq, pin, condition = ?condition, state = ?WaitState::Armed, "wait armed");
                    }
                }
            }
        }
    }

    /// Samples every pin with an armed wait and answers the waits whose
    /// condition now holds. A pin that cannot be read ends its wait with the
    /// bus fault.
    pub fn poll_waits(&mut self, reply: &mut ReplyFn<'_>) {
        let Self {
            board,
            waits,
            body,
            out,
            ..
        } = self;
        for pin in 0..NUM_GPIOS as u8 {
            if !waits.is_armed(pin) {
                continue;
            }
            let level = match board.pin(pin) {
                Some(p) => p.level(),
                None => Err(BusFault::Other),
            };
            match level {
                Ok(level) => {
                    if let Some(wait) = waits.sample(pin, level) {
                        finish(body, out, &wait, WaitState::Resolved, &Ok(()), reply);
                    }
                }
                Err(fault) => {
                    if let Some(wait) = waits.supersede(pin) {
                        warn!(seq = wait.seq, pin, "pin read failed while waiting: {}", fault);
                        finish(body, out, &wait, WaitState::Resolved, &Err(Failure::Bus(fault)), reply);
                    }
                }
            }
        }
    }

    /// Returns the board to its power-up state: every outstanding wait is
    /// answered with [`Failure::WaitCancelled`] and [`DEFAULT_CONFIG`] is
    /// reapplied. Returns the number of waits cancelled.
    ///
    /// When the host has already gone away, pass a `reply` that discards
    /// its input.
    pub fn reset(&mut self, reply: &mut ReplyFn<'_>) -> usize {
        let Self {
            board,
            config,
            waits,
            body,
            out,
            ..
        } = self;
        let cancelled = waits.cancel_all(|_, wait| {
            finish(body, out, &wait, WaitState::Cancelled, &Err(Failure::WaitCancelled), reply);
        });
        board.configure(&DEFAULT_CONFIG);
        *config = DEFAULT_CONFIG;
        if cancelled > 0 {
            debug!(cancelled, "reset cancelled outstanding waits");
        }
        cancelled
    }

    /// Configuration currently in effect.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// Number of waits still armed.
    pub fn pending_waits(&self) -> usize {
        self.waits.len()
    }

    pub fn is_waiting(&self, pin: u8) -> bool {
        self.waits.is_armed(pin)
    }

    pub fn release(self) -> B {
        self.board
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{I2cBus, SpiBus};
    use gallo_proto::wire::{ConfigFault, GpioState, SpiPhase, SpiPolarity, VersionInfo};

    #[derive(Default)]
    struct Eeprom {
        cells: [u8; 4],
    }

    impl I2cBus for Eeprom {
        fn read(&mut self, _: &BusConfig, address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
            match address {
                0x50 => {
                    buf.copy_from_slice(&self.cells[..buf.len()]);
                    Ok(())
                }
                0x51 => Err(BusFault::Timeout),
                _ => Err(BusFault::AddressNack),
            }
        }

        fn write(&mut self, _: &BusConfig, address: u8, bytes: &[u8]) -> Result<(), BusFault> {
            if address != 0x50 {
                return Err(BusFault::AddressNack);
            }
            self.cells[..bytes.len()].copy_from_slice(bytes);
            Ok(())
        }

        fn write_read(&mut self, config: &BusConfig, address: u8, _: &[u8], buf: &mut [u8]) -> Result<(), BusFault> {
            self.read(config, address, buf)
        }
    }

    #[derive(Default)]
    struct Shift {
        seen: Vec<(u8, Vec<u8>)>,
    }

    impl SpiBus for Shift {
        fn read(&mut self, _: &BusConfig, buf: &mut [u8]) -> Result<(), BusFault> {
            buf.fill(0x5a);
            Ok(())
        }

        fn write(&mut self, config: &BusConfig, bytes: &[u8]) -> Result<(), BusFault> {
            self.seen.push((config.spi_mode(), bytes.to_vec()));
            Ok(())
        }

        fn flush(&mut self, _: &BusConfig) -> Result<(), BusFault> {
            Ok(())
        }
    }

    #[derive(Default, Clone, Copy)]
    struct Pin {
        level: Option<GpioState>,
        broken: bool,
    }

    impl FlexPin for Pin {
        fn set_as_input(&mut self) {}

        fn set_as_output(&mut self) {}

        fn level(&mut self) -> Result<GpioState, BusFault> {
            if self.broken {
                return Err(BusFault::Other);
            }
            Ok(self.level.unwrap_or(GpioState::Low))
        }

        fn set_level(&mut self, state: GpioState) -> Result<(), BusFault> {
            self.level = Some(state);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestBoard {
        i2c: Eeprom,
        spi: Shift,
        // More pins than the protocol addresses.
        pins: [Pin; NUM_GPIOS + 2],
        configured: Vec<BusConfig>,
    }

    impl Board for TestBoard {
        type I2c = Eeprom;
        type Spi = Shift;
        type Pin = Pin;

        fn i2c(&mut self) -> &mut Eeprom {
            &mut self.i2c
        }

        fn spi(&mut self) -> &mut Shift {
            &mut self.spi
        }

        fn pin(&mut self, index: u8) -> Option<&mut Pin> {
            self.pins.get_mut(usize::from(index))
        }

        fn configure(&mut self, config: &BusConfig) {
            self.configured.push(*config);
        }
    }

    type Replies = Vec<(u16, u8, Vec<u8>)>;

    fn collect(replies: &mut Replies) -> impl FnMut(&[u8]) + '_ {
        move |encoded: &[u8]| {
            let mut raw = encoded[..encoded.len() - 1].to_vec();
            let frame = Frame::decode(&mut raw).unwrap();
            replies.push((frame.seq, frame.endpoint, frame.body.to_vec()));
        }
    }

    fn call<T: Serialize>(d: &mut Dispatcher<TestBoard>, seq: u16, endpoint: u8, req: &T) -> Replies {
        let mut body = [0u8; 600];
        let body = encode_body(req, &mut body).unwrap();
        let mut out = [0u8; MAX_FRAME_SIZE];
        let len = Frame { seq, endpoint, body }.encode(&mut out).unwrap().len();
        let mut replies = Vec::new();
        d.handle(&mut out[..len - 1], &mut collect(&mut replies));
        replies
    }

    fn poll(d: &mut Dispatcher<TestBoard>) -> Replies {
        let mut replies = Vec::new();
        d.poll_waits(&mut collect(&mut replies));
        replies
    }

    fn reply<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Reply<T> {
        decode_body(body).unwrap()
    }

    fn pin(n: u8) -> GpioPinRequest {
        GpioPinRequest { pin: n }
    }

    #[test]
    fn every_bounded_request_gets_exactly_one_reply() {
        let mut d = Dispatcher::new(TestBoard::default());
        let r = call(&mut d, 1, Endpoint::Ping.id(), &0xfeed_u32);
        assert_eq!(r.len(), 1);
        assert_eq!((r[0].0, r[0].1), (1, Endpoint::Ping.id()));
        assert_eq!(reply::<u32>(&r[0].2), Ok(0xfeed));

        let r = call(&mut d, 2, Endpoint::Version.id(), &());
        assert_eq!(r.len(), 1);
        let v: Reply<VersionInfo> = reply(&r[0].2);
        assert_eq!(v, Ok(VERSION));

        let r = call(&mut d, 3, Endpoint::SpiFlush.id(), &());
        assert_eq!(reply::<()>(&r[0].2), Ok(()));
    }

    #[test]
    fn unknown_endpoint_fails_only_that_request() {
        let mut d = Dispatcher::new(TestBoard::default());
        let r = call(&mut d, 7, 0x7e, &());
        assert_eq!(r.len(), 1);
        assert_eq!((r[0].0, r[0].1), (7, 0x7e));
        assert_eq!(reply::<()>(&r[0].2), Err(Failure::UnsupportedEndpoint(0x7e)));

        let r = call(&mut d, 8, Endpoint::Ping.id(), &1u32);
        assert_eq!(reply::<u32>(&r[0].2), Ok(1));
    }

    #[test]
    fn malformed_body_is_reported() {
        let mut d = Dispatcher::new(TestBoard::default());
        let r = call(&mut d, 4, Endpoint::GpioPut.id(), &());
        assert_eq!(reply::<()>(&r[0].2), Err(Failure::MalformedRequest));
    }

    #[test]
    fn garbage_frame_is_dropped() {
        let mut d = Dispatcher::new(TestBoard::default());
        let mut replies = Vec::new();
        d.handle(&mut [0x05, 0x01], &mut collect(&mut replies));
        assert!(replies.is_empty());
    }

    #[test]
    fn i2c_round_trip_through_dispatch() {
        let mut d = Dispatcher::new(TestBoard::default());
        let r = call(
            &mut d,
            1,
            Endpoint::I2cWrite.id(),
            &I2cWriteRequest {
                address: 0x50,
                contents: &[1, 2, 3, 4],
            },
        );
        assert_eq!(reply::<()>(&r[0].2), Ok(()));

        let r = call(&mut d, 2, Endpoint::I2cRead.id(), &I2cReadRequest { address: 0x50, count: 4 });
        assert_eq!(reply::<&[u8]>(&r[0].2), Ok(&[1u8, 2, 3, 4][..]));

        let r = call(&mut d, 3, Endpoint::I2cRead.id(), &I2cReadRequest { address: 0x10, count: 1 });
        assert_eq!(reply::<&[u8]>(&r[0].2), Err(Failure::Bus(BusFault::AddressNack)));

        let r = call(&mut d, 4, Endpoint::I2cRead.id(), &I2cReadRequest { address: 0x51, count: 1 });
        assert_eq!(reply::<&[u8]>(&r[0].2), Err(Failure::Bus(BusFault::Timeout)));

        let r = call(
            &mut d,
            5,
            Endpoint::I2cRead.id(),
            &I2cReadRequest {
                address: 0x50,
                count: BUFFER_SIZE as u16 + 1,
            },
        );
        assert_eq!(
            reply::<&[u8]>(&r[0].2),
            Err(Failure::RequestTooLarge {
                max: BUFFER_SIZE as u16
            })
        );
    }

    #[test]
    fn set_config_is_all_or_nothing() {
        let mut d = Dispatcher::new(TestBoard::default());
        let bad = BusConfig {
            i2c_frequency: 400_000,
            spi_frequency: 0,
            ..DEFAULT_CONFIG
        };
        let r = call(&mut d, 1, Endpoint::SetConfig.id(), &bad);
        assert_eq!(reply::<()>(&r[0].2), Err(Failure::Config(ConfigFault::SpiFrequency(0))));
        assert_eq!(d.config(), &DEFAULT_CONFIG);
        assert_eq!(d.board().configured, vec![DEFAULT_CONFIG]);

        let good = BusConfig {
            i2c_frequency: 400_000,
            spi_frequency: 8_000_000,
            spi_phase: SpiPhase::CaptureOnSecondTransition,
            spi_polarity: SpiPolarity::IdleHigh,
        };
        let r = call(&mut d, 2, Endpoint::SetConfig.id(), &good);
        assert_eq!(reply::<()>(&r[0].2), Ok(()));
        assert_eq!(d.config(), &good);

        call(&mut d, 3, Endpoint::SpiWrite.id(), &SpiWriteRequest { contents: &[0xaa] });
        assert_eq!(d.board().spi.seen, vec![(3, vec![0xaa])]);
    }

    #[test]
    fn edge_wait_parks_until_the_edge() {
        let mut d = Dispatcher::new(TestBoard::default());
        let r = call(&mut d, 10, Endpoint::GpioWaitForRising.id(), &pin(3));
        assert!(r.is_empty());
        assert!(d.is_waiting(3));

        // Unrelated traffic is still answered.
        let r = call(&mut d, 11, Endpoint::Ping.id(), &5u32);
        assert_eq!(r.len(), 1);

        assert!(poll(&mut d).is_empty());
        d.board_mut().pins[3].level = Some(GpioState::High);
        let r = poll(&mut d);
        assert_eq!(r.len(), 1);
        assert_eq!((r[0].0, r[0].1), (10, Endpoint::GpioWaitForRising.id()));
        assert_eq!(reply::<()>(&r[0].2), Ok(()));
        assert_eq!(d.pending_waits(), 0);
        assert!(poll(&mut d).is_empty());
    }

    #[test]
    fn satisfied_level_wait_answers_at_once() {
        let mut d = Dispatcher::new(TestBoard::default());
        let r = call(&mut d, 1, Endpoint::GpioWaitForLow.id(), &pin(0));
        assert_eq!(r.len(), 1);
        assert_eq!(reply::<()>(&r[0].2), Ok(()));
        assert_eq!(d.pending_waits(), 0);
    }

    #[test]
    fn second_wait_conflicts_and_supersedes_the_first() {
        let mut d = Dispatcher::new(TestBoard::default());
        assert!(call(&mut d, 1, Endpoint::GpioWaitForHigh.id(), &pin(5)).is_empty());

        let r = call(&mut d, 2, Endpoint::GpioWaitForAny.id(), &pin(5));
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].0, 1);
        assert_eq!(reply::<()>(&r[0].2), Err(Failure::WaitSuperseded));
        assert_eq!(r[1].0, 2);
        assert_eq!(reply::<()>(&r[1].2), Err(Failure::WaitConflict(5)));
        assert_eq!(d.pending_waits(), 0);
    }

    #[test]
    fn get_on_a_waiting_pin_supersedes_the_wait() {
        let mut d = Dispatcher::new(TestBoard::default());
        assert!(call(&mut d, 1, Endpoint::GpioWaitForHigh.id(), &pin(2)).is_empty());
        let r = call(&mut d, 2, Endpoint::GpioGet.id(), &pin(2));
        assert_eq!(r.len(), 2);
        assert_eq!((r[0].0, reply::<()>(&r[0].2)), (1, Err(Failure::WaitSuperseded)));
        assert_eq!((r[1].0, reply::<GpioState>(&r[1].2)), (2, Ok(GpioState::Low)));
    }

    #[test]
    fn invalid_pin() {
        let mut d = Dispatcher::new(TestBoard::default());
        let r = call(&mut d, 1, Endpoint::GpioWaitForAny.id(), &pin(8));
        assert_eq!(reply::<()>(&r[0].2), Err(Failure::InvalidPin(8)));
        let r = call(
            &mut d,
            2,
            Endpoint::GpioPut.id(),
            &GpioPutRequest {
                pin: 9,
                state: GpioState::High,
            },
        );
        assert_eq!(reply::<()>(&r[0].2), Err(Failure::InvalidPin(9)));
        let r = call(&mut d, 3, Endpoint::GpioGet.id(), &pin(9));
        assert_eq!(reply::<GpioState>(&r[0].2), Err(Failure::InvalidPin(9)));
        assert_eq!(d.pending_waits(), 0);
    }

    #[test]
    fn unreadable_pin_ends_the_wait() {
        let mut d = Dispatcher::new(TestBoard::default());
        assert!(call(&mut d, 1, Endpoint::GpioWaitForHigh.id(), &pin(4)).is_empty());
        d.board_mut().pins[4].broken = true;
        let r = poll(&mut d);
        assert_eq!(reply::<()>(&r[0].2), Err(Failure::Bus(BusFault::Other)));
        assert_eq!(d.pending_waits(), 0);
    }

    #[test]
    fn reset_cancels_waits_and_restores_defaults() {
        let mut d = Dispatcher::new(TestBoard::default());
        let fast = BusConfig {
            i2c_frequency: 1_000_000,
            ..DEFAULT_CONFIG
        };
        call(&mut d, 1, Endpoint::SetConfig.id(), &fast);
        assert!(call(&mut d, 2, Endpoint::GpioWaitForHigh.id(), &pin(0)).is_empty());
        assert!(call(&mut d, 3, Endpoint::GpioWaitForFalling.id(), &pin(1)).is_empty());

        let mut replies = Vec::new();
        assert_eq!(d.reset(&mut collect(&mut replies)), 2);
        assert_eq!(replies.len(), 2);
        for (_, _, body) in &replies {
            assert_eq!(reply::<()>(body), Err(Failure::WaitCancelled));
        }
        assert_eq!(d.config(), &DEFAULT_CONFIG);
        assert_eq!(d.reset(&mut |_| ()), 0);
    }
}
