//! Main loop over a serial-style transport.

use crate::bus::Board;
use crate::dispatch::Dispatcher;
use crate::low::{Channel, Error};
use core::convert::Infallible;
use embedded_hal_old::serial;
use gallo_proto::frame::{Decoder, MAX_FRAME_SIZE};
use tracing::warn;

/// `Server` owns the transport, the frame decoder and the [`Dispatcher`].
///
/// The transport's `read` must never block: the server relies on
/// `WouldBlock` to know when to go and sample the pins that have a wait
/// armed.
pub struct Server<TX, RX, B>
where
    TX: serial::Write<u8>,
    RX: serial::Read<u8>,
    B: Board,
{
    ch: Channel<TX, RX>,
    dispatcher: Dispatcher<B>,
    decoder: Decoder<MAX_FRAME_SIZE>,
}

/// Writes one reply frame unless an earlier write in the same poll failed.
fn send<TX, RX, TXErr, RXErr>(
    ch: &mut Channel<TX, RX>,
    failed: &mut Option<Error<TXErr, RXErr>>,
    frame: &[u8],
) where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    if failed.is_none() {
        if let Err(e) = ch.write_all(frame) {
            *failed = Some(e);
        }
    }
}

impl<TX, RX, TXErr, RXErr, B> Server<TX, RX, B>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
    B: Board,
{
    pub fn new(tx: TX, rx: RX, board: B) -> Self {
        Self {
            ch: Channel::new(tx, rx),
            dispatcher: Dispatcher::new(board),
            decoder: Decoder::new(),
        }
    }

    /// Reads input until one frame is complete or nothing more is waiting,
    /// handles that frame, then polls the outstanding waits.
    ///
    /// Returns `true` if a frame was handled.
    pub fn poll(&mut self) -> Result<bool, Error<TXErr, RXErr>> {
        let Self {
            ch,
            dispatcher,
            decoder,
        } = self;
        let mut failed = None;
        let mut handled = false;

        while let Some(byte) = ch.try_read()? {
            match decoder.push(byte) {
                None => continue,
                Some(Ok(raw)) => {
                    dispatcher.handle(raw, &mut |frame: &[u8]| send(&mut *ch, &mut failed, frame));
                    handled = true;
                    break;
                }
                Some(Err(e)) => warn!("discarding input: {}", e),
            }
        }
        dispatcher.poll_waits(&mut |frame: &[u8]| send(&mut *ch, &mut failed, frame));

        match failed {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    /// Polls until the transport fails.
    pub fn run(&mut self) -> Result<Infallible, Error<TXErr, RXErr>> {
        loop {
            self.poll()?;
        }
    }

    /// Forgets the session after the host went away: outstanding waits are
    /// dropped without replies, the configuration returns to its default,
    /// and any half-received frame and unread input are discarded.
    pub fn disconnected(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.dispatcher.reset(&mut |_| ());
        self.decoder.reset();
        self.ch.eat_rx_buffer()
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<B> {
        &mut self.dispatcher
    }

    pub fn release(self) -> (TX, RX, B) {
        let (tx, rx) = self.ch.release();
        (tx, rx, self.dispatcher.release())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{FlexPin, I2cBus, SpiBus};
    use gallo_proto::frame::{decode_body, encode_body, Frame};
    use gallo_proto::wire::{
        BusConfig, BusFault, Endpoint, Failure, GpioPinRequest, GpioState, I2cReadRequest, Reply,
    };
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Rx {
        input: VecDeque<u8>,
    }

    impl serial::Read<u8> for Rx {
        type Error = Infallible;

        fn read(&mut self) -> nb::Result<u8, Infallible> {
            self.input.pop_front().ok_or(nb::Error::WouldBlock)
        }
    }

    #[derive(Default)]
    struct Tx {
        output: Vec<u8>,
        broken: bool,
    }

    impl serial::Write<u8> for Tx {
        type Error = ();

        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            if self.broken {
                return Err(nb::Error::Other(()));
            }
            self.output.push(word);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    struct Nothing;

    impl I2cBus for Nothing {
        fn read(&mut self, _: &BusConfig, _: u8, _: &mut [u8]) -> Result<(), BusFault> {
            Err(BusFault::AddressNack)
        }

        fn write(&mut self, _: &BusConfig, _: u8, _: &[u8]) -> Result<(), BusFault> {
            Err(BusFault::AddressNack)
        }

        fn write_read(&mut self, _: &BusConfig, _: u8, _: &[u8], _: &mut [u8]) -> Result<(), BusFault> {
            Err(BusFault::AddressNack)
        }
    }

    impl SpiBus for Nothing {
        fn read(&mut self, _: &BusConfig, _: &mut [u8]) -> Result<(), BusFault> {
            Ok(())
        }

        fn write(&mut self, _: &BusConfig, _: &[u8]) -> Result<(), BusFault> {
            Ok(())
        }

        fn flush(&mut self, _: &BusConfig) -> Result<(), BusFault> {
            Ok(())
        }
    }

    struct Level(GpioState);

    impl FlexPin for Level {
        fn set_as_input(&mut self) {}

        fn set_as_output(&mut self) {}

        fn level(&mut self) -> Result<GpioState, BusFault> {
            Ok(self.0)
        }

        fn set_level(&mut self, state: GpioState) -> Result<(), BusFault> {
            self.0 = state;
            Ok(())
        }
    }

    struct Bench {
        i2c: Nothing,
        spi: Nothing,
        pin: Level,
    }

    impl Board for Bench {
        type I2c = Nothing;
        type Spi = Nothing;
        type Pin = Level;

        fn i2c(&mut self) -> &mut Nothing {
            &mut self.i2c
        }

        fn spi(&mut self) -> &mut Nothing {
            &mut self.spi
        }

        fn pin(&mut self, index: u8) -> Option<&mut Level> {
            if index == 0 {
                Some(&mut self.pin)
            } else {
                None
            }
        }

        fn configure(&mut self, _: &BusConfig) {}
    }

    fn server() -> Server<Tx, Rx, Bench> {
        let bench = Bench {
            i2c: Nothing,
            spi: Nothing,
            pin: Level(GpioState::Low),
        };
        Server::new(Tx::default(), Rx::default(), bench)
    }

    fn queue<T: serde::Serialize>(s: &mut Server<Tx, Rx, Bench>, seq: u16, endpoint: Endpoint, req: &T) {
        let mut body = [0u8; 64];
        let body = encode_body(req, &mut body).unwrap();
        let mut out = [0u8; 128];
        let frame = Frame {
            seq,
            endpoint: endpoint.id(),
            body,
        };
        s.ch.rx.input.extend(frame.encode(&mut out).unwrap().iter());
    }

    /// Splits everything written so far into `(seq, reply body)` pairs.
    fn drain(s: &mut Server<Tx, Rx, Bench>) -> Vec<(u16, Vec<u8>)> {
        let output = std::mem::take(&mut s.ch.tx.output);
        output
            .split(|&b| b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| {
                let mut raw = chunk.to_vec();
                let frame = Frame::decode(&mut raw).unwrap();
                (frame.seq, frame.body.to_vec())
            })
            .collect()
    }

    #[test]
    fn handles_one_frame_per_poll() {
        let mut s = server();
        queue(&mut s, 1, Endpoint::Ping, &10u32);
        queue(&mut s, 2, Endpoint::Ping, &20u32);

        assert!(s.poll().unwrap());
        assert!(s.poll().unwrap());
        assert!(!s.poll().unwrap());

        let replies = drain(&mut s);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].0, 1);
        assert_eq!(decode_body::<Reply<u32>>(&replies[1].1).unwrap(), Ok(20));
    }

    #[test]
    fn waits_resolve_between_frames() {
        let mut s = server();
        queue(&mut s, 5, Endpoint::GpioWaitForHigh, &GpioPinRequest { pin: 0 });
        s.poll().unwrap();
        assert!(drain(&mut s).is_empty());

        queue(
            &mut s,
            6,
            Endpoint::I2cRead,
            &I2cReadRequest {
                address: 0x10,
                count: 1,
            },
        );
        s.poll().unwrap();
        let replies = drain(&mut s);
        assert_eq!(replies.len(), 1);
        assert_eq!(
            decode_body::<Reply<Vec<u8>>>(&replies[0].1).unwrap(),
            Err(Failure::Bus(BusFault::AddressNack))
        );

        s.dispatcher_mut().board_mut().pin.0 = GpioState::High;
        assert!(!s.poll().unwrap());
        let replies = drain(&mut s);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, 5);
        assert_eq!(decode_body::<Reply<()>>(&replies[0].1).unwrap(), Ok(()));
    }

    #[test]
    fn disconnect_drops_waits_and_input() {
        let mut s = server();
        queue(&mut s, 1, Endpoint::GpioWaitForRising, &GpioPinRequest { pin: 0 });
        s.poll().unwrap();
        assert_eq!(s.dispatcher().pending_waits(), 1);

        s.ch.rx.input.extend([0x11, 0x22, 0x33]);
        s.disconnected().unwrap();
        assert_eq!(s.dispatcher().pending_waits(), 0);
        assert!(s.ch.rx.input.is_empty());
        assert!(drain(&mut s).is_empty());
    }

    #[test]
    fn write_failure_is_reported() {
        let mut s = server();
        s.ch.tx.broken = true;
        queue(&mut s, 1, Endpoint::Ping, &1u32);
        assert!(matches!(s.poll(), Err(Error::Write(()))));
    }
}
