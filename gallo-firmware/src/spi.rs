//! SPI endpoint handlers.

use crate::bus::SpiBus;
use crate::i2c::take;
use gallo_proto::wire::{BusConfig, Failure, SpiReadRequest, SpiWriteReadRequest, SpiWriteRequest};

/// Clocks in `req.count` bytes. Unlike I2C, an empty SPI read is harmless and
/// simply returns nothing.
pub fn read<'b, S: SpiBus + ?Sized>(
    bus: &mut S,
    config: &BusConfig,
    req: &SpiReadRequest,
    buf: &'b mut [u8],
) -> Result<&'b [u8], Failure> {
    let data = take(buf, req.count)?;
    if data.is_empty() {
        return Ok(data);
    }
    bus.read(config, data).map_err(Failure::Bus)?;
    Ok(data)
}

pub fn write<S: SpiBus + ?Sized>(
    bus: &mut S,
    config: &BusConfig,
    req: &SpiWriteRequest<'_>,
) -> Result<(), Failure> {
    bus.write(config, req.contents).map_err(Failure::Bus)
}

/// Writes `req.contents`, then reads `req.count` bytes.
pub fn write_read<'b, S: SpiBus + ?Sized>(
    bus: &mut S,
    config: &BusConfig,
    req: &SpiWriteReadRequest<'_>,
    buf: &'b mut [u8],
) -> Result<&'b [u8], Failure> {
    let data = take(buf, req.count)?;
    bus.write(config, req.contents).map_err(Failure::Bus)?;
    if !data.is_empty() {
        bus.read(config, data).map_err(Failure::Bus)?;
    }
    Ok(data)
}

pub fn flush<S: SpiBus + ?Sized>(bus: &mut S, config: &BusConfig) -> Result<(), Failure> {
    bus.flush(config).map_err(Failure::Bus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gallo_proto::wire::{BusFault, DEFAULT_CONFIG};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Loop {
        sent: Vec<u8>,
        queued: VecDeque<u8>,
        flushes: usize,
        reads: usize,
    }

    impl SpiBus for Loop {
        fn read(&mut self, _: &BusConfig, buf: &mut [u8]) -> Result<(), BusFault> {
            self.reads += 1;
            for b in buf {
                *b = self.queued.pop_front().unwrap_or(0);
            }
            Ok(())
        }

        fn write(&mut self, _: &BusConfig, bytes: &[u8]) -> Result<(), BusFault> {
            self.sent.extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self, _: &BusConfig) -> Result<(), BusFault> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn write_then_read() {
        let mut bus = Loop {
            queued: [0xde, 0xad].into_iter().collect(),
            ..Default::default()
        };
        let mut buf = [0u8; 8];
        let req = SpiWriteReadRequest {
            contents: &[0x9f],
            count: 3,
        };
        let got = write_read(&mut bus, &DEFAULT_CONFIG, &req, &mut buf).unwrap();
        assert_eq!(got, &[0xde, 0xad, 0x00]);
        assert_eq!(bus.sent, vec![0x9f]);
        flush(&mut bus, &DEFAULT_CONFIG).unwrap();
        assert_eq!(bus.flushes, 1);
    }

    #[test]
    fn empty_read_skips_the_bus() {
        let mut bus = Loop::default();
        let mut buf = [0u8; 8];
        let got = read(&mut bus, &DEFAULT_CONFIG, &SpiReadRequest { count: 0 }, &mut buf).unwrap();
        assert!(got.is_empty());
        assert_eq!(bus.reads, 0);
    }

    #[test]
    fn oversize_read_is_refused() {
        let mut bus = Loop::default();
        let mut buf = [0u8; 8];
        assert_eq!(
            read(&mut bus, &DEFAULT_CONFIG, &SpiReadRequest { count: 9 }, &mut buf),
            Err(Failure::RequestTooLarge { max: 8 })
        );
        assert_eq!(bus.reads, 0);
    }
}
