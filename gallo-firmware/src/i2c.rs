//! I2C endpoint handlers.

use crate::bus::I2cBus;
use gallo_proto::wire::{
    BusConfig, Failure, I2cReadRequest, I2cWriteReadRequest, I2cWriteRequest, MAX_I2C_ADDRESS,
};

fn check_address(address: u8) -> Result<(), Failure> {
    if address > MAX_I2C_ADDRESS {
        return Err(Failure::InvalidAddress(address));
    }
    Ok(())
}

/// Carves the first `count` bytes out of `buf`, or refuses the request if
/// they would not fit.
pub(crate) fn take(buf: &mut [u8], count: u16) -> Result<&mut [u8], Failure> {
    let count = usize::from(count);
    if count > buf.len() {
        return Err(Failure::RequestTooLarge {
            max: buf.len() as u16,
        });
    }
    Ok(&mut buf[..count])
}

/// Reads `req.count` bytes into the front of `buf` and returns them.
///
/// A zero-length read has no meaning on the wire (it would be an address
/// probe with no data phase), so it is rejected as malformed.
pub fn read<'b, I: I2cBus + ?Sized>(
    bus: &mut I,
    config: &BusConfig,
    req: &I2cReadRequest,
    buf: &'b mut [u8],
) -> Result<&'b [u8], Failure> {
    check_address(req.address)?;
    if req.count == 0 {
        return Err(Failure::MalformedRequest);
    }
    let data = take(buf, req.count)?;
    bus.read(config, req.address, data).map_err(Failure::Bus)?;
    Ok(data)
}

pub fn write<I: I2cBus + ?Sized>(
    bus: &mut I,
    config: &BusConfig,
    req: &I2cWriteRequest<'_>,
) -> Result<(), Failure> {
    check_address(req.address)?;
    bus.write(config, req.address, req.contents)
        .map_err(Failure::Bus)
}

pub fn write_read<'b, I: I2cBus + ?Sized>(
    bus: &mut I,
    config: &BusConfig,
    req: &I2cWriteReadRequest<'_>,
    buf: &'b mut [u8],
) -> Result<&'b [u8], Failure> {
    check_address(req.address)?;
    let data = take(buf, req.count)?;
    bus.write_read(config, req.address, req.contents, data)
        .map_err(Failure::Bus)?;
    Ok(data)
}
