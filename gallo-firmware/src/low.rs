use embedded_hal_old::serial;

/// The host link failed underneath the server.
///
/// Frame and request problems never show up here; those are answered on the
/// wire. Only the serial objects' own errors are passed up.
#[derive(Debug)]
pub enum Error<TXErr, RXErr> {
    /// Sending a reply byte failed.
    Write(TXErr),

    /// Receiving a request byte failed.
    Read(RXErr),
}

impl<TXErr, RXErr> Error<TXErr, RXErr> {
    fn tx(got: TXErr) -> Self {
        Error::Write(got)
    }

    fn rx(got: RXErr) -> Self {
        Error::Read(got)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Channel<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    pub tx: TX,
    pub rx: RX,
}

impl<TX, RX, TXErr, RXErr> Channel<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    pub fn new(tx: TX, rx: RX) -> Self {
        Self { tx, rx }
    }

    /// Returns the next received byte, or `None` if nothing is waiting.
    pub fn try_read(&mut self) -> Result<Option<u8>, Error<TXErr, RXErr>> {
        match self.rx.read() {
            Ok(c) => Ok(Some(c)),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(err)) => Err(Error::rx(err)),
        }
    }

    pub fn write(&mut self, c: u8) -> Result<(), Error<TXErr, RXErr>> {
        nb::block!(self.tx.write(c)).map_err(Error::tx)
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        for &c in bytes {
            self.write(c)?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        nb::block!(self.tx.flush()).map_err(Error::tx)
    }

    /// Throws away whatever the host sent that has not been read yet.
    pub fn eat_rx_buffer(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        while self.try_read()?.is_some() {}
        Ok(())
    }

    pub fn release(self) -> (TX, RX) {
        (self.tx, self.rx)
    }
}
