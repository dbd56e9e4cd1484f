use crate::{count, fill, Blocking, Error};
use embedded_hal::spi::{self, ErrorKind};
use gallo::Gallo;

/// The board's SPI bus.
///
/// The board is half-duplex: a transfer writes first and then reads, and
/// the bytes read come from the second half of the exchange.
pub struct Spi {
    gallo: Gallo,
    blocking: Blocking,
}

impl Spi {
    pub(crate) fn new(gallo: Gallo, blocking: Blocking) -> Self {
        Self { gallo, blocking }
    }
}

async fn read(gallo: &Gallo, words: &mut [u8]) -> Result<(), Error> {
    let data = gallo.spi_read(count(words)?).await?;
    fill(words, &data)
}

async fn transfer(gallo: &Gallo, read: &mut [u8], write: &[u8]) -> Result<(), Error> {
    let data = gallo.spi_write_read(write, count(read)?).await?;
    fill(read, &data)
}

async fn transfer_in_place(gallo: &Gallo, words: &mut [u8]) -> Result<(), Error> {
    let data = gallo.spi_write_read(words, count(words)?).await?;
    fill(words, &data)
}

impl spi::Error for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl spi::ErrorType for Spi {
    type Error = Error;
}

impl spi::SpiBus for Spi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.blocking.run(read(&self.gallo, words))
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        Ok(self.blocking.run(self.gallo.spi_write(words))?)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.blocking.run(transfer(&self.gallo, read, write))
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.blocking.run(transfer_in_place(&self.gallo, words))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(self.blocking.run(self.gallo.spi_flush())?)
    }
}

impl embedded_hal_async::spi::SpiBus for Spi {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        read(&self.gallo, words).await
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        Ok(self.gallo.spi_write(words).await?)
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        transfer(&self.gallo, read, write).await
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        transfer_in_place(&self.gallo, words).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(self.gallo.spi_flush().await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::simulated;
    use crate::Hal;
    use embedded_hal::spi::SpiBus as _;

    #[test]
    fn jedec_id() {
        let (backend, sim) = simulated("hal-spi");
        let hal = Hal::open_with(&backend, None).unwrap();
        let mut spi = hal.spi();

        sim.queue_spi(&[0xef, 0x40, 0x18]);
        let mut id = [0u8; 3];
        spi.transfer(&mut id, &[0x9f]).unwrap();
        assert_eq!(id, [0xef, 0x40, 0x18]);
        assert_eq!(sim.spi_written(), vec![0x9f]);

        sim.queue_spi(&[7, 8]);
        let mut words = [1u8, 2];
        spi.transfer_in_place(&mut words).unwrap();
        assert_eq!(words, [7, 8]);
        assert_eq!(sim.spi_written(), vec![1, 2]);

        spi.write(&[0xaa]).unwrap();
        spi.flush().unwrap();
        assert_eq!(sim.spi_written(), vec![0xaa]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_read() {
        let (backend, sim) = simulated("hal-spi-async");
        let hal = Hal::open_with(&backend, None).unwrap();
        let mut spi = hal.spi();

        sim.queue_spi(&[5, 6, 7]);
        let mut words = [0u8; 3];
        embedded_hal_async::spi::SpiBus::read(&mut spi, &mut words)
            .await
            .unwrap();
        assert_eq!(words, [5, 6, 7]);
    }
}
