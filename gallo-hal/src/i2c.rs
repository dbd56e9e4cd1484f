use crate::{length, Blocking, Error};
use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation, SevenBitAddress};
use gallo::{BusError, Gallo};

/// The board's I2C bus, as an `embedded-hal` controller.
///
/// The board runs at most a write and then a read, with a repeated start
/// between them, in one transaction. Adjacent operations of the same kind
/// are merged, so any transaction made of writes followed by reads runs
/// as one. One that writes after reading fails with
/// [`Error::UnsupportedTransaction`] before anything reaches the bus.
pub struct I2c {
    gallo: Gallo,
    blocking: Blocking,
}

impl I2c {
    pub(crate) fn new(gallo: Gallo, blocking: Blocking) -> Self {
        Self { gallo, blocking }
    }
}

async fn transaction(
    gallo: &Gallo,
    address: SevenBitAddress,
    operations: &mut [Operation<'_>],
) -> Result<(), Error> {
    let split = operations
        .iter()
        .take_while(|op| matches!(op, Operation::Write(_)))
        .count();
    let (writes, reads) = operations.split_at_mut(split);

    let mut contents = Vec::new();
    for op in writes.iter() {
        if let Operation::Write(bytes) = op {
            contents.extend_from_slice(bytes);
        }
    }
    let mut total = 0;
    for op in reads.iter() {
        match op {
            Operation::Read(buf) => total += buf.len(),
            Operation::Write(_) => return Err(Error::UnsupportedTransaction),
        }
    }

    let data = match (writes.is_empty(), reads.is_empty()) {
        (true, true) => return Ok(()),
        (false, true) => return Ok(gallo.i2c_write(address, &contents).await?),
        (true, false) => gallo.i2c_read(address, length(total)?).await?,
        (false, false) => {
            gallo
                .i2c_write_read(address, &contents, length(total)?)
                .await?
        }
    };
    fill_reads(reads, &data)
}

fn fill_reads(reads: &mut [Operation<'_>], data: &[u8]) -> Result<(), Error> {
    let total: usize = reads
        .iter()
        .map(|op| match op {
            Operation::Read(buf) => buf.len(),
            Operation::Write(_) => 0,
        })
        .sum();
    if data.len() != total {
        return Err(gallo::Error::from(gallo::ProtocolError::MalformedResponse).into());
    }
    let mut rest = data;
    for op in reads.iter_mut() {
        if let Operation::Read(buf) = op {
            let (head, tail) = rest.split_at(buf.len());
            buf.copy_from_slice(head);
            rest = tail;
        }
    }
    Ok(())
}

impl i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self.inner() {
            Some(gallo::Error::Bus(BusError::AddressNack)) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            Some(gallo::Error::Bus(BusError::DataNack)) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
            }
            Some(gallo::Error::Bus(BusError::ArbitrationLoss)) => ErrorKind::ArbitrationLoss,
            Some(gallo::Error::Bus(BusError::Bus)) => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

impl i2c::ErrorType for I2c {
    type Error = Error;
}

impl i2c::I2c<SevenBitAddress> for I2c {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.blocking.run(transaction(&self.gallo, address, operations))
    }
}

impl embedded_hal_async::i2c::I2c<SevenBitAddress> for I2c {
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        transaction(&self.gallo, address, operations).await
    }
}
