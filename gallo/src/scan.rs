use std::fmt;

/// Number of 7-bit I2C addresses.
pub const ADDRESS_COUNT: usize = 128;

/// Whether `address` falls in one of the ranges the I2C specification
/// reserves, 0x00-0x07 and 0x78-0x7f.
pub fn is_reserved(address: u8) -> bool {
    matches!(address, 0x00..=0x07 | 0x78..=0x7f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStatus {
    /// The probe was not acknowledged.
    Absent,
    /// The probe was acknowledged.
    Present,
    /// Reserved and not probed.
    Reserved,
}

/// Outcome of probing every 7-bit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    statuses: [AddressStatus; ADDRESS_COUNT],
}

impl ScanResult {
    pub(crate) fn new(statuses: [AddressStatus; ADDRESS_COUNT]) -> Self {
        Self { statuses }
    }

    /// Status of one address; addresses past 0x7f are `Absent`.
    pub fn status(&self, address: u8) -> AddressStatus {
        self.statuses
            .get(usize::from(address))
            .copied()
            .unwrap_or(AddressStatus::Absent)
    }

    /// Addresses that acknowledged, in ascending order.
    pub fn present(&self) -> impl Iterator<Item = u8> + '_ {
        (0..ADDRESS_COUNT as u8).filter(|&a| self.status(a) == AddressStatus::Present)
    }
}

/// Renders the familiar 16-column grid: the address where a device answered,
/// `--` where none did and `RR` for reserved addresses that were skipped.
impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "   ")?;
        for col in 0..16 {
            write!(f, " {:x} ", col)?;
        }
        for address in 0..ADDRESS_COUNT as u8 {
            if address % 16 == 0 {
                write!(f, "\n{:x} ", address >> 4)?;
            }
            match self.status(address) {
                AddressStatus::Present => write!(f, " {:02x}", address)?,
                AddressStatus::Absent => write!(f, " --")?,
                AddressStatus::Reserved => write!(f, " RR")?,
            }
        }
        writeln!(f)
    }
}
