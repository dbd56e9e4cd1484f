//! Finding boards and opening them.

use crate::error::{DeviceSelectionError, Error, Result};
use crate::link::Link;
use crate::options::Options;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::debug;

/// What discovery reports about a board before it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub product: Option<String>,
}

/// A way of reaching boards: enumerating the ones present and connecting to
/// one of them.
pub trait Backend {
    /// Whatever the backend needs to connect to a board it enumerated.
    type Port;

    fn options(&self) -> &Options;

    /// Lists the boards currently reachable. The list is walked lazily.
    fn enumerate(&self) -> Result<impl Iterator<Item = (DeviceInfo, Self::Port)>>;

    /// Opens the transport to one enumerated board.
    fn connect(&self, port: Self::Port) -> Result<Link>;
}

static CLAIMED: Mutex<BTreeSet<String>> = parking_lot::const_mutex(BTreeSet::new());

/// Marks a serial number as open in this process until dropped.
#[derive(Debug)]
pub(crate) struct Claim(String);

impl Claim {
    pub(crate) fn acquire(serial: &str) -> Result<Claim, DeviceSelectionError> {
        if !CLAIMED.lock().insert(serial.to_owned()) {
            return Err(DeviceSelectionError::AlreadyInUse(serial.to_owned()));
        }
        debug!(serial, "claimed");
        Ok(Claim(serial.to_owned()))
    }

    pub(crate) fn serial(&self) -> &str {
        &self.0
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        CLAIMED.lock().remove(&self.0);
        debug!(serial = %self.0, "released");
    }
}

/// Lists the boards `backend` can reach.
pub fn discover<B: Backend>(backend: &B) -> Result<impl Iterator<Item = DeviceInfo> + '_> {
    Ok(backend.enumerate()?.map(|(info, _)| info))
}

/// Opens the first board `backend` reports.
pub async fn open<B: Backend>(backend: &B) -> Result<crate::Gallo> {
    let (info, port) = backend
        .enumerate()?
        .next()
        .ok_or(DeviceSelectionError::NotFound)?;
    crate::Gallo::connect(backend, info, port).await
}

/// Opens the one board whose serial number is `serial`.
///
/// Two boards sharing a serial number cannot be told apart, so that is
/// reported as [`DeviceSelectionError::Ambiguous`] rather than guessed.
pub async fn open_with_serial<B: Backend>(backend: &B, serial: &str) -> Result<crate::Gallo> {
    let mut matches = backend
        .enumerate()?
        .filter(|(info, _)| info.serial_number == serial);
    let (info, port) = matches.next().ok_or(DeviceSelectionError::NotFound)?;
    if matches.next().is_some() {
        return Err(Error::DeviceSelection(DeviceSelectionError::Ambiguous(
            serial.to_owned(),
        )));
    }
    drop(matches);
    crate::Gallo::connect(backend, info, port).await
}
