use gallo_proto::frame::MAX_FRAME_SIZE;
use gallo_proto::wire::{PRODUCT_ID, VENDOR_ID};
use std::time::Duration;

/// Knobs for finding and talking to a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// USB vendor id to match during discovery.
    pub vendor_id: u16,
    /// USB product id to match during discovery.
    pub product_id: u16,
    /// Chunks buffered in each direction between the transport and the
    /// correlation table.
    pub channel_depth: usize,
    /// Length requested by each USB bulk IN transfer.
    pub transfer_size: usize,
    /// How long the version handshake on open may take.
    pub handshake_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            channel_depth: 16,
            transfer_size: MAX_FRAME_SIZE,
            handshake_timeout: Duration::from_secs(2),
        }
    }
}
