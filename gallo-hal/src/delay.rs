use std::time::Duration;

/// Delays measured on the host.
///
/// Host scheduling makes these at least as long as asked, often longer;
/// drivers that need tight timing will not work through the board.
#[derive(Debug, Clone, Copy, Default)]
pub struct Delay;

impl embedded_hal::delay::DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns.into()))
    }
}

impl embedded_hal_async::delay::DelayNs for Delay {
    async fn delay_ns(&mut self, ns: u32) {
        tokio::time::sleep(Duration::from_nanos(ns.into())).await
    }
}
