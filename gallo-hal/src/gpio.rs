use crate::{Blocking, Error};
use embedded_hal::digital::{self, ErrorKind};
use gallo::{Gallo, GpioState};

/// One of the board's GPIOs.
///
/// Reading a pin makes it an input; driving it makes it an output. Only one
/// wait may be pending per pin: waiting again while one is pending, from
/// this handle or another, fails with
/// [`ProtocolError::WaitConflict`](gallo::ProtocolError::WaitConflict) and
/// ends the earlier wait with [`gallo::Error::Cancelled`]. Reading or
/// driving the pin also ends its wait.
///
/// Dropping a wait future before it resolves withdraws the wait on the
/// board, so racing one against a timeout leaves the pin free for the next
/// wait.
pub struct Gpio {
    pin: u8,
    gallo: Gallo,
    blocking: Blocking,
}

impl Gpio {
    pub(crate) fn new(pin: u8, gallo: Gallo, blocking: Blocking) -> Self {
        Self {
            pin,
            gallo,
            blocking,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    fn put(&mut self, state: GpioState) -> Result<(), Error> {
        Ok(self.blocking.run(self.gallo.gpio_put(self.pin, state))?)
    }

    fn get(&mut self) -> Result<GpioState, Error> {
        Ok(self.blocking.run(self.gallo.gpio_get(self.pin))?)
    }
}

impl digital::Error for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl digital::ErrorType for Gpio {
    type Error = Error;
}

impl digital::OutputPin for Gpio {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.put(GpioState::Low)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.put(GpioState::High)
    }
}

impl digital::InputPin for Gpio {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.get()?.is_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.get()?.is_high())
    }
}

impl embedded_hal_async::digital::Wait for Gpio {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        Ok(self.gallo.gpio_wait_for_high(self.pin).await?)
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        Ok(self.gallo.gpio_wait_for_low(self.pin).await?)
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        Ok(self.gallo.gpio_wait_for_rising_edge(self.pin).await?)
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        Ok(self.gallo.gpio_wait_for_falling_edge(self.pin).await?)
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        Ok(self.gallo.gpio_wait_for_any_edge(self.pin).await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::simulated;
    use crate::Hal;
    use embedded_hal::digital::{InputPin, OutputPin};
    use embedded_hal_async::digital::Wait;
    use gallo::GpioState;
    use std::time::Duration;

    #[test]
    fn drive_and_sense() {
        let (backend, sim) = simulated("hal-gpio");
        let hal = Hal::open_with(&backend, None).unwrap();

        let mut led = hal.gpio(0);
        led.set_high().unwrap();
        assert_eq!(sim.output(0), Some(GpioState::High));
        led.set_low().unwrap();
        assert_eq!(sim.output(0), Some(GpioState::Low));

        let mut button = hal.gpio(1);
        assert!(button.is_low().unwrap());
        sim.set_input(1, GpioState::High);
        assert!(button.is_high().unwrap());
    }

    #[test]
    fn pins_past_the_last_are_rejected() {
        let (backend, _sim) = simulated("hal-gpio-range");
        let hal = Hal::open_with(&backend, None).unwrap();
        let err = hal.gpio(8).is_high().unwrap_err();
        assert_eq!(
            err.inner(),
            Some(&gallo::Error::Protocol(gallo::ProtocolError::InvalidPin(8)))
        );
    }

    #[tokio::test]
    async fn wait_for_rising_edge() {
        let (backend, sim) = simulated("hal-gpio-wait");
        let gallo = gallo::open(&backend).await.unwrap();
        let hal = Hal::new(gallo, tokio::runtime::Handle::current());
        let mut irq = hal.gpio(2);

        let (waited, _) = tokio::join!(irq.wait_for_rising_edge(), async {
            hal.gallo().ping(0).await.unwrap();
            sim.set_input(2, GpioState::High);
        });
        waited.unwrap();
    }

    #[tokio::test]
    async fn timed_out_wait_does_not_block_the_next() {
        let (backend, sim) = simulated("hal-gpio-timeout");
        let gallo = gallo::open(&backend).await.unwrap();
        let hal = Hal::new(gallo, tokio::runtime::Handle::current());
        let mut irq = hal.gpio(6);

        let early = tokio::time::timeout(Duration::from_millis(20), irq.wait_for_high()).await;
        assert!(early.is_err());

        let (waited, _) = tokio::join!(irq.wait_for_high(), async {
            hal.gallo().ping(0).await.unwrap();
            sim.set_input(6, GpioState::High);
        });
        waited.unwrap();
    }
}
