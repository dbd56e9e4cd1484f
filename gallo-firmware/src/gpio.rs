//! GPIO endpoint handlers and the table of outstanding waits.

use crate::bus::FlexPin;
use crate::NUM_GPIOS;
use gallo_proto::wire::{Failure, GpioPutRequest, GpioState, WaitCondition};

/// Samples the pin as an input.
pub fn get<P: FlexPin + ?Sized>(pin: &mut P) -> Result<GpioState, Failure> {
    pin.set_as_input();
    pin.level().map_err(Failure::Bus)
}

/// Drives the pin as an output.
pub fn put<P: FlexPin + ?Sized>(pin: &mut P, req: &GpioPutRequest) -> Result<(), Failure> {
    pin.set_as_output();
    pin.set_level(req.state).map_err(Failure::Bus)
}

/// Lifecycle of a [`PendingWait`]. A wait starts `Armed` and leaves the table
/// in exactly one of the other three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Armed,
    /// The condition held; the wait is answered with success.
    Resolved,
    /// Another request on the same pin displaced the wait.
    Superseded,
    /// The board was reset while the wait was outstanding.
    Cancelled,
}

/// A `gpio/wait-*` request whose reply has been deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWait {
    /// Correlation id of the request, echoed in the deferred reply.
    pub seq: u16,
    /// Endpoint id of the request, echoed in the deferred reply.
    pub endpoint: u8,
    pub condition: WaitCondition,
    /// Level seen on the previous sample, for edge conditions.
    pub last: GpioState,
}

/// Why [`WaitTable::arm`] refused a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmError {
    /// The pin already had a wait. It has been removed and must be answered
    /// as superseded; the new one is answered as a conflict.
    Conflict(PendingWait),
    /// The table has no slot for the pin.
    NoSuchPin,
}

/// At most one wait per pin.
#[derive(Debug, Default)]
pub struct WaitTable {
    slots: [Option<PendingWait>; NUM_GPIOS],
}

impl WaitTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; NUM_GPIOS],
        }
    }

    /// Arms `wait` on `pin`. On error `wait` is not armed.
    pub fn arm(&mut self, pin: u8, wait: PendingWait) -> Result<(), ArmError> {
        let slot = self
            .slots
            .get_mut(usize::from(pin))
            .ok_or(ArmError::NoSuchPin)?;
        match slot.take() {
            Some(previous) => Err(ArmError::Conflict(previous)),
            None => {
                *slot = Some(wait);
                Ok(())
            }
        }
    }

    /// Removes and returns the wait on `pin`, if any.
    pub fn supersede(&mut self, pin: u8) -> Option<PendingWait> {
        self.slots.get_mut(usize::from(pin)).and_then(Option::take)
    }

    /// Empties the table, calling `f` for every wait that was armed.
    pub fn cancel_all(&mut self, mut f: impl FnMut(u8, PendingWait)) -> usize {
        let mut n = 0;
        for (pin, slot) in self.slots.iter_mut().enumerate() {
            if let Some(wait) = slot.take() {
                f(pin as u8, wait);
                n += 1;
            }
        }
        n
    }

    /// Feeds a new sample of `pin` to its wait. Returns the wait, removed from
    /// the table, if the sample satisfies its condition.
    pub fn sample(&mut self, pin: u8, level: GpioState) -> Option<PendingWait> {
        let slot = self.slots.get_mut(usize::from(pin))?;
        let wait = slot.as_mut()?;
        let fired = wait.condition.satisfied(wait.last, level);
        wait.last = level;
        if fired {
            slot.take()
        } else {
            None
        }
    }

    /// Pins that currently have a wait armed.
    pub fn armed(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(pin, _)| pin as u8)
    }

    pub fn is_armed(&self, pin: u8) -> bool {
        matches!(self.slots.get(usize::from(pin)), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.armed().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gallo_proto::wire::BusFault;

    fn wait(seq: u16, condition: WaitCondition, last: GpioState) -> PendingWait {
        PendingWait {
            seq,
            endpoint: 0x34,
            condition,
            last,
        }
    }

    #[test]
    fn rising_edge_needs_a_low_sample_first() {
        let mut table = WaitTable::new();
        table
            .arm(2, wait(1, WaitCondition::RisingEdge, GpioState::High))
            .unwrap();
        assert_eq!(table.sample(2, GpioState::High), None);
        assert_eq!(table.sample(2, GpioState::Low), None);
        let fired = table.sample(2, GpioState::High).unwrap();
        assert_eq!(fired.seq, 1);
        assert!(!table.is_armed(2));
    }

    #[test]
    fn second_wait_on_a_pin_displaces_the_first() {
        let mut table = WaitTable::new();
        table.arm(0, wait(1, WaitCondition::High, GpioState::Low)).unwrap();
        let refused = table
            .arm(0, wait(2, WaitCondition::Low, GpioState::Low))
            .unwrap_err();
        assert!(matches!(refused, ArmError::Conflict(previous) if previous.seq == 1));
        assert!(table.is_empty());
    }

    #[test]
    fn cancel_all_reports_each_wait_once() {
        let mut table = WaitTable::new();
        table.arm(1, wait(10, WaitCondition::AnyEdge, GpioState::Low)).unwrap();
        table.arm(7, wait(11, WaitCondition::Low, GpioState::High)).unwrap();
        assert_eq!(table.armed().collect::<Vec<_>>(), vec![1, 7]);

        let mut seen = Vec::new();
        assert_eq!(table.cancel_all(|pin, w| seen.push((pin, w.seq))), 2);
        assert_eq!(seen, vec![(1, 10), (7, 11)]);
        assert_eq!(table.cancel_all(|_, _| unreachable!()), 0);
    }

    #[test]
    fn out_of_range_pins_are_ignored() {
        let mut table = WaitTable::new();
        assert_eq!(table.supersede(200), None);
        assert_eq!(table.sample(200, GpioState::High), None);
        assert!(!table.is_armed(200));
        assert_eq!(
            table.arm(NUM_GPIOS as u8, wait(3, WaitCondition::High, GpioState::Low)),
            Err(ArmError::NoSuchPin)
        );
        assert!(table.is_empty());
    }

    struct Pin {
        output: bool,
        level: GpioState,
    }

    impl FlexPin for Pin {
        fn set_as_input(&mut self) {
            self.output = false;
        }

        fn set_as_output(&mut self) {
            self.output = true;
        }

        fn level(&mut self) -> Result<GpioState, BusFault> {
            Ok(self.level)
        }

        fn set_level(&mut self, state: GpioState) -> Result<(), BusFault> {
            self.level = state;
            Ok(())
        }
    }

    #[test]
    fn get_and_put_switch_direction() {
        let mut pin = Pin {
            output: false,
            level: GpioState::Low,
        };
        put(
            &mut pin,
            &GpioPutRequest {
                pin: 0,
                state: GpioState::High,
            },
        )
        .unwrap();
        assert!(pin.output);
        assert_eq!(get(&mut pin), Ok(GpioState::High));
        assert!(!pin.output);
    }
}
