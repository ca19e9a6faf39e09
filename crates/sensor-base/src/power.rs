use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, OutputPin, StatefulOutputPin};

use crate::error::{make_error_string, ErrorString};

/// Something that can switch power to one or more sensors.
pub trait PowerSwitch {
    fn set_on(&mut self, on: bool) -> Result<(), ErrorString>;
    fn is_on(&mut self) -> Result<bool, ErrorString>;
}

impl<P: StatefulOutputPin> PowerSwitch for P {
    fn set_on(&mut self, on: bool) -> Result<(), ErrorString> {
        if on {
            self.set_high().map_err(make_error_string)
        } else {
            self.set_low().map_err(make_error_string)
        }
    }

    fn is_on(&mut self) -> Result<bool, ErrorString> {
        self.is_set_high().map_err(make_error_string)
    }
}

/// Labelled handle to a power switch. Cloning it shares the switch, several
/// sensors wired to the same pin should hold clones of the same `PowerPin`.
#[derive(Clone)]
pub struct PowerPin {
    label: String,
    switch: Rc<RefCell<dyn PowerSwitch>>,
}

impl fmt::Debug for PowerPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerPin")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl PowerPin {
    pub fn new(label: impl Into<String>, switch: impl PowerSwitch + 'static) -> Self {
        Self {
            label: label.into(),
            switch: Rc::new(RefCell::new(switch)),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_on(&self, on: bool) -> Result<(), ErrorString> {
        self.switch.borrow_mut().set_on(on)
    }

    pub fn is_on(&self) -> Result<bool, ErrorString> {
        self.switch.borrow_mut().is_on()
    }

    #[must_use]
    pub fn shares_switch_with(&self, other: &PowerPin) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.switch), Rc::as_ptr(&other.switch))
    }
}

/// A power switch that only exists in memory, for hosts without GPIO and
/// for tests.
#[derive(Debug, Default, Clone)]
pub struct SimulatedSwitch {
    on: Rc<std::cell::Cell<bool>>,
}

impl SimulatedSwitch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A second view on the same switch, lets tests observe the state after
    /// the switch was moved into a [`PowerPin`].
    #[must_use]
    pub fn probe(&self) -> Self {
        self.clone()
    }

    #[must_use]
    pub fn on(&self) -> bool {
        self.on.get()
    }
}

impl ErrorType for SimulatedSwitch {
    type Error = Infallible;
}

impl OutputPin for SimulatedSwitch {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.on.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.on.set(true);
        Ok(())
    }
}

impl StatefulOutputPin for SimulatedSwitch {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.on.get())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.on.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_switch() {
        let switch = SimulatedSwitch::new();
        let probe = switch.probe();
        let a = PowerPin::new("pin 22", switch);
        let b = a.clone();
        let c = PowerPin::new("pin 22", SimulatedSwitch::new());

        b.set_on(true).unwrap();
        assert!(a.is_on().unwrap());
        assert!(probe.on());
        assert!(a.shares_switch_with(&b));
        assert!(!a.shares_switch_with(&c));
    }
}
