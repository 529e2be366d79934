use num_derive::{FromPrimitive, ToPrimitive};

/// Selects which physical outputs receive MIDI generated by the device itself.
///
/// Cycled with a pushbutton, so that a performer can silence the DIN port while working against a computer, or keep
/// the device off the host while it drives hardware synths.
#[derive(Debug, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputRoute {
    /// Send to both the USB host and the DIN port.
    UsbAndDin,
    /// Send to the USB host only.
    UsbOnly,
    /// Send to the DIN port only.
    DinOnly,
}

impl OutputRoute {
    /// Returns true if messages should be sent to the USB host.
    pub fn includes_usb(&self) -> bool {
        *self != Self::DinOnly
    }

    /// Returns true if messages should be sent to the DIN port.
    pub fn includes_din(&self) -> bool {
        *self != Self::UsbOnly
    }
}

impl Default for OutputRoute {
    fn default() -> Self {
        Self::UsbAndDin
    }
}

impl super::CycleConfig for OutputRoute {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::CycleConfig;

    #[test]
    fn includes() {
        assert!(OutputRoute::UsbAndDin.includes_usb());
        assert!(OutputRoute::UsbAndDin.includes_din());
        assert!(!OutputRoute::UsbOnly.includes_din(), "Should not include DIN");
        assert!(!OutputRoute::DinOnly.includes_usb(), "Should not include USB");
    }

    #[test]
    fn cycles_through_every_route() {
        let route = OutputRoute::default().cycle().cycle();
        assert_eq!(OutputRoute::DinOnly, route);
        assert_eq!(OutputRoute::UsbAndDin, route.cycle());
    }
}
