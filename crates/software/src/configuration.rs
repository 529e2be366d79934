//! This module contains the static description of the bridge, which is built once at startup, as well as user-configurable
//! runtime settings (implemented as enums) and traits to make them easier to work with in code.

mod output_route;
pub use output_route::*;

use crate::codec::CableNumber;
use num_traits::{FromPrimitive, ToPrimitive};
use thiserror::Error;

/// Identifies a jack to the upstream API. Unique across both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JackId(pub u8);

/// Which way MIDI flows through a jack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Device to host; drained by the IN endpoint.
    ToHost,
    /// Host to device; filled by the OUT endpoint.
    FromHost,
}

/// Static description of one jack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JackDescriptor {
    /// Handle used by the upstream API.
    pub id: JackId,
    /// Which endpoint carries the jack's traffic.
    pub direction: Direction,
    /// Tag carried by every packet belonging to this jack. Unique within a direction.
    pub cable: CableNumber,
    /// Human-readable name, for logs and USB string descriptors.
    pub name: &'static str,
}

/// Static description of one physical bulk endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointConfig {
    /// Endpoint address; bit 7 is set for IN endpoints.
    pub address: u8,
    /// Largest transfer the endpoint accepts in one go.
    pub max_packet_size: u16,
}

impl EndpointConfig {
    /// Set on the address of every IN (device to host) endpoint.
    pub const IN_DIRECTION_BIT: u8 = 0x80;

    fn validate(&self, expect_in: bool) -> Result<(), ConfigError> {
        if self.max_packet_size == 0 || self.max_packet_size % 4 != 0 {
            return Err(ConfigError::PacketSize(self.max_packet_size));
        }
        if (self.address & Self::IN_DIRECTION_BIT != 0) != expect_in {
            return Err(ConfigError::EndpointDirection(self.address));
        }
        Ok(())
    }
}

/// Everything the bridge needs to know about the device's MIDI topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeConfig<'a> {
    /// All jacks, in either direction.
    pub jacks: &'a [JackDescriptor],
    /// The bulk IN endpoint.
    pub to_host: EndpointConfig,
    /// The bulk OUT endpoint.
    pub from_host: EndpointConfig,
}

/// Inconsistencies in a [`BridgeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Packet sizes must be a non-zero multiple of the Event Packet size.
    #[error("max packet size {0} is not a non-zero multiple of 4")]
    PacketSize(u16),
    /// Bit 7 of an endpoint address doesn't match the endpoint's role.
    #[error("endpoint address {0:#04x} has the wrong direction")]
    EndpointDirection(u8),
    /// A cable number addresses at most 16 jacks per direction.
    #[error("more than 16 jacks in one direction")]
    TooManyJacks,
    /// Two jacks in the same direction share a cable number.
    #[error("cable {0} is assigned twice")]
    DuplicateCable(u8),
    /// Two jacks share an id.
    #[error("jack id {0} is assigned twice")]
    DuplicateId(u8),
    /// A receive buffer can't hold a full packet from the endpoint.
    #[error("receive buffer of {size} bytes is smaller than the {required}-byte packet size")]
    ReceiveBuffer {
        /// Capacity of the buffer.
        size: usize,
        /// Largest packet the endpoint can deliver.
        required: usize,
    },
    /// The jacks handed to the bridge aren't the ones the configuration describes.
    #[error("jacks do not match the configuration")]
    JackMismatch,
}

impl BridgeConfig<'_> {
    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_host.validate(true)?;
        self.from_host.validate(false)?;

        for direction in [Direction::ToHost, Direction::FromHost] {
            if self.jacks_toward(direction).count() > CableNumber::COUNT {
                return Err(ConfigError::TooManyJacks);
            }
            let mut used = [false; CableNumber::COUNT];
            for jack in self.jacks_toward(direction) {
                let seen = &mut used[jack.cable.index()];
                if *seen {
                    return Err(ConfigError::DuplicateCable(jack.cable.into()));
                }
                *seen = true;
            }
        }

        for (i, jack) in self.jacks.iter().enumerate() {
            if self.jacks[..i].iter().any(|other| other.id == jack.id) {
                return Err(ConfigError::DuplicateId(jack.id.0));
            }
        }
        Ok(())
    }

    /// Jacks whose traffic flows in `direction`.
    pub fn jacks_toward(
        &self,
        direction: Direction,
    ) -> impl Iterator<Item = &JackDescriptor> + '_ {
        self.jacks.iter().filter(move |j| j.direction == direction)
    }
}

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Copy + Sized,
    {
        self.to_u8()
            .and_then(|index| <Self as FromPrimitive>::from_u8(index + 1))
            .or_else(|| <Self as FromPrimitive>::from_u8(0))
            .unwrap_or(self)
    }
}
