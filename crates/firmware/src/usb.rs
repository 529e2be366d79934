//! Binds the bridge's transfer schedulers to embassy-usb's MIDI class.

use crate::configuration::{MAX_PACKET_SIZE, MidiBridge, QUEUE_SIZE};
use embassy_stm32::{peripherals, usb};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_usb::{
    UsbDevice,
    class::midi::{Receiver, Sender},
    driver::EndpointError,
};
use kinesta_midi_lib::{
    configuration::ConfigError,
    scheduler::{InEndpoint, InScheduler, OutEndpoint, OutScheduler, TransferError},
};

pub type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

pub type ToHostScheduler =
    InScheduler<'static, 'static, CriticalSectionRawMutex, QUEUE_SIZE, MidiSender>;
pub type FromHostScheduler = OutScheduler<
    'static,
    'static,
    CriticalSectionRawMutex,
    QUEUE_SIZE,
    MidiReceiver,
    { MAX_PACKET_SIZE as usize },
>;

fn transfer_error(e: EndpointError) -> TransferError {
    match e {
        EndpointError::BufferOverflow => TransferError::BufferOverflow,
        EndpointError::Disabled => TransferError::Disabled,
    }
}

/// The MIDI class's bulk IN endpoint.
pub struct MidiSender(pub Sender<'static, UsbDriver>);

impl InEndpoint for MidiSender {
    fn max_packet_size(&self) -> usize {
        usize::from(self.0.max_packet_size())
    }

    async fn wait_connection(&mut self) {
        self.0.wait_connection().await
    }

    async fn submit(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.0.write_packet(data).await.map_err(transfer_error)
    }
}

/// The MIDI class's bulk OUT endpoint.
pub struct MidiReceiver(pub Receiver<'static, UsbDriver>);

impl OutEndpoint for MidiReceiver {
    fn max_packet_size(&self) -> usize {
        usize::from(self.0.max_packet_size())
    }

    async fn wait_connection(&mut self) {
        self.0.wait_connection().await
    }

    async fn submit(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.0.read_packet(buf).await.map_err(transfer_error)
    }
}

pub fn schedulers(
    bridge: &'static MidiBridge,
    sender: Sender<'static, UsbDriver>,
    receiver: Receiver<'static, UsbDriver>,
) -> Result<(ToHostScheduler, FromHostScheduler), ConfigError> {
    Ok((
        InScheduler::new(bridge, MidiSender(sender)),
        OutScheduler::new(bridge, MidiReceiver(receiver))?,
    ))
}

#[embassy_executor::task]
pub async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

/// Drains the to-host jacks into the IN endpoint.
#[embassy_executor::task]
pub async fn to_host_task(mut scheduler: ToHostScheduler) -> ! {
    scheduler.run().await
}

/// Unpacks MIDI from the OUT endpoint into the from-host jacks.
#[embassy_executor::task]
pub async fn from_host_task(mut scheduler: FromHostScheduler) -> ! {
    scheduler.run().await
}
