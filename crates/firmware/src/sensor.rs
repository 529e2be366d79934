//! MIDI generated by the device itself, and the pushbutton selecting where it goes.
//!
//! The distance sensors aren't wired up yet; until they are, the user button plays a note.

use crate::{
    configuration::{MidiBridge, QUEUE_SIZE, SENSOR},
    din::DinOut,
};
use defmt::{info, warn};
use embassy_stm32::{exti::ExtiInput, gpio::Output};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    watch::{AnonReceiver, Sender, Watch},
};
use kinesta_midi_lib::{
    Message,
    configuration::{CycleConfig, OutputRoute},
    fanout::MidiOut,
};
use wmidi::{Channel, Note, U7};

pub type SensorOut = MidiOut<'static, 'static, CriticalSectionRawMutex, QUEUE_SIZE, DinOut>;

const OUTPUT_ROUTE_RECEIVER_CNT: usize = 0;
/// Syncs the [output route](`OutputRoute`) across tasks.
pub static OUTPUT_ROUTE_SYNC: Watch<CriticalSectionRawMutex, OutputRoute, OUTPUT_ROUTE_RECEIVER_CNT> =
    Watch::new_with(OutputRoute::UsbAndDin);
pub type OutputRouteSender<'a> =
    Sender<'a, CriticalSectionRawMutex, OutputRoute, OUTPUT_ROUTE_RECEIVER_CNT>;
pub type OutputRouteSpy<'a> =
    AnonReceiver<'a, CriticalSectionRawMutex, OutputRoute, OUTPUT_ROUTE_RECEIVER_CNT>;

pub fn sensor_out(din: DinOut, bridge: &'static MidiBridge) -> SensorOut {
    MidiOut::new(din, bridge, SENSOR)
}

/// Plays middle C for as long as the button is held.
#[embassy_executor::task]
pub async fn button_note_task(
    mut button: ExtiInput<'static>,
    mut out: SensorOut,
    mut route: OutputRouteSpy<'static>,
) -> ! {
    let velocity = U7::from_u8_lossy(100);
    loop {
        button.wait_for_rising_edge().await;
        send(&mut out, &mut route, Message::note_on(Channel::Ch1, Note::C4, velocity)).await;

        button.wait_for_falling_edge().await;
        send(&mut out, &mut route, Message::note_off(Channel::Ch1, Note::C4, velocity)).await;
    }
}

async fn send(out: &mut SensorOut, route: &mut OutputRouteSpy<'static>, message: Message<'_>) {
    if let Some(route) = route.try_get() {
        out.set_route(route);
    }
    if let Err(e) = out.send(&message).await {
        warn!("Sensor message not delivered: {}", e);
    }
}

/// Input and status indicator for the [output route](`OutputRoute`).
///
/// The blue LED is lit while MIDI goes to the host, the red one while it goes to the DIN socket.
#[embassy_executor::task]
pub async fn output_route_config(
    mut button: ExtiInput<'static>,
    mut usb_led: Output<'static>,
    mut din_led: Output<'static>,
    route: OutputRouteSender<'static>,
) -> ! {
    loop {
        let current = route.try_get().unwrap_or_default();
        usb_led.set_level(current.includes_usb().into());
        din_led.set_level(current.includes_din().into());

        button.wait_for_falling_edge().await;
        let new_route = current.cycle();
        info!("Output route: {}", new_route);
        route.send(new_route);
    }
}
