//! Bridges the DIN-MIDI socket, a 31.25 kbaud UART, to the host.

use crate::configuration::{DIN_IN, DIN_OUT, MidiBridge};
use defmt::warn;
use embassy_stm32::{
    mode::Async,
    usart::{self, UartRx, UartTx},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::Timer;
use kinesta_midi_lib::{BridgeError, Timeout, fanout::ByteSink};

/// MIDI 1.0 transmits at a fixed 31,250 baud.
pub const BAUD_RATE: u32 = 31_250;

pub type DinTx = Mutex<CriticalSectionRawMutex, UartTx<'static, Async>>;

/// A handle to the DIN transmitter, which is shared by everything that sends to the socket.
#[derive(Clone, Copy)]
pub struct DinOut(pub &'static DinTx);

impl ByteSink for DinOut {
    type Error = usart::Error;

    async fn write(&mut self, bytes: &[u8]) -> Result<(), usart::Error> {
        self.0.lock().await.write(bytes).await
    }
}

/// Forwards MIDI from the DIN socket to the host.
///
/// Bytes that arrive while the host is away are dropped; a full jack is waited out.
#[embassy_executor::task]
pub async fn din_in_task(mut rx: UartRx<'static, Async>, bridge: &'static MidiBridge) -> ! {
    let mut buf = [0; 64];
    loop {
        let n = match rx.read_until_idle(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("DIN receive failed: {}", e);
                continue;
            }
        };

        let mut pending = &buf[..n];
        while !pending.is_empty() {
            match bridge.write_midi(DIN_IN, pending).await {
                Ok(0) => Timer::after_millis(1).await,
                Ok(accepted) => pending = &pending[accepted..],
                Err(BridgeError::Disconnected) => break,
                Err(e) => {
                    warn!("Skipping byte {=u8:x} from DIN: {}", pending[0], e);
                    pending = &pending[1..];
                }
            }
        }
    }
}

/// Forwards MIDI from the host to the DIN socket.
#[embassy_executor::task]
pub async fn din_out_task(mut din: DinOut, bridge: &'static MidiBridge) -> ! {
    let mut buf = [0; 64];
    loop {
        match bridge.read_midi(DIN_OUT, &mut buf, Timeout::Forever).await {
            Ok(n) => {
                if let Err(e) = din.write(&buf[..n]).await {
                    warn!("DIN transmit failed: {}", e);
                }
            }
            Err(e) => warn!("Reading from the host failed: {}", e),
        }
    }
}
