//! Kinesta is [Embassy](https://embassy.dev)-based firmware for a family of MIDI controllers. This build runs on the
//! [Nucleo-F767ZI development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is powered by
//! an F7-series STM32 microcontroller.
//!
//! The device appears to a computer as a class-compliant USB-MIDI interface with two ports toward the host (the
//! device's own sensors and its DIN input) and one port from the host (the DIN output). MIDI is moved between the
//! USB endpoints and the ports by [`kinesta_midi_lib`].

#![no_std]
#![no_main]

mod configuration;
mod din;
mod sensor;
mod usb;

use crate::configuration::{BRIDGE_CONFIG, JACKS, MAX_PACKET_SIZE, MidiBridge, jack_count};
use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::{
    Config, bind_interrupts,
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    peripherals,
    time::Hertz,
    usart::{self, Uart},
    usb as stm32_usb,
};
use embassy_sync::mutex;
use embassy_usb::{Builder, class::midi::MidiClass};
use kinesta_midi_lib::{Bridge, Direction};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => stm32_usb::InterruptHandler<peripherals::USB_OTG_FS>;
        USART2 => usart::InterruptHandler<peripherals::USART2>;
    }
);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Kinesta");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: most peripheral clocks are derived from their bus clock, but the 48MHz clock used for USB OTG FS
            // is derived from main PLL VCO (PLLQ clock) or PLLSAI VCO (PLLSAI clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    static BRIDGE: StaticCell<MidiBridge> = StaticCell::new();
    let bridge: &'static MidiBridge = BRIDGE.init(unwrap!(Bridge::new(BRIDGE_CONFIG, &JACKS)));

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = stm32_usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    // See docs on `vbus_detection` for details.
    config.vbus_detection = true;

    let driver = stm32_usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics;
    // 0x0001 is its test PID, to be replaced once one is assigned
    let vendor_id = 0x1209;
    let product_id = 0x0001;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Kinesta");
    config.product = Some("Kinesta MIDI");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // embassy-usb counts jacks from the device's point of view: "in" jacks receive from the host
    let class = MidiClass::new(
        &mut builder,
        jack_count(Direction::FromHost),
        jack_count(Direction::ToHost),
        MAX_PACKET_SIZE,
    );
    let (sender, receiver) = class.split();
    let usb = builder.build();

    unwrap!(spawner.spawn(usb::usb_task(usb)));
    let (to_host, from_host) = unwrap!(usb::schedulers(bridge, sender, receiver));
    unwrap!(spawner.spawn(usb::to_host_task(to_host)));
    unwrap!(spawner.spawn(usb::from_host_task(from_host)));

    // DIN-MIDI on USART2: TX on PD5, RX on PD6
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = din::BAUD_RATE;
    let uart = unwrap!(Uart::new(
        p.USART2,
        p.PD6,
        p.PD5,
        Irqs,
        p.DMA1_CH6,
        p.DMA1_CH5,
        uart_config,
    ));
    let (tx, rx) = uart.split();

    static DIN_TX: StaticCell<din::DinTx> = StaticCell::new();
    let din_out = din::DinOut(DIN_TX.init(mutex::Mutex::new(tx)));
    unwrap!(spawner.spawn(din::din_in_task(rx, bridge)));
    unwrap!(spawner.spawn(din::din_out_task(din_out, bridge)));

    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    let route = sensor::OUTPUT_ROUTE_SYNC.anon_receiver();
    unwrap!(spawner.spawn(sensor::button_note_task(
        button,
        sensor::sensor_out(din_out, bridge),
        route
    )));

    let route_button = ExtiInput::new(p.PD1, p.EXTI1, Pull::Up);
    let blue_led = Output::new(p.PB7, Level::Low, Speed::Low);
    let red_led = Output::new(p.PB14, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(sensor::output_route_config(
        route_button,
        blue_led,
        red_led,
        sensor::OUTPUT_ROUTE_SYNC.sender()
    )));
}
