//! Dice accessory firmware for the nRF52840 (SoftDevice S140).
//!
//! Tasks:
//! - `softdevice_task`: runs the SoftDevice event loop.
//! - `advertising_task`: advertises on request and serves each connection.
//! - `dispatcher_task`: feeds stack events to the accessory core.
//! - `dice_task`: rolls the die every `DICE_ROLL_PERIOD_SECS`.

#![no_std]
#![no_main]

mod ble;

use defmt::{error, info, unwrap, warn};
use dice_accessory::config::{DEVICE_NAME, DICE_ROLL_PERIOD_SECS};
use dice_accessory::{Accessory, Outcome, Severity};
use embassy_executor::Spawner;
use embassy_nrf::{config::Config, interrupt};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Ticker};
use nrf_softdevice::{raw, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use ble::softdevice::{DiceServer, SdRng, SoftDeviceStack};

type DiceAccessory = Accessory<CriticalSectionRawMutex>;

/// Log everything a core call reported.
fn report(outcome: &Outcome) {
    for fault in &outcome.faults {
        match fault.severity() {
            Severity::Fatal => error!("setup failed, accessory halted: {}", fault),
            Severity::Transient => warn!("{}", fault),
            Severity::Negotiation => warn!("pairing failed, link stays unsecured: {}", fault),
        }
    }
    if let Some(id) = outcome.identity {
        info!("bonded peer IRK: {:02x}", id.0);
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("dice accessory starting");

    // Keep clear of the priorities the SoftDevice reserves (0, 1, 4).
    let mut nrf_config = Config::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let _p = embassy_nrf::init(nrf_config);

    let sd_config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: raw::BLE_GATT_ATT_MTU_DEFAULT as u16,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as *const u8 as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    };

    let sd = Softdevice::enable(&sd_config);
    unwrap!(spawner.spawn(softdevice_task(sd)));

    static STACK: StaticCell<SoftDeviceStack> = StaticCell::new();
    let stack = STACK.init(SoftDeviceStack::new(sd, ble::bonder::init()));

    static SERVER: StaticCell<DiceServer> = StaticCell::new();
    let server = SERVER.init(DiceServer::new(stack));

    static ACCESSORY: StaticCell<DiceAccessory> = StaticCell::new();
    let accessory = ACCESSORY.init(Accessory::new());

    unwrap!(spawner.spawn(advertising_task(sd, stack, server)));
    unwrap!(spawner.spawn(dispatcher_task(accessory, stack)));

    report(&accessory.start(stack));

    unwrap!(spawner.spawn(dice_task(accessory, stack, SdRng::new(sd))));
    info!("tasks running");
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn advertising_task(
    sd: &'static Softdevice,
    stack: &'static SoftDeviceStack,
    server: &'static DiceServer,
) -> ! {
    ble::softdevice::advertising_loop(sd, stack, server).await
}

#[embassy_executor::task]
async fn dispatcher_task(accessory: &'static DiceAccessory, stack: &'static SoftDeviceStack) -> ! {
    loop {
        let event = ble::EVENTS.receive().await;
        report(&accessory.dispatch(event, stack));
    }
}

#[embassy_executor::task]
async fn dice_task(
    accessory: &'static DiceAccessory,
    stack: &'static SoftDeviceStack,
    mut rng: SdRng,
) -> ! {
    let mut ticker = Ticker::every(Duration::from_secs(DICE_ROLL_PERIOD_SECS));
    loop {
        ticker.next().await;
        report(&accessory.tick(&mut rng, stack));
        let snapshot = accessory.snapshot();
        info!("rolled {}, subscribed: {}", snapshot.dice.get(), snapshot.subscribed);
    }
}
