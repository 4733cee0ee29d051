//! End-to-end charging scenarios against the platform mocks.
//!
//! Each test drives a session one tick at a time through `handle_timer`,
//! the way the runner does when the scheduler fires. Run with
//! `--features tracing` to see the session log.
#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use direct_charger::{
    ChargeMode, ChargeStatus, ChargeType, ChargerConfig, ChargerError, ChargerSession,
    ChargingState, TaControl, TaType, TimerId,
};
use embassy_time::Duration;
use platform::mocks::{AdapterRequest, IcOp, MockAdapter, MockChargerIc, MockDelay, MockScheduler};
use platform::{AdcChannel, StatusFlags};

type Session = ChargerSession<MockChargerIc, MockAdapter, MockAdapter, MockDelay, MockScheduler>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn session(wired: Option<MockAdapter>, wireless: Option<MockAdapter>) -> Session {
    init_tracing();
    let mut ic = MockChargerIc::new();
    ic.set_status(StatusFlags::ACTIVE);
    ic.set_adc(AdcChannel::BatteryCurrent, 5_000_000);
    Session::new(
        ChargerConfig::ln8411_reference(),
        ic,
        wired,
        wireless,
        MockDelay::new(),
        MockScheduler::new(),
    )
}

fn wired_9v_3a() -> Session {
    session(Some(MockAdapter::pps(&[(9_000_000, 3_000_000)])), None)
}

/// Start on the wired source and stop right after the first request.
fn start_wired(s: &mut Session) {
    s.set_target(5_200_000, 4_350_000).unwrap();
    s.set_charging_enabled(1).unwrap();
    assert_eq!(s.charging_state(), ChargingState::CheckVbat);
    assert_eq!(s.timer_id(), TimerId::VbatMinCheck);

    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::PresetDc);
    assert_eq!(s.retry_cnt(), 0);

    s.handle_timer().unwrap(); // preset
    s.handle_timer().unwrap(); // first request
}

/// Start, converge and settle into steady-state CC.
fn drive_to_cc(s: &mut Session) {
    start_wired(s);
    s.handle_timer().unwrap(); // program and enable
    assert_eq!(s.charging_state(), ChargingState::CheckActive);
    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::AdjustCc);

    s.ic_mut().set_adc(AdcChannel::InputCurrent, 2_700_000);
    s.handle_timer().unwrap(); // overshoot: back off
    assert_eq!(s.charging_state(), ChargingState::AdjustCc);
    assert_eq!(s.timer_id(), TimerId::PdMsgSend);
    s.handle_timer().unwrap(); // send
    assert_eq!(s.timer_id(), TimerId::EnterCcMode);
    s.handle_timer().unwrap(); // settle
    assert_eq!(s.charging_state(), ChargingState::CcMode);
    assert_eq!(s.timer_id(), TimerId::CheckCcMode);
    assert_eq!(s.timer_period(), s.config().timings.ccmode_check);
}

/// From steady-state CC, walk through the pre-CV ramp into CV.
fn drive_to_cv(s: &mut Session) {
    drive_to_cc(s);
    s.ic_mut()
        .set_status(StatusFlags::ACTIVE | StatusFlags::VFLOAT_LOOP);
    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::StartCv);
    s.handle_timer().unwrap(); // ramp one step
    s.handle_timer().unwrap(); // send
    assert_eq!(s.timer_id(), TimerId::EnterCvMode);

    s.ic_mut().set_status(StatusFlags::ACTIVE);
    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::CvMode);
}

#[test]
fn preset_falls_back_to_2to1_on_9v_adapter() {
    let mut s = wired_9v_3a();
    start_wired(&mut s);

    assert_eq!(s.chg_mode(), ChargeMode::Ratio2to1);
    assert_eq!(s.ta_type(), TaType::WiredPd);
    // 2 * 3.8 V + 300 mV head-room, already on the 20 mV grid.
    assert_eq!(s.ta_vol(), 7_900_000);
    assert_eq!(s.iin_cc(), 2_600_000);

    let ta = s.wired_mut().unwrap();
    assert_eq!(
        ta.queries(),
        &[(20_000_000, 2_000_000), (9_000_000, 3_000_000)]
    );
    assert_eq!(
        ta.requests(),
        &[AdapterRequest {
            uv: 7_900_000,
            ua: 2_600_000,
            objpos: 1
        }]
    );
    assert_eq!(s.timer_id(), TimerId::PresetConfig);
    assert_eq!(s.timer_period(), s.config().timings.pdmsg_wait);
}

#[test]
fn preset_config_programs_ic_before_enabling() {
    let mut s = wired_9v_3a();
    start_wired(&mut s);
    s.handle_timer().unwrap();

    let ops = s.ic().ops();
    let limit = ops
        .iter()
        .position(|op| *op == IcOp::SetInputCurrentLimit(2_700_000))
        .unwrap();
    let fv = ops
        .iter()
        .position(|op| *op == IcOp::SetFloatVoltage(4_350_000))
        .unwrap();
    let enable = ops
        .iter()
        .position(|op| *op == IcOp::EnableCharging(true))
        .unwrap();
    assert!(limit < enable && fv < enable);
    assert_eq!(s.timer_period(), s.config().timings.enable_delay);
}

#[test]
fn cc_tick_above_band_steps_voltage_down() {
    let mut s = wired_9v_3a();
    drive_to_cc(&mut s);
    let (vol, cur) = (s.ta_vol(), s.ta_cur());
    assert_eq!(cur, s.iin_cc());

    s.ic_mut().set_adc(AdcChannel::InputCurrent, 2_700_000);
    s.handle_timer().unwrap();

    // ta_cur is not above iin_cc, so voltage takes the step.
    assert_eq!(s.ta_cur(), cur);
    assert_eq!(s.ta_vol(), vol - 20_000);
    assert_eq!(s.timer_id(), TimerId::PdMsgSend);
    assert_eq!(s.timer_period(), Duration::from_ticks(0));
}

#[test]
fn converged_cc_ticks_send_nothing() {
    let mut s = wired_9v_3a();
    drive_to_cc(&mut s);
    let sent = s.wired_mut().unwrap().requests().len();
    let (vol, cur) = (s.ta_vol(), s.ta_cur());

    s.ic_mut().set_adc(AdcChannel::InputCurrent, 2_600_000);
    for _ in 0..5 {
        s.handle_timer().unwrap();
        assert_eq!(s.timer_id(), TimerId::CheckCcMode);
        assert_eq!(s.timer_period(), s.config().timings.ccmode_check);
    }
    assert_eq!((s.ta_vol(), s.ta_cur()), (vol, cur));
    assert_eq!(s.control_loop().prev_iin, 2_600_000);
    assert_eq!(s.wired_mut().unwrap().requests().len(), sent);
    assert_eq!(s.charge_type(), ChargeType::Fast);
    assert_eq!(s.status(), ChargeStatus::Charging);
}

#[test]
fn same_targets_while_charging_are_a_no_op() {
    let mut s = wired_9v_3a();
    drive_to_cc(&mut s);
    let sent = s.wired_mut().unwrap().requests().len();
    let scheduled = s.scheduler().scheduled().len();

    s.set_target(5_200_000, 4_350_000).unwrap();

    assert_eq!(s.charging_state(), ChargingState::CcMode);
    assert_eq!(s.new_iin(), None);
    assert_eq!(s.new_vfloat(), None);
    assert_eq!(s.scheduler().scheduled().len(), scheduled);
    assert_eq!(s.wired_mut().unwrap().requests().len(), sent);
}

#[test]
fn end_of_charge_moves_to_done() {
    let mut s = wired_9v_3a();
    drive_to_cv(&mut s);
    assert_eq!(s.charge_type(), ChargeType::TaperExternal);

    s.ic_mut().set_adc(AdcChannel::InputCurrent, 400_000);
    s.ic_mut().set_adc(AdcChannel::BatteryVoltage, 4_335_000);
    s.handle_timer().unwrap();

    assert_eq!(s.charging_state(), ChargingState::ChargingDone);
    assert_eq!(s.timer_id(), TimerId::CheckCvMode);
    assert_eq!(s.timer_period(), s.config().timings.chgdone_check);
}

#[test]
fn wireless_stop_ramps_down_before_disable() {
    let mut s = session(None, Some(MockAdapter::wireless(20_000_000, 1_500_000)));
    s.set_target(4_000_000, 4_400_000).unwrap();
    s.set_charging_enabled(2).unwrap();
    s.handle_timer().unwrap(); // vbat ok
    s.handle_timer().unwrap(); // preset
    assert_eq!(s.chg_mode(), ChargeMode::Ratio4to1);
    assert_eq!(s.ta_vol(), 15_400_000);
    assert_eq!(s.iin_cc(), 1_000_000);
    s.handle_timer().unwrap(); // send
    assert_eq!(s.timer_period(), s.config().timings.pdmsg_wlc_wait);
    s.handle_timer().unwrap(); // enable
    s.handle_timer().unwrap(); // active
    assert_eq!(s.charging_state(), ChargingState::AdjustCc);

    s.ic_mut().set_adc(AdcChannel::InputCurrent, 900_000);
    s.ic_mut()
        .set_status(StatusFlags::ACTIVE | StatusFlags::VFLOAT_LOOP);
    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::StartCv);
    s.handle_timer().unwrap(); // 40 mV down
    s.handle_timer().unwrap(); // send
    s.ic_mut().set_status(StatusFlags::ACTIVE);
    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::CvMode);
    assert_eq!(s.ta_vol(), 15_360_000);

    s.ic_mut().clear_ops();
    s.wireless_mut().unwrap().clear_log();
    s.set_charging_enabled(0).unwrap();

    // Input limit from iin_cc + margin down to the floor, then the pump.
    assert_eq!(
        s.ic().ops(),
        &[
            IcOp::SetInputCurrentLimit(1_000_000),
            IcOp::SetInputCurrentLimit(900_000),
            IcOp::SetInputCurrentLimit(800_000),
            IcOp::SetInputCurrentLimit(700_000),
            IcOp::SetInputCurrentLimit(600_000),
            IcOp::SetInputCurrentLimit(500_000),
            IcOp::EnableCharging(false),
            IcOp::SetInputCurrentLimit(3_000_000),
            IcOp::SetFloatVoltage(4_450_000),
            IcOp::Reinit,
        ]
    );
    // Receiver voltage down to 4 * vbat.
    let rx = s.wireless_mut().unwrap();
    let volts: Vec<u32> = rx.requests().iter().map(|r| r.uv).collect();
    assert_eq!(volts, vec![15_260_000, 15_200_000]);
    assert_eq!(rx.reverts(), 1);

    assert_eq!(s.delay().waits_ns(), &[100_000_000; 8]);
    assert_eq!(s.charging_state(), ChargingState::NoCharging);
    assert_eq!(s.status(), ChargeStatus::NotCharging);
}

#[test]
fn wireless_2to1_stop_keeps_receiver_above_four_times_vbat() {
    let mut s = session(None, Some(MockAdapter::wireless(12_000_000, 1_500_000)));
    s.set_target(4_000_000, 4_400_000).unwrap();
    s.set_charging_enabled(2).unwrap();
    s.handle_timer().unwrap(); // vbat ok
    s.handle_timer().unwrap(); // preset
    assert_eq!(s.chg_mode(), ChargeMode::Ratio2to1);
    assert_eq!(s.ta_vol(), 7_800_000);
    s.handle_timer().unwrap(); // send
    s.handle_timer().unwrap(); // enable
    s.handle_timer().unwrap(); // active
    assert_eq!(s.charging_state(), ChargingState::AdjustCc);

    s.wireless_mut().unwrap().clear_log();
    s.set_charging_enabled(0).unwrap();

    // 7.8 V is already below 4 * 3.8 V: only the input limit ramps.
    let rx = s.wireless_mut().unwrap();
    assert!(rx.requests().is_empty());
    assert_eq!(rx.reverts(), 1);
    assert_eq!(s.charging_state(), ChargingState::NoCharging);
}

#[test]
fn target_change_before_preset_is_scaled_by_the_chosen_ratio() {
    let mut s = wired_9v_3a();
    s.set_target(5_200_000, 4_350_000).unwrap();
    s.set_charging_enabled(1).unwrap();
    s.handle_timer().unwrap(); // vbat ok
    assert_eq!(s.timer_id(), TimerId::PresetDc);

    // No ratio yet: stored for the preset, nothing queued.
    s.set_target(4_000_000, 0).unwrap();
    assert_eq!(s.cc_max(), Some(4_000_000));
    assert_eq!(s.new_iin(), None);

    s.handle_timer().unwrap(); // preset
    assert_eq!(s.chg_mode(), ChargeMode::Ratio2to1);
    assert_eq!(s.iin_cc(), 2_000_000);

    // Ratio chosen: later changes are queued at input scale.
    s.set_target(4_400_000, 0).unwrap();
    assert_eq!(s.new_iin(), Some(2_200_000));

    s.handle_timer().unwrap(); // send
    s.handle_timer().unwrap(); // program and enable
    s.handle_timer().unwrap(); // active
    s.ic_mut().set_adc(AdcChannel::InputCurrent, 2_100_000);
    s.handle_timer().unwrap(); // overshoot
    s.handle_timer().unwrap(); // send
    s.handle_timer().unwrap(); // settle
    assert_eq!(s.charging_state(), ChargingState::CcMode);

    s.handle_timer().unwrap(); // consume the queued increase
    assert_eq!(s.charging_state(), ChargingState::AdjustTaCur);
    assert_eq!(s.iin_cc(), 2_200_000);
    assert_eq!(s.new_iin(), None);

    let limits: Vec<u32> = s
        .ic()
        .ops()
        .iter()
        .filter_map(|op| match op {
            IcOp::SetInputCurrentLimit(ua) => Some(*ua),
            _ => None,
        })
        .collect();
    assert_eq!(limits, vec![2_100_000, 2_300_000]);
}

#[test]
fn power_limited_adapter_enters_constant_power() {
    let mut s = session(
        Some(MockAdapter::pps(&[(21_000_000, 3_000_000)]).power_limited(25_000)),
        None,
    );
    s.set_target(8_000_000, 4_400_000).unwrap();
    s.set_charging_enabled(1).unwrap();
    s.handle_timer().unwrap(); // vbat ok
    s.handle_timer().unwrap(); // preset

    // 4 * 3.8 V + 300 mV at 2 A is 31 W; 25 W / 15.5 V rounds to 1.6 A.
    assert_eq!(s.chg_mode(), ChargeMode::Ratio4to1);
    assert_eq!(s.ta_ctrl(), TaControl::ConstantPower);
    assert_eq!(s.ta_vol(), 15_500_000);
    assert_eq!(s.ta_cur(), 1_600_000);
    assert_eq!(s.iin_cc(), 1_600_000);
    assert_eq!(s.control_loop().ta_max_cur, 1_600_000);

    s.handle_timer().unwrap(); // send
    assert_eq!(
        s.wired_mut().unwrap().requests(),
        &[AdapterRequest {
            uv: 15_500_000,
            ua: 1_600_000,
            objpos: 1
        }]
    );
    s.handle_timer().unwrap(); // program and enable
    s.handle_timer().unwrap(); // active
    s.ic_mut().set_adc(AdcChannel::InputCurrent, 1_700_000);
    s.handle_timer().unwrap(); // overshoot: voltage down
    assert_eq!(s.ta_vol(), 15_480_000);
    s.handle_timer().unwrap(); // send
    s.handle_timer().unwrap(); // settle
    assert_eq!(s.charging_state(), ChargingState::CcMode);

    // 30 mA under target: outside the 20 mA constant-power band (the
    // plain current table would tolerate 50 mA). Current is at its
    // ceiling, so voltage takes the step.
    s.ic_mut().set_adc(AdcChannel::InputCurrent, 1_570_000);
    s.handle_timer().unwrap();
    assert_eq!(s.timer_id(), TimerId::PdMsgSend);
    assert_eq!(s.ta_cur(), 1_600_000);
    assert_eq!(s.ta_vol(), 15_500_000);
}

#[test]
fn vbat_check_times_out_on_fourth_tick() {
    let mut s = wired_9v_3a();
    s.set_charging_enabled(1).unwrap();

    for retry in 1..=3 {
        s.handle_timer().unwrap();
        assert_eq!(s.charging_state(), ChargingState::CheckVbat);
        assert_eq!(s.retry_cnt(), retry);
        assert_eq!(s.timer_period(), s.config().timings.vbatmin_check);
    }
    assert_eq!(s.handle_timer(), Err(ChargerError::Timeout));
    assert_eq!(s.charging_state(), ChargingState::NoCharging);
    assert_eq!(s.retry_cnt(), 0);
    assert!(s.wired_mut().unwrap().requests().is_empty());
}

#[test]
fn low_battery_waits_then_proceeds() {
    let mut s = wired_9v_3a();
    s.ic_mut().set_adc(AdcChannel::BatteryVoltage, 3_200_000);
    s.set_target(5_200_000, 4_350_000).unwrap();
    s.set_charging_enabled(1).unwrap();

    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::CheckVbat);
    assert_eq!(s.retry_cnt(), 1);

    s.ic_mut().set_adc(AdcChannel::BatteryVoltage, 3_600_000);
    s.handle_timer().unwrap();
    assert_eq!(s.charging_state(), ChargingState::PresetDc);
    assert_eq!(s.retry_cnt(), 0);
}

#[test]
fn battery_above_float_voltage_aborts_preset() {
    let mut s = wired_9v_3a();
    s.ic_mut().set_adc(AdcChannel::BatteryVoltage, 4_400_000);
    s.set_target(5_200_000, 4_350_000).unwrap();
    s.set_charging_enabled(1).unwrap();
    s.handle_timer().unwrap();

    assert_eq!(s.handle_timer(), Err(ChargerError::InvalidInput));
    assert_eq!(s.charging_state(), ChargingState::NoCharging);
    assert!(s.wired_mut().unwrap().requests().is_empty());
    assert_eq!(s.wired_mut().unwrap().reverts(), 1);
}

#[test]
fn adapter_without_usable_apdo_stops_session() {
    let mut s = session(Some(MockAdapter::pps(&[(5_900_000, 3_000_000)])), None);
    s.set_target(5_200_000, 4_350_000).unwrap();
    s.set_charging_enabled(1).unwrap();
    s.handle_timer().unwrap();

    assert_eq!(s.handle_timer(), Err(ChargerError::NotSupported));
    assert_eq!(s.charging_state(), ChargingState::NoCharging);
    assert_eq!(s.wired_mut().unwrap().queries().len(), 3);
}

#[test]
fn second_source_while_charging_is_busy() {
    let mut s = session(
        Some(MockAdapter::pps(&[(9_000_000, 3_000_000)])),
        Some(MockAdapter::wireless(20_000_000, 1_500_000)),
    );
    s.set_charging_enabled(1).unwrap();
    assert_eq!(s.set_charging_enabled(1), Ok(()));
    assert_eq!(s.set_charging_enabled(2), Err(ChargerError::Busy));
    assert_eq!(s.set_charging_enabled(9), Err(ChargerError::InvalidInput));
    assert_eq!(s.ta_type(), TaType::WiredPd);
}

#[test]
fn missing_or_offline_source_does_not_start() {
    let mut s = wired_9v_3a();
    assert_eq!(s.set_charging_enabled(2), Err(ChargerError::NotFound));

    s.wired_mut().unwrap().set_online(false);
    assert!(matches!(
        s.set_charging_enabled(1),
        Err(ChargerError::Adapter(_))
    ));
    assert_eq!(s.charging_state(), ChargingState::NoCharging);
    assert_eq!(s.status(), ChargeStatus::Discharging);
}

#[test]
fn float_voltage_above_limit_is_rejected() {
    let mut s = wired_9v_3a();
    assert_eq!(
        s.set_target(5_000_000, 4_500_000),
        Err(ChargerError::InvalidInput)
    );
    assert_eq!(s.fv_uv(), None);
}

#[test]
fn stop_from_cv_resets_everything() {
    let mut s = wired_9v_3a();
    drive_to_cv(&mut s);
    assert!(s.keepalive_armed());

    s.stop_charging();

    assert_eq!(s.charging_state(), ChargingState::NoCharging);
    assert_eq!(s.cc_max(), None);
    assert_eq!(s.fv_uv(), None);
    assert_eq!(s.new_iin(), None);
    assert_eq!(s.new_vfloat(), None);
    assert_eq!(s.retry_cnt(), 0);
    assert_eq!(s.timer_id(), TimerId::None);
    assert_eq!(s.source(), None);
    assert_eq!(s.dc_start_time(), None);
    assert!(!s.keepalive_armed());
    assert_eq!(s.scheduler().pending(), None);
    assert_eq!(s.charge_type(), ChargeType::None);
    // Wired stop never ramps.
    assert!(s.delay().waits_ns().is_empty());
    assert!(s.stats().entries(ChargingState::CvMode) >= 1);
}
