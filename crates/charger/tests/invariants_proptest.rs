//! Property-based tests for the control loop and session unwind.
//! Verifies invariants hold for arbitrary measurement sequences, not just
//! the fixed scenarios.
#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use direct_charger::compensation::{
    Compensation, ControlLoop, CURRENT_COMP, CURRENT_COMP_CP, RX_VOLTAGE_COMP, VOLTAGE_COMP,
};
use direct_charger::limits::AdapterLimits;
use direct_charger::{ChargerConfig, ChargerSession, ChargingState, TaType, TimerId};
use platform::mocks::{MockAdapter, MockChargerIc, MockDelay, MockScheduler};
use platform::{AdcChannel, StatusFlags};
use proptest::prelude::*;

type Session = ChargerSession<MockChargerIc, MockAdapter, MockAdapter, MockDelay, MockScheduler>;

const TABLES: [&Compensation; 4] = [&CURRENT_COMP, &CURRENT_COMP_CP, &VOLTAGE_COMP, &RX_VOLTAGE_COMP];

fn status_strategy() -> impl Strategy<Value = StatusFlags> {
    prop_oneof![
        4 => Just(StatusFlags::ACTIVE),
        1 => Just(StatusFlags::ACTIVE | StatusFlags::IIN_LOOP),
        1 => Just(StatusFlags::ACTIVE | StatusFlags::IBAT_LOOP),
        1 => Just(StatusFlags::ACTIVE | StatusFlags::VFLOAT_LOOP),
        1 => Just(StatusFlags::ACTIVE | StatusFlags::VIN_UVLO),
        1 => Just(StatusFlags::RCP),
    ]
}

fn wired_session() -> Session {
    let mut ic = MockChargerIc::new();
    ic.set_status(StatusFlags::ACTIVE);
    Session::new(
        ChargerConfig::ln8411_reference(),
        ic,
        Some(MockAdapter::pps(&[(11_000_000, 3_000_000), (21_000_000, 3_250_000)])),
        None,
        MockDelay::new(),
        MockScheduler::new(),
    )
}

fn assert_clamped(lp: &ControlLoop) {
    let l = lp.limits;
    assert!(lp.ta_vol >= l.min_vol && lp.ta_vol <= lp.ta_max_vol.max(l.min_vol));
    assert!(lp.ta_cur >= l.min_cur && lp.ta_cur <= lp.ta_max_cur.max(l.min_cur));
}

proptest! {
    /// Every compensation variant keeps the setpoint inside the adapter range.
    #[test]
    fn compensation_never_leaves_adapter_range(
        table in 0usize..4,
        wireless in any::<bool>(),
        max_vol in 4_000_000u32..=21_000_000,
        max_cur in 1_000_000u32..=5_000_000,
        iin_cc in 500_000u32..=3_000_000,
        samples in proptest::collection::vec(0u32..=4_000_000, 1..64),
    ) {
        let mut lp = ControlLoop::new();
        lp.limits = if wireless { AdapterLimits::WIRELESS } else { AdapterLimits::WIRED };
        lp.ta_max_vol = max_vol;
        lp.ta_max_cur = max_cur;
        lp.iin_cc = iin_cc;
        lp.ta_vol = max_vol / 2;
        lp.ta_cur = iin_cc;
        lp.clamp();

        let comp = TABLES.get(table).copied().unwrap();
        for iin in samples {
            comp.compensate(&mut lp, iin);
            assert_clamped(&lp);
            prop_assert_eq!(lp.prev_iin, iin);
        }
    }

    /// Inside the band nothing but `prev_iin` changes.
    #[test]
    fn in_band_sample_is_a_no_op(offset in 0u32..=40_000, below in any::<bool>()) {
        let mut lp = ControlLoop::new();
        lp.ta_max_vol = 11_000_000;
        lp.ta_max_cur = 3_000_000;
        lp.iin_cc = 2_000_000;
        lp.ta_vol = 8_000_000;
        lp.ta_cur = 2_000_000;
        let iin = if below { lp.iin_cc - offset } else { lp.iin_cc + offset };
        let before = lp;

        let outcome = CURRENT_COMP.compensate(&mut lp, iin);

        prop_assert!(!outcome.needs_message());
        prop_assert_eq!(lp.ta_vol, before.ta_vol);
        prop_assert_eq!(lp.ta_cur, before.ta_cur);
        prop_assert_eq!(lp.prev_iin, iin);
    }

    /// Whatever the session went through, stopping resets it completely.
    #[test]
    fn stop_resets_session_from_any_state(
        ticks in proptest::collection::vec((0u32..=3_500_000, status_strategy()), 0..48),
    ) {
        let mut s = wired_session();
        s.set_target(6_000_000, 4_400_000).unwrap();
        s.set_charging_enabled(1).unwrap();

        for (iin, status) in ticks {
            s.ic_mut().set_adc(AdcChannel::InputCurrent, iin);
            s.ic_mut().set_status(status);
            if s.handle_timer().is_err() {
                prop_assert_eq!(s.charging_state(), ChargingState::NoCharging);
                break;
            }
            if s.control_loop().ta_max_vol > 0 {
                assert_clamped(s.control_loop());
            }
        }

        s.stop_charging();

        prop_assert_eq!(s.charging_state(), ChargingState::NoCharging);
        prop_assert_eq!(s.ret_state(), None);
        prop_assert_eq!(s.ta_type(), TaType::Unknown);
        prop_assert_eq!(s.cc_max(), None);
        prop_assert_eq!(s.fv_uv(), None);
        prop_assert_eq!(s.new_iin(), None);
        prop_assert_eq!(s.new_vfloat(), None);
        prop_assert_eq!(s.retry_cnt(), 0);
        prop_assert_eq!(s.timer_id(), TimerId::None);
        prop_assert_eq!(s.source(), None);
        prop_assert!(!s.keepalive_armed());
        prop_assert_eq!(s.scheduler().pending(), None);
        prop_assert_eq!(s.control_loop(), &ControlLoop::new());
        prop_assert!(!s.ic().is_enabled());
    }

    /// With both targets present a usable battery goes straight to preset.
    #[test]
    fn valid_targets_skip_the_retry_path(vbat in 3_400_000u32..=4_400_000) {
        let mut s = wired_session();
        s.ic_mut().set_adc(AdcChannel::BatteryVoltage, vbat);
        s.set_target(6_000_000, 4_400_000).unwrap();
        s.set_charging_enabled(1).unwrap();
        s.handle_timer().unwrap();

        prop_assert_eq!(s.charging_state(), ChargingState::PresetDc);
        prop_assert_eq!(s.retry_cnt(), 0);
        prop_assert_eq!(s.timer_id(), TimerId::PresetDc);
    }
}
