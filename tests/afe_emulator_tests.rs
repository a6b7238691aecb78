use approx::assert_abs_diff_eq;
use bms_sil::afe::{status, AfeConfig, AfeEmulator, AfeFaultKind, NoiseConfig};
use bms_sil::plant::NUM_CELLS;
use bms_sil::SimError;

const TRUE_MV: [f64; NUM_CELLS] = [3300.0; NUM_CELLS];
const TRUE_C: [f64; NUM_CELLS] = [25.0; NUM_CELLS];
const TRUE_MA: f64 = -40_000.0;

fn ideal_afe() -> AfeEmulator {
    AfeEmulator::new(AfeConfig::ideal(), 42).unwrap()
}

#[test]
fn test_quantization_is_exact_and_idempotent() {
    let mut afe = ideal_afe();
    let mut voltages = TRUE_MV;
    voltages[0] = 3200.123;

    for t in 0..5 {
        let m = afe.apply_measurement(&voltages, &TRUE_C, TRUE_MA, f64::from(t) * 100.0);
        assert_eq!(m.cell_voltages_mv[0], 3200.1);
    }
}

#[test]
fn test_measured_values_stay_on_adc_grid() {
    let mut afe = AfeEmulator::new(AfeConfig::default(), 3).unwrap();
    for t in 0..200 {
        let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, f64::from(t));
        for v in m.cell_voltages_mv {
            let steps = v * 10.0;
            assert_abs_diff_eq!(steps, steps.round(), epsilon = 1e-6);
            assert!((0.0..=6553.5).contains(&v));
        }
        for t_cc in m.cell_temperatures_cc {
            assert_eq!(t_cc % 10, 0, "temperature {} not on 0.1 °C grid", t_cc);
        }
        assert_eq!(m.pack_current_ma, m.pack_current_ma.round());
    }
}

#[test]
fn test_calibration_error_bounded_without_noise() {
    let config = AfeConfig {
        noise: NoiseConfig::none(),
        ..AfeConfig::default()
    };
    let mut afe = AfeEmulator::new(config, 8).unwrap();
    let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 0.0);

    for v in m.cell_voltages_mv {
        // gain +/-0.1% of 3300 mV plus offset +/-5 mV plus half an LSB
        assert!((v - 3300.0).abs() <= 3.3 + 5.0 + 0.05);
    }
    for t_cc in m.cell_temperatures_cc {
        assert!((i32::from(t_cc) - 2500).abs() <= 105);
    }
    assert!((m.pack_current_ma - TRUE_MA).abs() <= 80.0 + 10.0 + 0.5);
}

#[test]
fn test_open_wire_round_trip() {
    let mut afe = ideal_afe();
    afe.inject_fault(AfeFaultKind::OpenWire, Some(1 << 5), None).unwrap();

    let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 0.0);
    assert_eq!(m.cell_voltages_mv[5], 0.0);
    assert_eq!(m.status_flags & (1 << 5), 1 << 5);

    afe.clear_fault(AfeFaultKind::OpenWire, Some(1 << 5));
    let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 100.0);
    assert_eq!(m.cell_voltages_mv[5], 3300.0);
    assert_eq!(m.status_flags & (1 << 5), 0);
}

#[test]
fn test_stuck_adc_persists_while_true_voltage_moves() {
    let mut afe = ideal_afe();
    let captured = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 0.0).cell_voltages_mv[3];
    afe.inject_fault(AfeFaultKind::StuckAdc, Some(1 << 3), None).unwrap();

    let mut raised = TRUE_MV;
    for step in 1..=10 {
        raised[3] = 3300.0 + 30.0 * f64::from(step);
        let m = afe.apply_measurement(&raised, &TRUE_C, TRUE_MA, f64::from(step) * 100.0);
        assert_eq!(m.cell_voltages_mv[3], captured);
    }
    assert_eq!(raised[3], 3600.0);
    // Stuck ADC is invisible in the status word
    assert_eq!(afe.status_flags(), 0);

    afe.clear_fault(AfeFaultKind::StuckAdc, None);
    let m = afe.apply_measurement(&raised, &TRUE_C, TRUE_MA, 1100.0);
    assert_eq!(m.cell_voltages_mv[3], 3600.0);
}

#[test]
fn test_stuck_adc_injected_before_first_read_captures_it() {
    let mut afe = ideal_afe();
    afe.inject_fault(AfeFaultKind::StuckAdc, Some(0b1), None).unwrap();

    let first = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 0.0);
    let mut moved = TRUE_MV;
    moved[0] = 3000.0;
    let second = afe.apply_measurement(&moved, &TRUE_C, TRUE_MA, 100.0);

    assert_eq!(first.cell_voltages_mv[0], 3300.0);
    assert_eq!(second.cell_voltages_mv[0], 3300.0);
}

#[test]
fn test_ntc_faults_on_last_cells_alias_current_and_crc_bits() {
    let mut afe = ideal_afe();
    afe.inject_fault(AfeFaultKind::NtcOpen, Some(1 << 14 | 1 << 15), None).unwrap();
    let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 0.0);

    assert_eq!(m.cell_temperatures_cc[14], i16::MIN);
    assert_eq!(m.cell_temperatures_cc[15], i16::MIN);
    assert_eq!(m.status_flags, status::CURRENT_SENSOR_FAULT | status::CRC_ERROR);

    let stats = afe.statistics();
    assert_eq!(stats.ntc_fault_mask, 0xC000);
    assert!(!stats.current_sensor_fault);
    assert_eq!(stats.crc_error_count, 0);
}

#[test]
fn test_zero_measured_current_flags_sensor() {
    let mut afe = ideal_afe();
    let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, 0.0, 0.0);
    assert_eq!(m.status_flags, status::CURRENT_SENSOR_FAULT);
}

#[test]
fn test_crc_error_rate_statistics() {
    let mut afe = ideal_afe();
    afe.set_crc_error_rate(0.1).unwrap();

    let mut flagged = 0u32;
    for t in 0..10_000 {
        let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, f64::from(t));
        if m.status_flags & status::CRC_ERROR != 0 {
            flagged += 1;
        }
    }

    let fraction = f64::from(flagged) / 10_000.0;
    assert!((0.08..=0.12).contains(&fraction), "observed CRC rate {}", fraction);

    let stats = afe.statistics();
    assert_eq!(stats.measurement_count, 10_000);
    assert_eq!(stats.crc_error_count, u64::from(flagged));
    assert_abs_diff_eq!(stats.crc_error_rate_observed, fraction, epsilon = 1e-12);
}

#[test]
fn test_invalid_crc_rate_rejected() {
    let mut afe = ideal_afe();
    assert!(matches!(afe.set_crc_error_rate(1.01), Err(SimError::InvalidArgument(_))));
    assert!(afe.set_crc_error_rate(f64::NAN).is_err());
    assert_eq!(afe.crc_error_rate(), 0.0);
}

#[test]
fn test_scheduled_fault_window_on_simulated_time() {
    let mut afe = ideal_afe();
    afe.schedule_fault(AfeFaultKind::CurrentSensorFault, 1000.0, None, Some(500.0))
        .unwrap();
    assert_eq!(afe.pending_faults().len(), 1);

    let at = |afe: &mut AfeEmulator, t: f64| afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, t);

    assert_eq!(at(&mut afe, 999.0).pack_current_ma, TRUE_MA);
    assert_eq!(at(&mut afe, 1000.0).pack_current_ma, 0.0);
    assert_eq!(at(&mut afe, 1499.0).status_flags, status::CURRENT_SENSOR_FAULT);
    assert_eq!(at(&mut afe, 1500.0).pack_current_ma, TRUE_MA);
    assert!(afe.pending_faults().is_empty());
}

#[test]
fn test_permanent_scheduled_fault_stays_active() {
    let mut afe = ideal_afe();
    afe.schedule_fault(AfeFaultKind::NtcShort, 200.0, Some(0b10), None).unwrap();

    afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 200.0);
    assert!(afe.pending_faults().is_empty());

    let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 1_000_000.0);
    assert_eq!(m.cell_temperatures_cc[1], i16::MIN);
}

#[test]
fn test_reset_clears_faults_but_keeps_calibration() {
    let mut afe = AfeEmulator::new(AfeConfig::default(), 77).unwrap();
    let calibration = afe.calibration().clone();

    afe.inject_fault(AfeFaultKind::OpenWire, Some(0xFFFF), None).unwrap();
    afe.inject_fault(AfeFaultKind::CurrentSensorFault, None, None).unwrap();
    afe.schedule_fault(AfeFaultKind::CrcError, 10.0, None, None).unwrap();
    afe.set_crc_error_rate(0.5).unwrap();
    afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 0.0);

    afe.reset();

    assert_eq!(afe.calibration(), &calibration);
    let stats = afe.statistics();
    assert_eq!(stats.measurement_count, 0);
    assert_eq!(stats.crc_error_count, 0);
    assert_eq!(stats.open_wire_mask, 0);
    assert!(!stats.current_sensor_fault);
    assert_eq!(stats.pending_scheduled, 0);
    assert_eq!(afe.crc_error_rate(), 0.0);

    let m = afe.apply_measurement(&TRUE_MV, &TRUE_C, TRUE_MA, 0.0);
    assert_eq!(m.status_flags, 0);
}

#[test]
fn test_calibration_fixed_per_seed() {
    let a = AfeEmulator::new(AfeConfig::default(), 5).unwrap();
    let b = AfeEmulator::new(AfeConfig::default(), 5).unwrap();
    let c = AfeEmulator::new(AfeConfig::default(), 6).unwrap();

    assert_eq!(a.calibration(), b.calibration());
    assert_ne!(a.calibration(), c.calibration());
}

#[test]
fn test_fault_kind_parsed_from_text() {
    let kind: AfeFaultKind = "current_sensor_fault".parse().unwrap();
    assert_eq!(kind, AfeFaultKind::CurrentSensorFault);
    assert!("open-wire".parse::<AfeFaultKind>().is_err());
}
