//! End-to-end scPDSI scenarios on single cells
use approx::assert_relative_eq;
use scpdsi_core::{
    compute_cell, percentile, CalibrationWarning, CellForcing, PdsiConfig, SpellFactors,
    SpellPhase, SpellSide, SyntheticForcing, WaterBalanceMonth,
};
use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Steady 60 mm/month with a year of 10 mm/month starting at month 60
fn drought_forcing() -> CellForcing {
    let mut precip = vec![60.0; 120];
    for p in &mut precip[60..72] {
        *p = 10.0;
    }
    CellForcing::new(precip, vec![60.0; 120], 150.0).unwrap()
}

#[test]
fn test_constant_climate_is_neutral() {
    let forcing = CellForcing::new(vec![60.0; 120], vec![60.0; 120], 150.0).unwrap();
    let output = compute_cell(&forcing, &PdsiConfig::default()).unwrap();

    assert!(output.raw_z_index.iter().all(|&z| z == 0.0));
    assert!(output.pdsi.iter().all(|&x| x == 0.0));
    assert!(output.phases.iter().all(|&p| p == SpellPhase::None));
    assert!(output.transitions.is_empty());

    // No spell signal at all: both sides fall back to Palmer's constants
    let meta = &output.metadata;
    assert!(meta.fallback_used);
    assert!(meta.converged);
    assert_eq!(meta.wet, SpellFactors::PALMER);
    assert_eq!(meta.dry, SpellFactors::PALMER);
}

#[test]
fn test_imposed_drought_is_detected() {
    let output = compute_cell(&drought_forcing(), &PdsiConfig::default()).unwrap();

    // PDSI falls every month of the dry year
    for month in 60..72 {
        assert!(
            output.pdsi[month] < output.pdsi[month - 1],
            "PDSI rose at month {month}: {} -> {}",
            output.pdsi[month - 1],
            output.pdsi[month]
        );
    }
    assert!(output.pdsi[71] < -3.0);

    let incipient = output
        .transitions
        .iter()
        .find(|t| t.to == SpellPhase::IncipientDry)
        .expect("no incipient drought");
    let established = output
        .transitions
        .iter()
        .find(|t| t.to == SpellPhase::EstablishedDry)
        .expect("no established drought");
    assert!((60..72).contains(&incipient.month));
    assert!((60..72).contains(&established.month));
    assert!(incipient.month <= established.month);
    assert_eq!(established.from, SpellPhase::IncipientDry);

    // Percentiles calibrated onto ±4
    assert!(output.metadata.converged);
    assert_relative_eq!(percentile(&output.pdsi, 98.0).unwrap(), 4.0, max_relative = 5e-3);
    assert_relative_eq!(percentile(&output.pdsi, 2.0).unwrap(), -4.0, max_relative = 5e-3);
}

#[test]
fn test_drought_wet_fit_is_clamped() {
    let config = PdsiConfig::default();
    let output = compute_cell(&drought_forcing(), &config).unwrap();
    let meta = &output.metadata;

    assert!(meta
        .warnings
        .iter()
        .any(|w| matches!(w, CalibrationWarning::FactorsClamped { side: SpellSide::Wet, .. })));
    assert!(config.calibration.p_range.contains(meta.wet.p));
    assert!(config.calibration.q_range.contains(meta.wet.q));
    assert!(meta.dry.is_valid());
}

#[test]
fn test_idempotent() {
    let grid = SyntheticForcing {
        n_months: 240,
        n_cells: 1,
        seed: 11,
        ..SyntheticForcing::default()
    }
    .generate()
    .unwrap();
    let forcing = grid.cell(0).unwrap();
    let config = PdsiConfig::default();

    let first = compute_cell(&forcing, &config).unwrap();
    let second = compute_cell(&forcing, &config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_supplied_components_drive_cafec() {
    let config = PdsiConfig::default();
    let base = compute_cell(&drought_forcing(), &config).unwrap();
    let wb = &base.water_balance;
    let column = |f: fn(&WaterBalanceMonth) -> f64| wb.iter().map(f).collect::<Vec<_>>();

    // The store's own terms reproduce the built-in run exactly
    let echoed = drought_forcing()
        .with_components(
            column(|m| m.evapotranspiration),
            column(|m| m.recharge),
            column(|m| m.runoff),
            column(|m| m.loss),
        )
        .unwrap();
    assert_eq!(compute_cell(&echoed, &config).unwrap(), base);

    // A model that evaporates half as much
    let halved = drought_forcing()
        .with_components(
            column(|m| 0.5 * m.evapotranspiration),
            column(|m| m.recharge),
            column(|m| m.runoff),
            column(|m| m.loss),
        )
        .unwrap();
    let output = compute_cell(&halved, &config).unwrap();

    for (month, reference) in output.water_balance.iter().zip(wb) {
        assert_eq!(month.potential_recharge, reference.potential_recharge);
        assert_eq!(month.potential_loss, reference.potential_loss);
        assert_relative_eq!(month.evapotranspiration, 0.5 * reference.evapotranspiration);
    }
    for (alpha, reference) in output.metadata.cafec.alpha.iter().zip(&base.metadata.cafec.alpha) {
        assert_relative_eq!(*alpha, 0.5 * reference, epsilon = 1e-12);
    }
    assert_ne!(output.raw_z_index, base.raw_z_index);
    assert!(output.pdsi.iter().all(|x| x.is_finite()));
}

#[test]
fn test_zero_awc_is_finite() {
    let precip: Vec<f64> = (0..120_usize).map(|i| 20.0 + 60.0 * ((i as f64) * 0.8).sin().abs()).collect();
    let pet = vec![50.0; 120];

    let zero = CellForcing::new(precip.clone(), pet.clone(), 0.0).unwrap();
    let tiny = CellForcing::new(precip, pet, 1e-9).unwrap();
    let config = PdsiConfig::default();

    let zero_output = compute_cell(&zero, &config).unwrap();
    let tiny_output = compute_cell(&tiny, &config).unwrap();

    assert!(zero_output.pdsi.iter().all(|x| x.is_finite()));
    assert!(zero_output.z_index.iter().all(|x| x.is_finite()));
    assert_eq!(zero_output.pdsi, tiny_output.pdsi);
    for month in &zero_output.water_balance {
        assert_eq!(month.loss, 0.0);
        assert_eq!(month.recharge, 0.0);
        assert!(month.mass_balance_residual().abs() < 1e-12);
    }
}

#[test]
fn test_mass_balance_and_storage_bounds() {
    let grid = SyntheticForcing {
        n_months: 360,
        n_cells: 4,
        seed: 5,
        ..SyntheticForcing::default()
    }
    .generate()
    .unwrap();

    for cell in 0..grid.n_cells() {
        let forcing = grid.cell(cell).unwrap();
        let awc = *forcing.awc();
        let output = compute_cell(&forcing, &PdsiConfig::default()).unwrap();

        for month in &output.water_balance {
            assert!(month.mass_balance_residual().abs() < 1e-9);
            let storage = month.surface_end + month.underlying_end;
            assert!((-1e-9..=awc + 1e-9).contains(&storage));
            assert_relative_eq!(
                month.precip - month.evapotranspiration - month.runoff,
                month.storage_change(),
                epsilon = 1e-9
            );
        }
    }
}

#[test]
fn test_disabled_calibration_uses_classic_constants() {
    let mut config = PdsiConfig::default();
    config.calibration.enabled = false;
    let output = compute_cell(&drought_forcing(), &config).unwrap();

    assert_eq!(output.metadata.wet, SpellFactors { p: 0.897, q: 1.0 / 3.0 });
    assert_eq!(output.metadata.dry, SpellFactors::PALMER);
    assert!(!output.metadata.fallback_used);
    assert_eq!(output.z_index, output.raw_z_index);
}

#[test]
fn test_short_history_reports_fallback() {
    let forcing = CellForcing::new(vec![40.0; 36], vec![55.0; 36], 120.0).unwrap();
    let output = compute_cell(&forcing, &PdsiConfig::default()).unwrap();

    assert!(output.metadata.fallback_used);
    assert_eq!(
        output.metadata.warnings,
        vec![CalibrationWarning::InsufficientHistory {
            months: 36,
            required: 60
        }]
    );
    assert_eq!(output.len(), 36);
}

#[test]
fn test_synthetic_cells_calibrate_into_range() {
    let config = PdsiConfig::default();
    let grid = SyntheticForcing {
        n_months: 480,
        n_cells: 6,
        seed: 3,
        ..SyntheticForcing::default()
    }
    .generate()
    .unwrap();

    for cell in 0..grid.n_cells() {
        let output = compute_cell(&grid.cell(cell).unwrap(), &config).unwrap();
        let meta = &output.metadata;
        for factors in [meta.wet, meta.dry] {
            assert!(config.calibration.p_range.contains(factors.p));
            assert!(config.calibration.q_range.contains(factors.q));
        }
        assert!(meta.k.iter().all(|&k| k > 0.0 && k.is_finite()));
        assert!(output.pdsi.iter().all(|x| x.is_finite()));
        for t in &output.transitions {
            if t.to.is_established() {
                assert_eq!(t.from.side(), t.to.side());
                assert!(!t.from.is_established());
            }
        }
    }
}
