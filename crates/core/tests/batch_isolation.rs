//! Batch runner: failure isolation, cancellation and output layout
use scpdsi_core::metrics::{linear_trend_map, temporal_corr_map};
use scpdsi_core::{
    compute_cell, BatchRunner, CancellationToken, CellFailure, DroughtEvent, GridForcing,
    PdsiConfig, PdsiError, SyntheticForcing,
};
use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn synthetic_grid(n_cells: usize) -> GridForcing {
    SyntheticForcing {
        n_months: 240,
        n_cells,
        seed: 21,
        ..SyntheticForcing::default()
    }
    .with_drought(DroughtEvent {
        start: 120,
        months: 18,
        precip: 5.0,
    })
    .generate()
    .unwrap()
}

/// Copy a grid with one precipitation value replaced
fn poison(grid: &GridForcing, cell: usize, month: usize, value: f64) -> GridForcing {
    let columns = (0..grid.n_cells())
        .map(|c| {
            let forcing = grid.cell(c).unwrap();
            let mut precip = forcing.precip().to_vec();
            if c == cell {
                precip[month] = value;
            }
            (precip, forcing.pet().to_vec(), *forcing.awc())
        })
        .collect();
    GridForcing::from_columns(columns).unwrap()
}

#[test]
fn test_nan_cell_fails_alone() {
    let clean = synthetic_grid(5);
    let grid = poison(&clean, 2, 17, f64::NAN);
    let config = PdsiConfig::default();
    let result = BatchRunner::new(config.clone()).unwrap().run(&grid, None);

    assert_eq!(result.n_cells(), 5);
    assert_eq!(result.succeeded(), 4);
    match result.cell(2) {
        Some(Err(CellFailure::Pdsi(PdsiError::InvalidForcing { month, .. }))) => {
            assert_eq!(*month, Some(17));
        }
        other => panic!("expected invalid forcing, got {other:?}"),
    }

    // Other cells are identical to running them alone
    for cell in [0, 1, 3, 4] {
        let alone = compute_cell(&clean.cell(cell).unwrap(), &config).unwrap();
        let batched = result.cell(cell).unwrap().as_ref().unwrap();
        assert_eq!(&alone, batched);
    }

    let pdsi = result.pdsi();
    assert!((0..pdsi.n_months()).all(|m| pdsi.get(m, 2).is_none()));
    assert!((0..pdsi.n_months()).all(|m| pdsi.get(m, 0).is_some()));
    assert_eq!(result.failure_summary().get("invalid_forcing"), Some(&1));
}

#[test]
fn test_negative_precip_fails_alone() {
    let grid = poison(&synthetic_grid(3), 0, 0, -1.0);
    let result = BatchRunner::new(PdsiConfig::default())
        .unwrap()
        .run(&grid, None);

    assert!(result.cell(0).unwrap().is_err());
    assert!(result.cell(1).unwrap().is_ok());
    assert!(result.cell(2).unwrap().is_ok());
}

#[test]
fn test_cancelled_token_skips_every_cell() {
    let token = CancellationToken::new();
    token.cancel();
    let result = BatchRunner::new(PdsiConfig::default())
        .unwrap()
        .run(&synthetic_grid(4), Some(&token));

    assert_eq!(result.succeeded(), 0);
    assert_eq!(result.failure_summary().get("cancelled"), Some(&4));
    assert!(result.pdsi().values().iter().all(|x| x.is_nan()));
}

#[test]
fn test_time_major_output_matches_cells() {
    let grid = synthetic_grid(3);
    let result = BatchRunner::new(PdsiConfig::default())
        .unwrap()
        .with_threads(2)
        .run(&grid, None);

    let pdsi = result.pdsi();
    let z = result.z_index();
    assert_eq!(pdsi.n_months(), 240);
    assert_eq!(pdsi.n_cells(), 3);

    for (cell, outcome) in result.cells().iter().enumerate() {
        let output = outcome.as_ref().unwrap();
        for month in [0, 57, 121, 239] {
            assert_eq!(pdsi.get(month, cell), Some(output.pdsi[month]));
            assert_eq!(pdsi.values()[month * 3 + cell], output.pdsi[month]);
            assert_eq!(z.get(month, cell), Some(output.z_index[month]));
        }
        assert!(result.metadata(cell).is_some());
    }
}

#[test]
fn test_imposed_drought_visible_in_every_cell() {
    let result = BatchRunner::new(PdsiConfig::default())
        .unwrap()
        .run(&synthetic_grid(4), None);
    let pdsi = result.pdsi();

    for cell in 0..pdsi.n_cells() {
        let end_of_drought = pdsi.get(137, cell).unwrap();
        assert!(end_of_drought < -2.0, "cell {cell}: {end_of_drought}");
    }
}

#[test]
fn test_diagnostic_maps() {
    let result = BatchRunner::new(PdsiConfig::default())
        .unwrap()
        .run(&poison(&synthetic_grid(3), 1, 5, f64::INFINITY), None);
    let pdsi = result.pdsi();

    let trends = linear_trend_map(&pdsi, 1.0 / 12.0);
    assert_eq!(trends.len(), 3);
    assert!(trends[0].is_some());
    assert!(trends[1].is_none());

    let corr = temporal_corr_map(&pdsi, &result.z_index());
    assert!(corr[0].is_some_and(|r| r > 0.0 && r <= 1.0 + 1e-12));
    assert!(corr[1].is_none());
}
