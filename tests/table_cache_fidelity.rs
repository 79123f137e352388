// Integration tests for persisted interpolation tables

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use yapc::{
    clear_table_registry, table_path, ConstantRate, EnergyCutSettings, FastRng, Kernel,
    LifetimeDecay, LinearLoss, Medium, ParticleDef, ParticleState, PropagationOutcome,
    PropagationSettings, Propagator, SecondaryBank, TableEncoding, TrackingIntegral,
};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("yapc-{}-{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    let _ = fs::remove_file(&dir);
    dir
}

fn muon_propagator(settings: PropagationSettings) -> Propagator {
    let cuts = EnergyCutSettings::default();
    Propagator::builder(ParticleDef::muon(), Medium::standard_rock(), cuts)
        .process(Arc::new(LinearLoss::new(2.0, 4e-6, cuts).unwrap()))
        .process(Arc::new(ConstantRate::new(1e-3, 0.01, 0.3, cuts).unwrap()))
        .decay(Arc::new(LifetimeDecay::muon()))
        .settings(settings)
        .build()
        .unwrap()
}

fn check_fidelity(encoding: TableEncoding, nodes: usize) {
    let dir = scratch_dir(encoding.extension());
    let settings = PropagationSettings {
        interpolate: true,
        exact_time: true,
        table_directory: Some(dir.clone()),
        table_encoding: encoding,
        interpolation_nodes: nodes,
        table_upper_energy: 1e9,
        ..PropagationSettings::default()
    };

    let built = muon_propagator(settings.clone());
    let path = table_path(&dir, &built.table_key(), encoding);
    assert!(path.exists(), "no table at {}", path.display());

    clear_table_registry();
    let loaded = muon_propagator(settings);
    let (a, b) = (built.tables().unwrap(), loaded.tables().unwrap());
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(a.nodes(), b.nodes());

    for kernel in Kernel::ALL {
        let (ta, tb) = (a.get(kernel).unwrap(), b.get(kernel).unwrap());
        assert_eq!(ta.direction(), tb.direction());
        for &energy in &[150.0, 1e3, 3.3e4, 2e6, 5e8] {
            let (va, vb) = (ta.value(energy), tb.value(energy));
            assert!(
                (va - vb).abs() <= 1e-5 * va.abs().max(1e-300),
                "{} at {}: {} vs {}",
                kernel.name(),
                energy,
                va,
                vb
            );
            let (ka, kb) = (ta.kernel(energy), tb.kernel(energy));
            assert!((ka - kb).abs() <= 1e-5 * ka.abs().max(1e-300));
        }
    }

    // the reloaded tables reproduce exact quadrature, also just above Low
    let set = loaded.process_set();
    let low = set.low();
    let mut exact = TrackingIntegral::exact(set);
    let mut tabulated = TrackingIntegral::new(set, Some(b.as_ref()));
    for kernel in Kernel::ALL {
        for &energy in &[low + 0.1, low + 2.0, 120.0, 500.0, 3.3e4, 2e6, 5e8] {
            let expected = exact.depth_to_low(kernel, energy).unwrap();
            let actual = tabulated.depth_to_low(kernel, energy).unwrap();
            assert!(
                ((actual - expected) / expected).abs() < 1e-5,
                "{} at {}: {} vs {}",
                kernel.name(),
                energy,
                actual,
                expected
            );
        }
    }

    // the same stream through both propagators ends at the same energy
    for index in 0..10 {
        let mut state_a = ParticleState::at_origin(built.particle(), 1e5);
        let mut state_b = state_a.clone();
        let mut bank_a = SecondaryBank::new();
        let mut bank_b = SecondaryBank::new();
        let mut rng_a = FastRng::for_particle(77, index);
        let mut rng_b = FastRng::for_particle(77, index);
        let out_a = built.propagate(&mut state_a, 1e4, &mut rng_a, &mut bank_a);
        let out_b = loaded.propagate(&mut state_b, 1e4, &mut rng_b, &mut bank_b);
        match (out_a, out_b) {
            (
                PropagationOutcome::Reached { energy: ea },
                PropagationOutcome::Reached { energy: eb },
            ) => assert!((ea - eb).abs() <= 1e-5 * ea),
            (
                PropagationOutcome::StoppedEarly { distance: da },
                PropagationOutcome::StoppedEarly { distance: db },
            ) => assert!((da - db).abs() <= 1e-5 * da.max(1.0)),
            other => panic!("outcomes diverged: {:?}", other),
        }
        assert_eq!(bank_a.len(), bank_b.len());
    }

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_binary_tables_reload_faithfully() {
    check_fidelity(TableEncoding::Binary, 200);
}

#[test]
fn test_text_tables_reload_faithfully() {
    check_fidelity(TableEncoding::Text, 201);
}

#[test]
fn test_unwritable_directory_keeps_tables_in_memory() {
    let dir = scratch_dir("blocked");
    fs::write(&dir, b"not a directory").unwrap();
    let settings = PropagationSettings {
        interpolate: true,
        table_directory: Some(dir.join("tables")),
        table_encoding: TableEncoding::Binary,
        interpolation_nodes: 48,
        table_upper_energy: 1e8,
        ..PropagationSettings::default()
    };
    let propagator = muon_propagator(settings);
    assert!(propagator.is_interpolated());
    let _ = fs::remove_file(&dir);
}

#[test]
fn test_toggling_interpolation() {
    let settings = PropagationSettings {
        interpolate: false,
        table_directory: None,
        interpolation_nodes: 40,
        table_upper_energy: 1e8,
        ..PropagationSettings::default()
    };
    let mut propagator = muon_propagator(settings);
    assert!(!propagator.is_interpolated());
    propagator.enable_interpolation().unwrap();
    assert!(propagator.is_interpolated());
    assert!(propagator.settings().interpolate);
    propagator.disable_interpolation();
    assert!(!propagator.is_interpolated());
    assert!(propagator.tables().is_none());
}
