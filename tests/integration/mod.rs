//! End-to-end scan reduction on synthetic input trees.

use std::sync::Mutex;

use approx::assert_relative_eq;
use edd_fit::config::ScanSelector;
use edd_fit::models::PseudoVoigt;
use edd_fit::pipeline::ScanData;
use edd_fit::{Config, ConfigWarning, DataTree, EddError, MemoryTree, Pipeline};
use ndarray::{s, Array1, Array2, Ix2};

use crate::test_helpers::{detector_data, synthetic_trace, write_input_scan};

const SCAN: u32 = 5;
const POINTS: usize = 3;
const CHANNELS: usize = 200;
const DRIFT: f64 = 0.5;

fn peaks() -> Vec<PseudoVoigt> {
    vec![
        PseudoVoigt::new(40.0, 600.0, 5.0, 0.4),
        PseudoVoigt::new(120.0, 400.0, 5.0, 0.4),
        PseudoVoigt::new(145.0, 300.0, 5.0, 0.4),
        PseudoVoigt::new(170.0, 500.0, 5.0, 0.4),
    ]
}

fn config() -> Config {
    Config {
        sample: String::from("steel"),
        dataset: String::from("0001"),
        scan_number: ScanSelector::Single(SCAN),
        positioners: ["phi", "chi", "omega", "mu", "eta", "kappa"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        number_of_boxes: 2,
        nb_peaks_in_boxes: vec![1, 3],
        range_fit_hd: vec![10, 70, 100, 190],
        range_fit_vd: vec![12, 72, 100, 190],
        ..Config::default()
    }
}

/// One positioner array per configured positioner, varying with the point.
fn positioner_values(count: usize, points: usize) -> Vec<Vec<f64>> {
    (0..count)
        .map(|i| (0..points).map(|p| i as f64 * 10.0 + p as f64).collect())
        .collect()
}

fn input_tree(config: &Config, scans: &[u32]) -> MemoryTree {
    let data = detector_data(POINTS, CHANNELS, &peaks(), DRIFT);
    let mut tree = MemoryTree::new();
    for &scan in scans {
        write_input_scan(
            &mut tree,
            config,
            scan,
            &data,
            &data,
            &positioner_values(config.positioners.len(), POINTS),
        );
    }
    tree
}

fn read_table(tree: &MemoryTree, path: &str) -> Array2<f64> {
    tree.read_array(path)
        .unwrap()
        .into_dimensionality::<Ix2>()
        .unwrap()
}

#[test]
fn test_scan_output_layout() {
    let config = config();
    let input = input_tree(&config, &[SCAN]);
    let mut output = MemoryTree::new();

    let pipeline = Pipeline::new(config.clone()).unwrap();
    let report = pipeline.process_scan(&input, &mut output, SCAN).unwrap();

    let scan = config.scan_name(SCAN);
    assert_eq!(report.scan, scan);
    assert_eq!(report.points, POINTS);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.peak_records, 4);

    assert!(output.contains(&format!("{}/positioners/omega", scan)));
    assert!(output.contains(&format!("{}/rawData_0001_5/horizontalDetector", scan)));
    assert!(output.contains(&format!("{}/rawData_0001_5/verticalDetector", scan)));

    let fit_points = output.children(&format!("{}/fit", scan));
    assert_eq!(fit_points, vec!["0000", "0001", "0002"]);

    let line = format!("{}/fit/0001/fitLine_0001", scan);
    for name in ["channels", "rawData", "background", "fitted"] {
        for suffix in ["HD", "VD"] {
            let values = output.read_array(&format!("{}/{}{}", line, name, suffix)).unwrap();
            assert_eq!(values.len(), 90, "{}{}", name, suffix);
        }
    }
    let channels = output.read_array(&format!("{}/channelsVD", line)).unwrap();
    assert_eq!(channels.iter().next(), Some(&100.0));

    let box0 = output
        .read_array(&format!("{}/fit/0000/fitLine_0000/channelsVD", scan))
        .unwrap();
    assert_eq!(box0.len(), 60);
    assert_eq!(box0.iter().next(), Some(&12.0));

    assert_eq!(
        output.read_string(&format!("{}/info/scanNumber", scan)).unwrap(),
        "5"
    );
    assert_eq!(
        output.read_string(&format!("{}/info/nameVerticalDetector", scan)).unwrap(),
        "mca_det1"
    );
    let info_peak = output
        .read_string(&format!("{}/tthPositionsGroup/infoPeak", scan))
        .unwrap();
    assert!(info_peak.starts_with("phi, chi, omega, mu, eta, kappa, delta, two-theta"));
    assert!(info_peak.ends_with("goodness factor (area in uncertaintyPeak)"));
}

#[test]
fn test_fit_params_accumulate_all_boxes() {
    let config = config();
    let input = input_tree(&config, &[SCAN]);
    let mut output = MemoryTree::new();
    Pipeline::new(config.clone())
        .unwrap()
        .process_scan(&input, &mut output, SCAN)
        .unwrap();

    let scan = config.scan_name(SCAN);
    for point in 0..POINTS {
        for suffix in ["HD", "VD"] {
            let group = format!("{}/fit/{:04}/fitParams", scan, point);
            let params = read_table(&output, &format!("{}/fitParams{}", group, suffix));
            let errors = read_table(&output, &format!("{}/uncertaintyFitParams{}", group, suffix));

            // one row per peak, boxes in configuration order
            assert_eq!(params.dim(), (4, 6));
            assert_eq!(errors.dim(), (4, 5));
            for (row, truth) in peaks().iter().enumerate() {
                let expected = truth.position + DRIFT * point as f64;
                assert_relative_eq!(params[[row, 0]], expected, epsilon = 1e-3);
                assert_relative_eq!(params[[row, 1]], truth.intensity, max_relative = 1e-3);
            }
        }
    }
}

#[test]
fn test_peak_records_hold_last_point() {
    let config = config();
    let input = input_tree(&config, &[SCAN]);
    let mut output = MemoryTree::new();
    Pipeline::new(config.clone())
        .unwrap()
        .process_scan(&input, &mut output, SCAN)
        .unwrap();

    let group = format!("{}/tthPositionsGroup", config.scan_name(SCAN));
    let mut children = output.children(&group);
    children.sort();
    assert_eq!(children.len(), 9);
    assert!(children.contains(&String::from("peak_0003")));
    assert!(children.contains(&String::from("uncertaintyPeak_0000")));

    let last = POINTS - 1;
    let record = read_table(&output, &format!("{}/peak_0003", group));
    let errors = read_table(&output, &format!("{}/uncertaintyPeak_0003", group));
    assert_eq!(record.dim(), (2, 13));
    assert_eq!(errors.dim(), (2, 13));

    let positioners: Array1<f64> = positioner_values(6, POINTS).iter().map(|v| v[last]).collect();
    for row in 0..2 {
        assert_eq!(record.row(row).slice(ndarray::s![..6]), positioners);
        assert_relative_eq!(record[[row, 8]], 170.0 + DRIFT * last as f64, epsilon = 1e-3);
        assert!((0.0..=180.0).contains(&record[[row, 7]]));
        assert!(errors[[row, 8]] > 0.0);
    }
}

#[test]
fn test_existing_scan_requires_overwrite() {
    let config = config();
    let input = input_tree(&config, &[SCAN]);
    let mut output = MemoryTree::new();

    let pipeline = Pipeline::new(config.clone()).unwrap();
    pipeline.process_scan(&input, &mut output, SCAN).unwrap();
    let err = pipeline.process_scan(&input, &mut output, SCAN).unwrap_err();
    assert!(matches!(err, EddError::Store(_)));

    let replacing = Pipeline::new(Config {
        overwrite: true,
        ..config
    })
    .unwrap();
    let report = replacing.process_scan(&input, &mut output, SCAN).unwrap();
    assert_eq!(report.peak_records, 4);
}

#[test]
fn test_failed_box_is_reported_and_skipped() {
    // 20 channels cannot hold three peaks on the vertical detector
    let config = Config {
        range_fit_vd: vec![12, 72, 100, 120],
        ..config()
    };
    let input = input_tree(&config, &[SCAN]);
    let mut output = MemoryTree::new();

    let report = Pipeline::new(config.clone())
        .unwrap()
        .process_scan(&input, &mut output, SCAN)
        .unwrap();

    assert_eq!(report.failures.len(), POINTS);
    for (point, failure) in report.failures.iter().enumerate() {
        match failure {
            EddError::BoxFailed {
                point: failed_point,
                box_index,
                detector,
                source,
                ..
            } => {
                assert_eq!(*failed_point, point);
                assert_eq!(*box_index, 1);
                assert_eq!(detector, "vertical");
                assert!(matches!(**source, EddError::InsufficientData { .. }));
            }
            other => panic!("expected BoxFailed, got {:?}", other),
        }
    }

    let scan = config.scan_name(SCAN);
    let line = format!("{}/fit/0000/fitLine_0001", scan);
    assert!(output.contains(&format!("{}/rawDataVD", line)));
    assert!(!output.contains(&format!("{}/fittedVD", line)));
    assert!(output.contains(&format!("{}/fittedHD", line)));

    let params = format!("{}/fit/0000/fitParams", scan);
    assert!(output.contains(&format!("{}/fitParamsHD", params)));
    assert!(!output.contains(&format!("{}/fitParamsVD", params)));

    // only the peak of the first box was fitted on both detectors
    assert_eq!(report.peak_records, 1);
    let group = format!("{}/tthPositionsGroup", scan);
    assert!(output.contains(&format!("{}/peak_0000", group)));
    assert!(!output.contains(&format!("{}/peak_0001", group)));
}

#[test]
fn test_window_beyond_detector_is_rejected() {
    let config = Config {
        range_fit_hd: vec![10, 70, 150, 260],
        ..config()
    };
    let input = input_tree(&config, &[SCAN]);
    let err = Pipeline::new(config)
        .unwrap()
        .read_scan(&input, SCAN)
        .unwrap_err();
    assert!(matches!(err, EddError::DimensionMismatch(_)));
}

#[test]
fn test_excess_positioners_are_copied_but_unused() {
    let mut config = config();
    config.positioners.push(String::from("x"));
    config.positioners.push(String::from("y"));
    assert_eq!(
        config.warnings(),
        vec![ConfigWarning::ExcessPositioners { given: 8, used: 6 }]
    );

    let input = input_tree(&config, &[SCAN]);
    let pipeline = Pipeline::new(config.clone()).unwrap();
    let scan_data = pipeline.read_scan(&input, SCAN).unwrap();
    assert_eq!(scan_data.positioners.len(), 8);
    assert_eq!(scan_data.angles[1].angles(), &[1.0, 11.0, 21.0, 31.0, 41.0, 51.0]);

    let mut output = MemoryTree::new();
    pipeline.write_scan(&scan_data, &mut output, |_| ()).unwrap();
    let scan = config.scan_name(SCAN);
    assert!(output.contains(&format!("{}/positioners/y", scan)));
    let info_peak = output
        .read_string(&format!("{}/tthPositionsGroup/infoPeak", scan))
        .unwrap();
    assert!(!info_peak.contains("x, y"));
}

#[test]
fn test_single_point_scan_broadcasts_positioners() {
    let config = Config {
        number_of_boxes: 1,
        nb_peaks_in_boxes: vec![1],
        range_fit_hd: vec![10, 70],
        range_fit_vd: vec![10, 70],
        ..config()
    };
    let trace = detector_data(1, CHANNELS, &peaks(), 0.0);
    let flat = trace.row(0).to_owned();
    let name = config.scan_name(SCAN);

    let mut input = MemoryTree::new();
    for detector in [&config.horizontal_detector, &config.vertical_detector] {
        input
            .create_dataset(
                &format!("{}/measurement/{}", name, detector),
                flat.clone().into_dyn(),
            )
            .unwrap();
    }
    for (i, positioner) in config.positioners.iter().enumerate() {
        input
            .create_dataset(
                &format!("{}/instrument/positioners/{}", name, positioner),
                Array1::from_elem(1, i as f64).into_dyn(),
            )
            .unwrap();
    }

    let pipeline = Pipeline::new(config).unwrap();
    let scan = pipeline.read_scan(&input, SCAN).unwrap();
    assert_eq!(scan.points(), 1);
    assert_eq!(scan.angles[0].angles(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

    let mut output = MemoryTree::new();
    let report = pipeline.write_scan(&scan, &mut output, |_| ()).unwrap();
    assert_eq!(report.peak_records, 1);
}

#[test]
fn test_missing_positioner_is_missing_data() {
    let config = config();
    let mut input = input_tree(&config, &[SCAN]);
    assert!(input.remove(&format!("{}/instrument/positioners/mu", config.scan_name(SCAN))));

    let err = Pipeline::new(config)
        .unwrap()
        .read_scan(&input, SCAN)
        .unwrap_err();
    assert!(matches!(err, EddError::MissingData(_)));
}

#[test]
fn test_run_skips_missing_scans_and_appends() {
    let config = config();
    let input = input_tree(&config, &[SCAN, 8]);
    let mut output = MemoryTree::new();
    let pipeline = Pipeline::new(config.clone()).unwrap();

    let status = Mutex::new(0.0);
    let report = pipeline.run(&[SCAN, 6], &input, &mut output, &status).unwrap();
    assert_eq!(report.scans.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, 6);
    assert!(matches!(report.skipped[0].1, EddError::MissingData(_)));
    assert_eq!(report.failure_count(), 0);
    assert_eq!(*status.lock().unwrap(), 1.0);

    pipeline
        .run(&[8], &input, &mut output, &Mutex::new(0.0))
        .unwrap();
    assert!(output.contains(&config.scan_name(SCAN)));
    assert!(output.contains(&config.scan_name(8)));
}

#[test]
fn test_missing_positioner_rows_abandon_points() {
    let config = config();
    let input = input_tree(&config, &[SCAN]);
    let pipeline = Pipeline::new(config.clone()).unwrap();
    let mut scan = pipeline.read_scan(&input, SCAN).unwrap();
    scan.angles.truncate(1);

    let mut output = MemoryTree::new();
    let mut visited = Vec::new();
    let report = pipeline
        .write_scan(&scan, &mut output, |point| visited.push(point))
        .unwrap();

    assert_eq!(visited, vec![0, 1, 2]);
    assert!(report.failures.is_empty());
    let abandoned: Vec<usize> = report.point_failures.iter().map(|(p, _)| *p).collect();
    assert_eq!(abandoned, vec![1, 2]);
    for (_, failure) in &report.point_failures {
        assert!(matches!(failure, EddError::ShapeMismatch(_)));
    }

    // the scan is still complete for the points that could be reduced
    let name = config.scan_name(SCAN);
    assert!(output.contains(&format!("{}/fit/0000/fitParams/fitParamsHD", name)));
    assert!(!output.contains(&format!("{}/fit/0001", name)));
    assert!(output.contains(&format!("{}/tthPositionsGroup/infoPeak", name)));
    assert!(output.contains(&format!("{}/info/scanNumber", name)));

    let record = read_table(&output, &format!("{}/tthPositionsGroup/peak_0000", name));
    assert_relative_eq!(record[[0, 8]], 40.0, epsilon = 1e-3);
}

const LATE_POINTS: usize = 8;
const FIRST_FULL_POINT: usize = 3;

/// Peaks only appear from [`FIRST_FULL_POINT`] on. Before that every fit
/// window holds the bare background.
fn late_peak_scan(pipeline: &Pipeline, config: &Config) -> ScanData {
    let mut data = Array2::zeros((LATE_POINTS, CHANNELS));
    for point in 0..LATE_POINTS {
        let present = if point >= FIRST_FULL_POINT { peaks() } else { Vec::new() };
        let moved: Vec<PseudoVoigt> = present
            .iter()
            .map(|p| PseudoVoigt {
                position: p.position + DRIFT * point as f64,
                ..*p
            })
            .collect();
        let trace = synthetic_trace(0..CHANNELS, [15.0, 0.02], &moved, 0.0, 0);
        data.row_mut(point).assign(&Array1::from_vec(trace));
    }

    let mut input = MemoryTree::new();
    write_input_scan(
        &mut input,
        config,
        SCAN,
        &data,
        &data,
        &positioner_values(config.positioners.len(), LATE_POINTS),
    );
    pipeline.read_scan(&input, SCAN).unwrap()
}

fn first_points(scan: &ScanData, points: usize) -> ScanData {
    ScanData {
        horizontal: scan.horizontal.slice(s![..points, ..]).to_owned(),
        vertical: scan.vertical.slice(s![..points, ..]).to_owned(),
        angles: scan.angles[..points].to_vec(),
        ..scan.clone()
    }
}

#[test]
fn test_late_peak_is_created_once_and_updated() {
    let config = config();
    let pipeline = Pipeline::new(config.clone()).unwrap();
    let scan = late_peak_scan(&pipeline, &config);
    let group = format!("{}/tthPositionsGroup", config.scan_name(SCAN));

    // two boxes on two detectors fail at every point without peaks
    let failed_fits = 2 * 2 * FIRST_FULL_POINT;

    let mut output = MemoryTree::new();
    let report = pipeline
        .write_scan(&first_points(&scan, FIRST_FULL_POINT), &mut output, |_| ())
        .unwrap();
    assert_eq!(report.failures.len(), failed_fits);
    for failure in &report.failures {
        match failure {
            EddError::BoxFailed { point, source, .. } => {
                assert!(*point < FIRST_FULL_POINT);
                assert!(matches!(**source, EddError::FitConvergence(_)), "{:?}", source);
            }
            other => panic!("expected BoxFailed, got {:?}", other),
        }
    }
    assert_eq!(report.peak_records, 0);
    assert!(!output.contains(&format!("{}/peak_0002", group)));

    // the point where they appear creates their records
    let mut output = MemoryTree::new();
    let report = pipeline
        .write_scan(&first_points(&scan, FIRST_FULL_POINT + 1), &mut output, |_| ())
        .unwrap();
    assert_eq!(report.peak_records, 4);
    let record = read_table(&output, &format!("{}/peak_0002", group));
    assert_relative_eq!(record[[1, 8]], 145.0 + DRIFT * FIRST_FULL_POINT as f64, epsilon = 1e-3);

    // later points overwrite the same records
    let mut output = MemoryTree::new();
    let report = pipeline.write_scan(&scan, &mut output, |_| ()).unwrap();
    assert_eq!(report.failures.len(), failed_fits);
    assert_eq!(report.peak_records, 4);

    let children = output.children(&group);
    assert_eq!(children.len(), 9);
    assert_eq!(children.iter().filter(|c| *c == "peak_0002").count(), 1);

    let last = LATE_POINTS - 1;
    let record = read_table(&output, &format!("{}/peak_0002", group));
    let positioners: Array1<f64> = positioner_values(6, LATE_POINTS)
        .iter()
        .map(|v| v[last])
        .collect();
    for row in 0..2 {
        assert_eq!(record.row(row).slice(s![..6]), positioners);
        assert_relative_eq!(record[[row, 8]], 145.0 + DRIFT * last as f64, epsilon = 1e-3);
    }
}

#[cfg(feature = "hdf5")]
#[test]
fn test_process_reads_and_appends_hdf5_files() {
    use crate::test_helpers::scratch_path;
    use edd_fit::{process, Hdf5Tree};
    use std::sync::Arc;

    let input_path = scratch_path("process_input.h5");
    let output_path = scratch_path("process_output.h5");
    let _ = std::fs::remove_file(&output_path);

    let base = Config {
        file_read: input_path.clone(),
        file_save: output_path.clone(),
        ..config()
    };
    {
        let data = detector_data(POINTS, CHANNELS, &peaks(), DRIFT);
        let mut input = Hdf5Tree::create(&input_path).unwrap();
        for scan in [SCAN, 8] {
            write_input_scan(
                &mut input,
                &base,
                scan,
                &data,
                &data,
                &positioner_values(base.positioners.len(), POINTS),
            );
        }
    }

    let status = Arc::new(Mutex::new(0.0));
    let first = Config {
        scan_number: ScanSelector::List(vec![SCAN, 6]),
        ..base.clone()
    };
    let report = process(first, status.clone()).unwrap();
    assert_eq!(report.scans.len(), 1);
    assert_eq!(report.skipped[0].0, 6);
    assert_eq!(report.failure_count(), 0);
    assert_eq!(*status.lock().unwrap(), 1.0);

    let second = Config {
        scan_number: ScanSelector::Text(String::from("8")),
        ..base.clone()
    };
    process(second, Arc::new(Mutex::new(0.0))).unwrap();

    let saved = Hdf5Tree::open(&output_path).unwrap();
    assert!(saved.contains(&base.scan_name(SCAN)));
    assert!(saved.contains(&base.scan_name(8)));
    let record = saved
        .read_array(&format!("{}/tthPositionsGroup/peak_0003", base.scan_name(8)))
        .unwrap();
    assert_eq!(record.shape(), &[2, 13]);
    assert!(saved
        .read_string(&format!("{}/tthPositionsGroup/infoPeak", base.scan_name(SCAN)))
        .unwrap()
        .contains("area in uncertaintyPeak"));
    drop(saved);

    let _ = std::fs::remove_file(&input_path);
    let _ = std::fs::remove_file(&output_path);
}
