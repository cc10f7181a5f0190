//! Scan-level reduction.
//!
//! For every scan point and every fit box both detectors are fitted, the box
//! results are accumulated into per-detector peak tables, and every peak is
//! turned into a row of angles in the scan's peak records. The output tree
//! for scan `{scan}` is laid out as
//!
//! ```text
//! {scan}/positioners/{name}
//! {scan}/rawData_{dataset}_{scanNumber}/{horizontalDetector,verticalDetector}
//! {scan}/fit/{point:04}/fitParams/{fitParams,uncertaintyFitParams}{HD,VD}
//! {scan}/fit/{point:04}/fitLine_{box:04}/{channels,rawData,background,fitted}{HD,VD}
//! {scan}/tthPositionsGroup/{peak,uncertaintyPeak}_{n:04}
//! {scan}/tthPositionsGroup/infoPeak
//! {scan}/info/...
//! ```

#[cfg(feature = "hdf5")]
use std::sync::Arc;
use std::sync::Mutex;

use ndarray::{s, Array1, Array2, ArrayD, Ix1, Ix2};

use crate::accumulator::PointAccumulator;
use crate::config::{Config, FitBox};
use crate::error::{EddError, Result};
use crate::fit::{BoxFit, PeakFitter, PARAMS_PER_PEAK, UNCERTAINTIES_PER_PEAK};
use crate::geometry::{AngleReconstructor, Detector, PositionerVector, POSITIONER_COUNT};
#[cfg(feature = "hdf5")]
use crate::store::Hdf5Tree;
use crate::store::{join_path, DataTree, PeakRecords};

/// Column description stored next to the peak records.
const PEAK_COLUMNS: &str = "delta, two-theta, position in channel, intensity, FWHM, \
     shape factor, goodness factor (area in uncertaintyPeak)";

/// Raw inputs of one scan.
#[derive(Debug, Clone)]
pub struct ScanData {
    pub scan_number: u32,
    pub name: String,
    /// Points x channels
    pub horizontal: Array2<f64>,
    /// Points x channels
    pub vertical: Array2<f64>,
    /// Positioner arrays as read, in configuration order
    pub positioners: Vec<(String, ArrayD<f64>)>,
    /// Goniometer angles per point
    pub angles: Vec<PositionerVector>,
}

impl ScanData {
    pub fn points(&self) -> usize {
        self.horizontal.nrows()
    }

    pub fn trace(&self, detector: Detector) -> &Array2<f64> {
        match detector {
            Detector::Horizontal => &self.horizontal,
            Detector::Vertical => &self.vertical,
        }
    }
}

/// Outcome of one scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub scan: String,
    pub points: usize,
    /// Peak record pairs created in the output tree
    pub peak_records: usize,
    /// Box-level failures, each a [`EddError::BoxFailed`]
    pub failures: Vec<EddError>,
    /// Points abandoned on a [`EddError::ShapeMismatch`], with the error
    pub point_failures: Vec<(usize, EddError)>,
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub scans: Vec<ScanReport>,
    /// Scans absent from the input, with the reason
    pub skipped: Vec<(u32, EddError)>,
}

impl RunReport {
    /// Failed box fits and abandoned points over all scans.
    pub fn failure_count(&self) -> usize {
        self.scans
            .iter()
            .map(|s| s.failures.len() + s.point_failures.len())
            .sum()
    }
}

/// Fit window of one box on one detector at one point.
struct Window {
    channels: Vec<usize>,
    counts: Vec<f64>,
}

/// Fitter, geometry and box layout for one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    boxes: Vec<FitBox>,
    fitter: PeakFitter,
    reconstructor: AngleReconstructor,
}

impl Pipeline {
    /// Validate the configuration and report its warnings.
    pub fn new(config: Config) -> Result<Self> {
        let boxes = config.fit_boxes()?;
        for warning in config.warnings() {
            log::warn!("{}", warning);
        }
        Ok(Self {
            fitter: PeakFitter::new(config.fitter.clone()),
            reconstructor: AngleReconstructor::new(config.geometry.clone()),
            boxes,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn boxes(&self) -> &[FitBox] {
        &self.boxes
    }

    fn peaks_per_box(&self) -> Vec<usize> {
        self.boxes.iter().map(|b| b.nb_peaks).collect()
    }

    /// Read the traces and positioners of one scan.
    ///
    /// Fails with [`EddError::MissingData`] when a detector or a positioner
    /// is absent.
    pub fn read_scan<I: DataTree + ?Sized>(&self, input: &I, scan_number: u32) -> Result<ScanData> {
        let name = self.config.scan_name(scan_number);
        let measurement = join_path(&[&name, "measurement"]);

        let read_trace = |detector: Detector| -> Result<Array2<f64>> {
            let path = join_path(&[&measurement, self.config.detector_name(detector)]);
            as_points(input.read_array(&path)?, &path)
        };
        let horizontal = read_trace(Detector::Horizontal)?;
        let vertical = read_trace(Detector::Vertical)?;

        let points = horizontal.nrows();
        if vertical.nrows() != points {
            return Err(EddError::DimensionMismatch(format!(
                "{}: {} horizontal and {} vertical points",
                name,
                points,
                vertical.nrows()
            )));
        }

        for (index, fit_box) in self.boxes.iter().enumerate() {
            for detector in Detector::ALL {
                let available = match detector {
                    Detector::Horizontal => horizontal.ncols(),
                    Detector::Vertical => vertical.ncols(),
                };
                if fit_box.range(detector).max > available {
                    return Err(EddError::DimensionMismatch(format!(
                        "{}: box {} ends at channel {} but the {} detector has {} channels",
                        name,
                        index,
                        fit_box.range(detector).max,
                        detector,
                        available
                    )));
                }
            }
        }

        let mut positioners = Vec::with_capacity(self.config.positioners.len());
        let mut columns: Vec<Array1<f64>> = Vec::with_capacity(POSITIONER_COUNT);
        for positioner in &self.config.positioners {
            let path = join_path(&[&name, "instrument", "positioners", positioner]);
            let values = input.read_array(&path)?;
            if columns.len() < POSITIONER_COUNT {
                columns.push(broadcast_positioner(&values, points, &path)?);
            }
            positioners.push((positioner.clone(), values));
        }

        let angles = (0..points)
            .map(|point| {
                let readings: Vec<f64> = columns.iter().map(|c| c[point]).collect();
                PositionerVector::from_readings(&readings)
            })
            .collect();

        Ok(ScanData {
            scan_number,
            name,
            horizontal,
            vertical,
            positioners,
            angles,
        })
    }

    /// Reduce one scan into `output`.
    ///
    /// Box-level fit failures are logged and collected in the report. A
    /// [`EddError::ShapeMismatch`] abandons the current point only. Any other
    /// error aborts the scan.
    pub fn process_scan<I, O>(&self, input: &I, output: &mut O, scan_number: u32) -> Result<ScanReport>
    where
        I: DataTree + ?Sized,
        O: DataTree + ?Sized,
    {
        let scan = self.read_scan(input, scan_number)?;
        self.write_scan(&scan, output, |_| ())
    }

    /// Reduce `scans` from `input` into `output`, flushing the output after
    /// each scan.
    ///
    /// Scans with missing data are skipped. `status` receives the overall
    /// progress as a fraction.
    pub fn run<I, O>(
        &self,
        scans: &[u32],
        input: &I,
        output: &mut O,
        status: &Mutex<f32>,
    ) -> Result<RunReport>
    where
        I: DataTree + ?Sized,
        O: DataTree + ?Sized,
    {
        let mut report = RunReport::default();

        let total = scans.len().max(1) as f32;
        for (index, &scan_number) in scans.iter().enumerate() {
            let scan = match self.read_scan(input, scan_number) {
                Ok(scan) => scan,
                Err(EddError::MissingData(what)) => {
                    log::info!("Scan {} has no {}, skipping...", scan_number, what);
                    report
                        .skipped
                        .push((scan_number, EddError::MissingData(what)));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let points = scan.points().max(1) as f32;
            let scan_report = self.write_scan(&scan, output, |point| {
                if let Ok(mut stat) = status.lock() {
                    *stat = (index as f32 + (point + 1) as f32 / points) / total;
                }
            })?;
            output.flush()?;
            report.scans.push(scan_report);
        }

        if let Ok(mut stat) = status.lock() {
            *stat = 1.0;
        }
        Ok(report)
    }

    /// Write the reduction of an already read scan, calling `on_point` after
    /// every point.
    pub fn write_scan<O, F>(&self, scan: &ScanData, output: &mut O, mut on_point: F) -> Result<ScanReport>
    where
        O: DataTree + ?Sized,
        F: FnMut(usize),
    {
        if output.contains(&scan.name) {
            if !self.config.overwrite {
                return Err(EddError::Store(format!(
                    "{} is already present in the output",
                    scan.name
                )));
            }
            log::warn!("Replacing {} in the output", scan.name);
            output.remove(&scan.name);
        }

        log::info!("Fitting scan {} ({} point(s))", scan.name, scan.points());
        self.write_inputs(scan, output)?;

        let mut records = PeakRecords::new(&join_path(&[&scan.name, "tthPositionsGroup"]));
        let mut report = ScanReport {
            scan: scan.name.clone(),
            points: scan.points(),
            ..ScanReport::default()
        };

        for point in 0..scan.points() {
            match self.process_point(scan, point, output, &mut records, &mut report.failures) {
                Ok(()) => (),
                Err(EddError::ShapeMismatch(what)) => {
                    log::error!("Scan {}, point {} abandoned: {}", scan.name, point, what);
                    report
                        .point_failures
                        .push((point, EddError::ShapeMismatch(what)));
                }
                Err(e) => return Err(e),
            }
            on_point(point);
        }

        let info_peak = join_path(&[records.group(), "infoPeak"]);
        if !output.contains(&info_peak) {
            let mut columns: Vec<String> = self.config.positioners.clone();
            columns.truncate(POSITIONER_COUNT);
            columns.push(PEAK_COLUMNS.to_string());
            output.write_string(&info_peak, &columns.join(", "))?;
        }
        self.write_info(scan, output)?;

        report.peak_records = records.created();
        log::info!(
            "Finished scan {}: {} peak record(s), {} failed box fit(s), {} abandoned point(s)",
            scan.name,
            report.peak_records,
            report.failures.len(),
            report.point_failures.len()
        );
        Ok(report)
    }

    fn write_inputs<O: DataTree + ?Sized>(&self, scan: &ScanData, output: &mut O) -> Result<()> {
        for (name, values) in &scan.positioners {
            output.create_dataset(&join_path(&[&scan.name, "positioners", name]), values.clone())?;
        }

        let raw_group = join_path(&[
            &scan.name,
            &format!("rawData_{}_{}", self.config.dataset, scan.scan_number),
        ]);
        output.create_dataset(
            &join_path(&[&raw_group, "horizontalDetector"]),
            scan.horizontal.clone().into_dyn(),
        )?;
        output.create_dataset(
            &join_path(&[&raw_group, "verticalDetector"]),
            scan.vertical.clone().into_dyn(),
        )?;
        Ok(())
    }

    fn window(&self, scan: &ScanData, point: usize, fit_box: &FitBox, detector: Detector) -> Window {
        let range = fit_box.range(detector);
        Window {
            channels: range.channels().collect(),
            counts: scan
                .trace(detector)
                .slice(s![point, range.min..range.max])
                .to_vec(),
        }
    }

    fn process_point<O: DataTree + ?Sized>(
        &self,
        scan: &ScanData,
        point: usize,
        output: &mut O,
        records: &mut PeakRecords,
        failures: &mut Vec<EddError>,
    ) -> Result<()> {
        let angles = scan.angles.get(point).ok_or_else(|| {
            EddError::ShapeMismatch(format!(
                "point {} has no positioner readings, {} available",
                point,
                scan.angles.len()
            ))
        })?;
        let point_group = join_path(&[&scan.name, "fit", &format!("{:04}", point)]);
        let mut accumulator = PointAccumulator::new(&self.peaks_per_box());

        for (box_index, fit_box) in self.boxes.iter().enumerate() {
            let horizontal = self.window(scan, point, fit_box, Detector::Horizontal);
            let vertical = self.window(scan, point, fit_box, Detector::Vertical);
            let (horizontal_fit, vertical_fit) = rayon::join(
                || self.fitter.fit(&horizontal.channels, &horizontal.counts, fit_box.nb_peaks),
                || self.fitter.fit(&vertical.channels, &vertical.counts, fit_box.nb_peaks),
            );

            let line_group = join_path(&[&point_group, &format!("fitLine_{:04}", box_index)]);
            for (detector, window, outcome) in [
                (Detector::Horizontal, horizontal, horizontal_fit),
                (Detector::Vertical, vertical, vertical_fit),
            ] {
                write_window(output, &line_group, detector, &window)?;
                match outcome {
                    Ok(fit) => {
                        write_fit_line(output, &line_group, detector, &fit)?;
                        accumulator.push_fit(box_index, detector, &fit)?;
                    }
                    Err(source) if source.is_box_level() => {
                        let failure = EddError::BoxFailed {
                            scan: scan.name.clone(),
                            point,
                            box_index,
                            detector: detector.name().to_string(),
                            source: Box::new(source),
                        };
                        log::error!("{}", failure);
                        failures.push(failure);
                        accumulator.mark_failed(box_index, detector)?;
                    }
                    Err(source) => return Err(source),
                }
            }
        }

        let tables = accumulator.finish()?;
        let params_group = join_path(&[&point_group, "fitParams"]);
        for detector in Detector::ALL {
            let table = tables.table(detector);
            if !table.is_complete() {
                log::warn!(
                    "{} point {}: {} detector parameters not written, a box failed",
                    scan.name,
                    point,
                    detector
                );
                continue;
            }
            output.create_dataset(
                &join_path(&[&params_group, &format!("fitParams{}", detector.suffix())]),
                table.params.clone().into_dyn(),
            )?;
            output.create_dataset(
                &join_path(&[
                    &params_group,
                    &format!("uncertaintyFitParams{}", detector.suffix()),
                ]),
                table.uncertainties.clone().into_dyn(),
            )?;
        }

        for peak in 0..tables.total_peaks() {
            if !tables.peak_fitted(peak) {
                continue;
            }
            for detector in Detector::ALL {
                let table = tables.table(detector);
                let params: [f64; PARAMS_PER_PEAK] = row_array(&table.params, peak)?;
                let uncertainties: [f64; UNCERTAINTIES_PER_PEAK] =
                    row_array(&table.uncertainties, peak)?;

                let values = self.reconstructor.reconstruct(angles, &params, detector);
                let errors = self.reconstructor.reconstruct_uncertainty(
                    angles,
                    &params,
                    &uncertainties,
                    detector,
                );
                records.write(output, peak, detector, &values, &errors)?;
            }
        }

        Ok(())
    }

    fn write_info<O: DataTree + ?Sized>(&self, scan: &ScanData, output: &mut O) -> Result<()> {
        let info = join_path(&[&scan.name, "info"]);
        let config = &self.config;
        let text = |key: &str| join_path(&[&info, key]);
        let numbers = |values: &[usize]| {
            Array1::from_iter(values.iter().map(|&v| v as f64)).into_dyn()
        };

        output.write_string(&text("fileRead"), &config.file_read.to_string_lossy())?;
        output.write_string(&text("fileSave"), &config.file_save.to_string_lossy())?;
        output.write_string(&text("sample"), &config.sample)?;
        output.write_string(&text("dataset"), &config.dataset)?;
        output.write_string(&text("scanNumber"), &scan.scan_number.to_string())?;
        output.write_string(&text("nameHorizontalDetector"), &config.horizontal_detector)?;
        output.write_string(&text("nameVerticalDetector"), &config.vertical_detector)?;
        output.write_dataset(&text("numberOfBoxes"), numbers(&[config.number_of_boxes]))?;
        output.write_dataset(&text("nbPeaksInBoxes"), numbers(&config.nb_peaks_in_boxes))?;
        output.write_dataset(&text("rangeFitHD"), numbers(&config.range_fit_hd))?;
        output.write_dataset(&text("rangeFitVD"), numbers(&config.range_fit_vd))?;
        output.write_string(&text("positioners"), &config.positioners.join(", "))?;
        Ok(())
    }
}

fn row_array<const N: usize>(table: &Array2<f64>, row: usize) -> Result<[f64; N]> {
    let values = table.row(row).to_vec();
    values.try_into().map_err(|v: Vec<f64>| {
        EddError::ShapeMismatch(format!("row of {} values, expected {}", v.len(), N))
    })
}

fn write_window<O: DataTree + ?Sized>(
    output: &mut O,
    group: &str,
    detector: Detector,
    window: &Window,
) -> Result<()> {
    let channels = Array1::from_iter(window.channels.iter().map(|&c| c as f64));
    output.create_dataset(
        &join_path(&[group, &format!("channels{}", detector.suffix())]),
        channels.into_dyn(),
    )?;
    output.create_dataset(
        &join_path(&[group, &format!("rawData{}", detector.suffix())]),
        Array1::from_vec(window.counts.clone()).into_dyn(),
    )
}

fn write_fit_line<O: DataTree + ?Sized>(
    output: &mut O,
    group: &str,
    detector: Detector,
    fit: &BoxFit,
) -> Result<()> {
    output.create_dataset(
        &join_path(&[group, &format!("background{}", detector.suffix())]),
        Array1::from_vec(fit.background.clone()).into_dyn(),
    )?;
    output.create_dataset(
        &join_path(&[group, &format!("fitted{}", detector.suffix())]),
        Array1::from_vec(fit.fitted_curve.clone()).into_dyn(),
    )
}

/// View a detector dataset as points x channels.
fn as_points(data: ArrayD<f64>, path: &str) -> Result<Array2<f64>> {
    match data.ndim() {
        1 => {
            let trace = data
                .into_dimensionality::<Ix1>()
                .map_err(|e| EddError::ShapeMismatch(format!("{}: {}", path, e)))?;
            let channels = trace.len();
            trace
                .into_shape((1, channels))
                .map_err(|e| EddError::ShapeMismatch(format!("{}: {}", path, e)))
        }
        2 => data
            .into_dimensionality::<Ix2>()
            .map_err(|e| EddError::ShapeMismatch(format!("{}: {}", path, e))),
        n => Err(EddError::ShapeMismatch(format!(
            "{}: detector data has {} dimensions",
            path, n
        ))),
    }
}

/// One reading per point; a single reading applies to every point.
fn broadcast_positioner(values: &ArrayD<f64>, points: usize, path: &str) -> Result<Array1<f64>> {
    let flat: Vec<f64> = values.iter().copied().collect();
    match flat.len() {
        1 => Ok(Array1::from_elem(points, flat[0])),
        n if n == points => Ok(Array1::from_vec(flat)),
        n => Err(EddError::DimensionMismatch(format!(
            "{}: {} reading(s) for {} point(s)",
            path, n, points
        ))),
    }
}

/// Reduce every selected scan of the configured input file into the
/// configured output file.
///
/// The output file is opened in append mode. See [`Pipeline::run`].
#[cfg(feature = "hdf5")]
pub fn process(config: Config, status: Arc<Mutex<f32>>) -> Result<RunReport> {
    let scans = config.scan_number.scan_numbers()?;
    let pipeline = Pipeline::new(config)?;

    let input = Hdf5Tree::open(&pipeline.config.file_read)?;
    let mut output = Hdf5Tree::append(&pipeline.config.file_save)?;
    pipeline.run(&scans, &input, &mut output, &status)
}
