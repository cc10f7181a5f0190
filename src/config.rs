//! Run configuration.
//!
//! A [`Config`] is read from YAML and describes one input file, the scans to
//! reduce, the two detectors, the goniometer positioners and the fit boxes.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use nom::branch::alt;
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res};
use nom::multi::separated_list1;
use nom::sequence::{delimited, separated_pair};
use nom::{IResult, Parser};
use serde::{Deserialize, Serialize};

use crate::error::{EddError, Result};
use crate::fit::FitterConfig;
use crate::geometry::{Detector, GeometryConfig, POSITIONER_COUNT};

/// Which scans of the input file to reduce.
///
/// Written in YAML as an integer, a list of integers, or a string holding a
/// single number, a comma separated list or an `a:b` range (end exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanSelector {
    Single(u32),
    List(Vec<u32>),
    Text(String),
}

impl ScanSelector {
    /// Scan numbers in processing order.
    pub fn scan_numbers(&self) -> Result<Vec<u32>> {
        match self {
            ScanSelector::Single(n) => Ok(vec![*n]),
            ScanSelector::List(list) => Ok(list.clone()),
            ScanSelector::Text(text) => parse_scan_selector(text),
        }
    }
}

impl fmt::Display for ScanSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanSelector::Single(n) => write!(f, "{}", n),
            ScanSelector::List(list) => {
                let items: Vec<String> = list.iter().map(u32::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            ScanSelector::Text(text) => f.write_str(text),
        }
    }
}

fn scan_number(input: &str) -> IResult<&str, u32> {
    map_res(delimited(multispace0, digit1, multispace0), |digits: &str| {
        digits.parse::<u32>()
    })
    .parse(input)
}

fn scan_range(input: &str) -> IResult<&str, Vec<u32>> {
    map(
        separated_pair(scan_number, char(':'), scan_number),
        |(start, end)| (start..end).collect(),
    )
    .parse(input)
}

fn scan_list(input: &str) -> IResult<&str, Vec<u32>> {
    separated_list1(char(','), scan_number).parse(input)
}

/// Parse `"n"`, `"a,b,c"` or `"a:b"`.
pub fn parse_scan_selector(text: &str) -> Result<Vec<u32>> {
    let (_, scans) = all_consuming(alt((scan_range, scan_list)))
        .parse(text)
        .map_err(|e| EddError::ScanSelector(format!("{:?}: {}", text, e)))?;
    if scans.is_empty() {
        return Err(EddError::ScanSelector(format!("{:?} selects no scan", text)));
    }
    Ok(scans)
}

/// Half-open channel interval `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRange {
    pub min: usize,
    pub max: usize,
}

impl ChannelRange {
    pub fn channels(&self) -> Range<usize> {
        self.min..self.max
    }

    pub fn len(&self) -> usize {
        self.max.saturating_sub(self.min)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One fit box: its expected peak count and a channel range per detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitBox {
    pub nb_peaks: usize,
    pub horizontal: ChannelRange,
    pub vertical: ChannelRange,
}

impl FitBox {
    pub fn range(&self, detector: Detector) -> ChannelRange {
        match detector {
            Detector::Horizontal => self.horizontal,
            Detector::Vertical => self.vertical,
        }
    }
}

/// Non-fatal configuration issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// More positioners than the geometry uses; the extra ones are only copied.
    ExcessPositioners { given: usize, used: usize },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::ExcessPositioners { given, used } => write!(
                f,
                "{} positioners given, only the first {} enter the angle reconstruction",
                given, used
            ),
        }
    }
}

/// Structure representing one reduction run.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub file_read: PathBuf,
    pub file_save: PathBuf,
    pub sample: String,
    pub dataset: String,
    pub scan_number: ScanSelector,
    pub horizontal_detector: String,
    pub vertical_detector: String,
    /// Goniometer positioners, outermost stage first
    pub positioners: Vec<String>,
    pub number_of_boxes: usize,
    pub nb_peaks_in_boxes: Vec<usize>,
    /// `[min0, max0, min1, max1, ...]` for the horizontal detector
    pub range_fit_hd: Vec<usize>,
    /// `[min0, max0, min1, max1, ...]` for the vertical detector
    pub range_fit_vd: Vec<usize>,
    /// Replace scans already present in the output file
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub fitter: FitterConfig,
    #[serde(default)]
    pub geometry: GeometryConfig,
}

impl Default for Config {
    /// Template configuration; paths and names are placeholders
    fn default() -> Self {
        Self {
            file_read: PathBuf::from("input.json"),
            file_save: PathBuf::from("output.json"),
            sample: String::from("sample"),
            dataset: String::from("0001"),
            scan_number: ScanSelector::Text(String::from("1:2")),
            horizontal_detector: String::from("mca_det0"),
            vertical_detector: String::from("mca_det1"),
            positioners: vec![
                String::from("phi"),
                String::from("chi"),
                String::from("omega"),
            ],
            number_of_boxes: 1,
            nb_peaks_in_boxes: vec![1],
            range_fit_hd: vec![0, 100],
            range_fit_vd: vec![0, 100],
            overwrite: false,
            fitter: FitterConfig::default(),
            geometry: GeometryConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Err(EddError::Config(format!(
                "configuration file {} does not exist",
                config_path.display()
            )));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write this configuration as YAML.
    pub fn write_config_file(&self, config_path: &Path) -> Result<()> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Name of the scan group `{sample}_{dataset}_{scan}.1`.
    pub fn scan_name(&self, scan: u32) -> String {
        format!("{}_{}_{}.1", self.sample, self.dataset, scan)
    }

    pub fn detector_name(&self, detector: Detector) -> &str {
        match detector {
            Detector::Horizontal => &self.horizontal_detector,
            Detector::Vertical => &self.vertical_detector,
        }
    }

    /// Validated fit boxes, in configuration order. Also checks the fitter
    /// settings.
    pub fn fit_boxes(&self) -> Result<Vec<FitBox>> {
        self.fitter.validate()?;
        if self.nb_peaks_in_boxes.len() != self.number_of_boxes {
            return Err(EddError::Config(format!(
                "{} box(es) configured but {} peak count(s) given",
                self.number_of_boxes,
                self.nb_peaks_in_boxes.len()
            )));
        }
        for (name, ranges) in [
            ("range_fit_hd", &self.range_fit_hd),
            ("range_fit_vd", &self.range_fit_vd),
        ] {
            if ranges.len() != 2 * self.number_of_boxes {
                return Err(EddError::Config(format!(
                    "{} holds {} value(s), expected {} for {} box(es)",
                    name,
                    ranges.len(),
                    2 * self.number_of_boxes,
                    self.number_of_boxes
                )));
            }
        }

        let range = |ranges: &[usize], index: usize| -> Result<ChannelRange> {
            let (min, max) = (ranges[2 * index], ranges[2 * index + 1]);
            if min >= max {
                return Err(EddError::Config(format!(
                    "box {} has an empty channel range [{}, {})",
                    index, min, max
                )));
            }
            Ok(ChannelRange { min, max })
        };

        self.nb_peaks_in_boxes
            .iter()
            .enumerate()
            .map(|(index, &nb_peaks)| {
                if nb_peaks == 0 {
                    return Err(EddError::Config(format!("box {} expects no peak", index)));
                }
                Ok(FitBox {
                    nb_peaks,
                    horizontal: range(&self.range_fit_hd, index)?,
                    vertical: range(&self.range_fit_vd, index)?,
                })
            })
            .collect()
    }

    /// Non-fatal issues with this configuration.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.positioners.len() > POSITIONER_COUNT {
            warnings.push(ConfigWarning::ExcessPositioners {
                given: self.positioners.len(),
                used: POSITIONER_COUNT,
            });
        }
        warnings
    }
}
