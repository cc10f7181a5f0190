use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use edd_fit::config::Config;
use edd_fit::pipeline::process;

fn make_template_config(path: &Path) -> edd_fit::Result<()> {
    Config::default().write_config_file(path)
}

fn main() -> ExitCode {
    // Create a cli
    let matches = Command::new("edd_fit")
        .about("Fit energy-dispersive diffraction scans and reconstruct scattering angles")
        .version(edd_fit::VERSION)
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return ExitCode::FAILURE;
    }

    let config_path = match matches.get_one::<String>("path") {
        Some(path) => PathBuf::from(path),
        None => {
            log::error!("A configuration path is required");
            return ExitCode::FAILURE;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        return match make_template_config(&config_path) {
            Ok(()) => {
                log::info!("Done.");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Input file: {}", config.file_read.to_string_lossy());
    log::info!("Output file: {}", config.file_save.to_string_lossy());
    log::info!("Sample: {} Dataset: {}", config.sample, config.dataset);
    log::info!("Scans: {}", config.scan_number);
    log::info!(
        "Detectors: {} (horizontal), {} (vertical)",
        config.horizontal_detector,
        config.vertical_detector
    );
    log::info!(
        "Boxes: {} with {:?} peak(s)",
        config.number_of_boxes,
        config.nb_peaks_in_boxes
    );

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}%") {
        pb.set_style(style);
    }
    let status = Arc::new(Mutex::new(0.0));
    let sent_status = status.clone();
    let handle = std::thread::spawn(move || process(config, sent_status));

    loop {
        std::thread::sleep(std::time::Duration::from_millis(250));
        match status.lock() {
            Ok(stat) => pb.set_position((*stat * 100.0) as u64),
            Err(e) => log::error!("{e}"),
        }

        if handle.is_finished() {
            break;
        }
    }
    pb.finish();

    let code = match handle.join() {
        Ok(Ok(report)) => {
            for (scan, reason) in &report.skipped {
                log::warn!("Scan {scan} skipped: {reason}");
            }
            for failure in report.scans.iter().flat_map(|s| &s.failures) {
                log::error!("{failure}");
            }
            for scan in &report.scans {
                for (point, failure) in &scan.point_failures {
                    log::error!("{} point {point}: {failure}", scan.scan);
                }
            }
            if report.failure_count() == 0 {
                log::info!("Successfully reduced {} scan(s).", report.scans.len());
                ExitCode::SUCCESS
            } else {
                log::error!(
                    "{} box fit(s) or point(s) failed across {} scan(s).",
                    report.failure_count(),
                    report.scans.len()
                );
                ExitCode::FAILURE
            }
        }
        Ok(Err(e)) => {
            log::error!("Reduction failed with error: {e}");
            ExitCode::FAILURE
        }
        Err(_) => {
            log::error!("Failed to join reduction task!");
            ExitCode::FAILURE
        }
    };

    log::info!("Done.");
    code
}
