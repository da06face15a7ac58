//! CAN ECU Simulator CLI Application
//!
//! This is the command-line interface for the CAN simulator.
//! It uses the can-sim-core library and adds:
//! - Command dispatch (flood, list, monitor, prompt, send, simulate)
//! - Interactive input from stdin
//! - Settings file handling
//! - Metrics file output

use anyhow::Result;
use can_sim_core::{MetricsCollector, SimulatorConfig, SimulatorCore, SimulatorSources};
use clap::Parser;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod commands;
mod config;

use config::Settings;

/// CAN Simulator - Simulate an ECU on a CAN bus
#[derive(Parser, Debug)]
#[command(name = "can-sim")]
#[command(
    about = "Simulate a CAN ECU from a DBC database and a variable mapping",
    long_about = "Simulate a CAN ECU from a DBC database and a variable mapping.\n\n\
Commands:\n  \
flood [delay=US] [rate=PCT] [burst-len=US] [burst-delay=US] [include=VAR,..] [exclude=VAR,..]\n  \
list [VAR..]\n  \
monitor\n  \
prompt      (stdin: reset | VAR=VAL.. | list [VAR..] | quit)\n  \
send [reset] [VAR=VAL..]\n  \
simulate    (with --asc)"
)]
#[command(version)]
struct Args {
    /// ASC recording to replay
    #[arg(short, long, value_name = "FILE")]
    asc: Option<PathBuf>,

    /// Variable mapping file (JSON)
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,

    /// DBC file
    #[arg(short, long, value_name = "FILE")]
    dbc: Option<PathBuf>,

    /// Message ids excluded from sending, separated by ,
    #[arg(short = 'f', long, value_name = "ID,ID", conflicts_with = "filter_include")]
    filter_exclude: Option<String>,

    /// Only these message ids are sent, separated by ,
    #[arg(short = 'F', long, value_name = "ID,ID")]
    filter_include: Option<String>,

    /// Ignore message directions defined in the mapping
    #[arg(short = 'I', long)]
    ignore_directions: bool,

    /// CAN interface name (default: can0)
    #[arg(short, long, value_name = "NAME")]
    interface: Option<String>,

    /// Metrics output file (without timestamp and extension)
    #[arg(short, long, value_name = "FILE")]
    metrics: Option<String>,

    /// Metrics value separator (default: ;)
    #[arg(short = 'M', long, value_name = "CHAR")]
    metrics_separator: Option<char>,

    /// Use the signals' own units instead of native units
    #[arg(short, long)]
    native: bool,

    /// Run only for SECS seconds (simulate)
    #[arg(short, long, value_name = "SECS", allow_negative_numbers = true)]
    run_time: Option<i64>,

    /// Reset to defaults without reporting them as received values
    #[arg(short, long)]
    suppress_defaults: bool,

    /// Do not send the time of day automatically
    #[arg(short = 't', long)]
    no_send_time: bool,

    /// Use UTC for the time of day
    #[arg(short, long)]
    utc: bool,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    /// Command to run
    #[arg(value_name = "COMMAND")]
    command: String,

    /// Command parameters
    #[arg(value_name = "PARAMS", trailing_var_arg = true, allow_hyphen_values = true)]
    params: Vec<String>,
}

impl Args {
    /// Message filter ids and whether they are excluded
    fn filters(&self) -> Option<(Vec<String>, bool)> {
        let split = |list: &str| -> Vec<String> {
            list.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        };
        match (&self.filter_exclude, &self.filter_include) {
            (Some(list), _) => Some((split(list), true)),
            (None, Some(list)) => Some((split(list), false)),
            (None, None) => None,
        }
    }

    /// Merge command-line flags over the settings file
    fn simulator_config(&self, settings: &Settings) -> SimulatorConfig {
        let mut config = settings.simulator.config.clone();
        config.native_units |= self.native;
        config.use_utc |= self.utc;
        config.suppress_defaults |= self.suppress_defaults;
        config.ignore_directions |= self.ignore_directions;
        if self.no_send_time {
            config.send_time = false;
        }
        if let Some(run_time) = self.run_time {
            config.run_time_s = run_time;
        }
        config
    }

    fn sources(&self, settings: &Settings) -> SimulatorSources {
        let sim = &settings.simulator;
        SimulatorSources {
            dbc: self.dbc.clone().or_else(|| sim.dbc.clone()),
            mapping: self.cfg.clone().or_else(|| sim.cfg.clone()),
            asc: self.asc.clone().or_else(|| sim.asc.clone()),
        }
    }
}

fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return Ok(if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            });
        }
    };

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Simulator CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using simulator library v{}", can_sim_core::VERSION);

    let settings = match &args.settings {
        Some(path) => config::load_settings(path)?,
        None => Settings::default(),
    };

    run(&args, &settings)
}

fn run(args: &Args, settings: &Settings) -> Result<ExitCode> {
    let sources = args.sources(settings);
    if sources.asc.is_some() && args.command != "simulate" {
        log::error!("An ASC file can only be used with the simulate command");
        return Ok(ExitCode::from(1));
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let config = args.simulator_config(settings);
    // No CAN interface in list mode
    let core = if args.command == "list" {
        SimulatorCore::new(&sources, None, config)
    } else {
        let interface = args
            .interface
            .as_deref()
            .unwrap_or(&settings.simulator.interface);
        SimulatorCore::open(&sources, interface, config)
    };
    let mut core = match core {
        Ok(core) => core,
        Err(e) => {
            log::error!("Failed to initialize the simulator: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    let metrics_file = args.metrics.clone().or_else(|| settings.metrics.file.clone());
    let metrics = metrics_file.as_ref().map(|_| {
        let mut collector = MetricsCollector::new(core.bitrate());
        if let Some(separator) = args.metrics_separator.or(settings.metrics.separator) {
            collector.set_value_separator(separator);
        }
        Arc::new(Mutex::new(collector))
    });

    if let Some((ids, exclude)) = args.filters() {
        if !core.initialize_message_filter_list(&ids, exclude, false) {
            log::error!("All messages have been filtered out! Aborting!");
            return Ok(ExitCode::from(1));
        }
    }

    let exit_code = match args.command.as_str() {
        "flood" => {
            let params = if args.params.is_empty() {
                &settings.flood.params
            } else {
                &args.params
            };
            match commands::flood(&core, params, &running, metrics.clone()) {
                Ok(sent) => {
                    println!("Sent {} messages", sent);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    log::error!("Flood mode failed to initialize: {}", e);
                    ExitCode::from(1)
                }
            }
        }
        "list" => {
            commands::list_variables(&core, &args.params, true);
            ExitCode::SUCCESS
        }
        "monitor" => {
            core.start_reader_thread();
            commands::main_loop(&core, &running, false)?;
            ExitCode::SUCCESS
        }
        "prompt" => {
            core.start_reader_thread();
            core.start_sender_thread();
            commands::main_loop(&core, &running, true)?;
            ExitCode::SUCCESS
        }
        "send" => {
            commands::process_user_input(&core, &args.params, &running);
            core.send_messages(false);
            ExitCode::SUCCESS
        }
        "simulate" => {
            if commands::simulate(&mut core, &running) {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        other => {
            log::error!("Unknown command '{}'", other);
            ExitCode::from(1)
        }
    };

    core.stop_threads();
    if let (Some(metrics), Some(base)) = (&metrics, &metrics_file) {
        commands::write_metrics(&core, metrics, base)?;
    }

    Ok(exit_code)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flood_command() {
        let args = Args::try_parse_from([
            "can-sim", "-c", "ecu.json", "-d", "ecu.dbc", "-i", "vcan0", "flood", "rate=40",
            "include=speed,rpm",
        ])
        .unwrap();
        assert_eq!(args.command, "flood");
        assert_eq!(args.params, vec!["rate=40", "include=speed,rpm"]);
        assert_eq!(args.interface.as_deref(), Some("vcan0"));
        assert_eq!(args.cfg, Some(PathBuf::from("ecu.json")));
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "can-sim", "-a", "trace.asc", "-r", "30", "-n", "-s", "-t", "-u", "-I", "-M", ",",
            "-m", "run", "-vv", "simulate",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.metrics_separator, Some(','));
        assert_eq!(args.metrics.as_deref(), Some("run"));

        let config = args.simulator_config(&Settings::default());
        assert!(config.native_units);
        assert!(config.suppress_defaults);
        assert!(!config.send_time);
        assert!(config.use_utc);
        assert!(config.ignore_directions);
        assert_eq!(config.run_time_s, 30);
    }

    #[test]
    fn test_filters() {
        let args = Args::try_parse_from(["can-sim", "-f", "1,0x10, 3", "send"]).unwrap();
        assert_eq!(
            args.filters(),
            Some((vec!["1".to_string(), "0x10".to_string(), "3".to_string()], true))
        );

        let args = Args::try_parse_from(["can-sim", "-F", "5", "send"]).unwrap();
        assert_eq!(args.filters(), Some((vec!["5".to_string()], false)));

        assert!(Args::try_parse_from(["can-sim", "-f", "1", "-F", "2", "send"]).is_err());
    }

    #[test]
    fn test_send_values_with_negative_numbers() {
        let args = Args::try_parse_from(["can-sim", "send", "reset", "temp=-40"]).unwrap();
        assert_eq!(args.params, vec!["reset", "temp=-40"]);
    }

    #[test]
    fn test_missing_command() {
        assert!(Args::try_parse_from(["can-sim", "-d", "ecu.dbc"]).is_err());
    }

    #[test]
    fn test_settings_fill_sources() {
        let mut settings = Settings::default();
        settings.simulator.dbc = Some(PathBuf::from("from-settings.dbc"));
        settings.simulator.cfg = Some(PathBuf::from("from-settings.json"));

        let args = Args::try_parse_from(["can-sim", "-d", "cli.dbc", "list"]).unwrap();
        let sources = args.sources(&settings);
        assert_eq!(sources.dbc, Some(PathBuf::from("cli.dbc")));
        assert_eq!(sources.mapping, Some(PathBuf::from("from-settings.json")));
        assert_eq!(sources.asc, None);
    }
}
