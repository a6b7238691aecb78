use bms_sil::afe::AfeFaultKind;
use bms_sil::config::{FaultEventConfig, SimConfig, MAX_STEP_MS};
use bms_sil::frame::MeasurementFrame;
use bms_sil::plant::NUM_CELLS;
use bms_sil::profile::CurrentProfile;
use bms_sil::runner::SilRunner;
use clap::{App, Arg, ArgMatches};
use colored::*;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CURRENT_A: f64 = 50.0;
const STATUS_EVERY_FRAMES: u64 = 100;
const MIN_RATE_HZ: f64 = 1000.0 / MAX_STEP_MS;

#[derive(Clone, Copy, PartialEq)]
enum OutputFormat {
    Json,
    Table,
    Compact,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("bms-sil")
        .version("0.1.0")
        .author("Battery Systems Engineering Team")
        .about("🔋 BMS software-in-the-loop plant: 16S LiFePO4 pack with AFE emulation")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON run configuration; flags below override it")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .value_name("SECONDS")
                .help("Simulated duration; 0 runs until Ctrl+C (requires --realtime)")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("rate")
                .short("r")
                .long("rate")
                .value_name("HZ")
                .help("Frame rate; one plant step per frame")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("current")
                .short("i")
                .long("current")
                .value_name("AMPS")
                .help("Constant pack current, positive charges (default 50 A)")
                .takes_value(true)
                .allow_hyphen_values(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("soc")
                .long("soc")
                .value_name("PERCENT")
                .help("Initial pack SOC")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for pack variation and AFE noise")
                .takes_value(true)
                .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|_| "Seed must be an unsigned integer".into())),
        )
        .arg(
            Arg::with_name("fault")
                .long("fault")
                .value_name("KIND,AT_MS[,MASK[,DURATION_MS]]")
                .help("Schedule an AFE fault, e.g. open_wire,5000,0x20,2000")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("realtime")
                .long("realtime")
                .help("Pace frames at the configured rate instead of running flat out"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output"),
        )
        .get_matches();

    init_tracing(matches.is_present("verbose"));

    let config = build_config(&matches)?;
    let format = match matches.value_of("format") {
        Some("json") => OutputFormat::Json,
        Some("compact") => OutputFormat::Compact,
        _ => OutputFormat::Table,
    };
    let realtime = matches.is_present("realtime");
    let continuous = config.duration_ms <= 0.0;
    if continuous && !realtime {
        return Err("--duration 0 runs forever and needs --realtime".into());
    }

    let mut runner = SilRunner::from_config(&config)?;

    if format != OutputFormat::Json {
        print_banner(&config, &runner);
    }

    let steps = config.step_count();
    if realtime {
        run_realtime(&mut runner, steps, continuous, format).await;
    } else {
        for _ in 0..steps {
            let frame = runner.step();
            print_frame(&frame, format);
        }
    }

    if format != OutputFormat::Json {
        print_summary(&runner);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "bms_sil=debug" } else { "bms_sil=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn is_number(v: String) -> Result<(), String> {
    v.parse::<f64>()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not a number", v))
}

fn parse_f64(matches: &ArgMatches, name: &str) -> Result<Option<f64>, Box<dyn std::error::Error>> {
    match matches.value_of(name) {
        Some(v) => Ok(Some(v.parse::<f64>()?)),
        None => Ok(None),
    }
}

fn build_config(matches: &ArgMatches) -> Result<SimConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig {
            profile: CurrentProfile::constant(DEFAULT_CURRENT_A * 1000.0),
            ..SimConfig::default()
        },
    };

    if let Some(seconds) = parse_f64(matches, "duration")? {
        config.duration_ms = seconds * 1000.0;
    }
    if let Some(rate_hz) = parse_f64(matches, "rate")? {
        if !rate_hz.is_finite() || rate_hz < MIN_RATE_HZ {
            return Err(format!("--rate must be at least {} Hz, got {}", MIN_RATE_HZ, rate_hz).into());
        }
        config.step_ms = 1000.0 / rate_hz;
    }
    if let Some(amps) = parse_f64(matches, "current")? {
        config.profile = CurrentProfile::constant(amps * 1000.0);
    }
    if let Some(soc) = parse_f64(matches, "soc")? {
        config.pack.initial_soc_pct = soc;
    }
    if let Some(seed) = matches.value_of("seed") {
        config.seed = seed.parse()?;
    }
    if let Some(fault_args) = matches.values_of("fault") {
        for arg in fault_args {
            config.fault_schedule.push(parse_fault(arg)?);
        }
    }

    config.validate()?;
    Ok(config)
}

/// `KIND,AT_MS[,MASK[,DURATION_MS]]`; the mask may be decimal or 0x-prefixed hex.
fn parse_fault(arg: &str) -> Result<FaultEventConfig, Box<dyn std::error::Error>> {
    let mut parts = arg.split(',').map(str::trim);

    let kind: AfeFaultKind = parts.next().unwrap_or_default().parse()?;
    let inject_time_ms: f64 = parts
        .next()
        .ok_or_else(|| format!("fault '{}' is missing its injection time", arg))?
        .parse()?;
    let cell_mask = match parts.next().filter(|s| !s.is_empty()) {
        Some(mask) => Some(match mask.strip_prefix("0x").or_else(|| mask.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16)?,
            None => mask.parse::<u16>()?,
        }),
        None => None,
    };
    let duration_ms = match parts.next().filter(|s| !s.is_empty()) {
        Some(d) => Some(d.parse::<f64>()?),
        None => None,
    };

    Ok(FaultEventConfig {
        kind,
        inject_time_ms,
        cell_mask,
        duration_ms,
    })
}

async fn run_realtime(runner: &mut SilRunner, steps: u64, continuous: bool, format: OutputFormat) {
    // tokio rejects a zero period
    let period = Duration::from_secs_f64(runner.step_ms() / 1000.0).max(Duration::from_micros(1));
    let mut interval = time::interval(period);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while continuous || runner.frames_emitted() < steps {
        tokio::select! {
            _ = interval.tick() => {
                let frame = runner.step();
                print_frame(&frame, format);

                if continuous && runner.frames_emitted() % STATUS_EVERY_FRAMES == 0 {
                    info!(
                        frames = runner.frames_emitted(),
                        sim_time_s = runner.sim_time_ms() / 1000.0,
                        pack_soc_pct = runner.pack().get_pack_soc(),
                        "status"
                    );
                }
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                println!("\n{}", "Simulation interrupted by user".yellow());
                break;
            }
        }
    }
}

fn print_banner(config: &SimConfig, runner: &SilRunner) {
    println!("{}", "🔋 BMS SIL Simulator".bright_blue().bold());
    println!("{}", "====================".bright_blue());
    println!("  Seed:          {}", config.seed.to_string().bright_white());
    println!("  Frame rate:    {:.2} Hz ({:.1} ms/step)", 1000.0 / config.step_ms, config.step_ms);
    if config.duration_ms > 0.0 {
        println!("  Duration:      {:.1} s ({} steps)", config.duration_ms / 1000.0, config.step_count());
    } else {
        println!("  Duration:      {}", "continuous (Ctrl+C to stop)".bright_yellow());
    }
    println!("  Initial SOC:   {:.1}%", runner.pack().get_pack_soc());
    println!("  Pack voltage:  {:.3} V", runner.pack().get_pack_voltage() / 1000.0);
    if !config.fault_schedule.is_empty() {
        println!("  Faults:        {} scheduled", config.fault_schedule.len());
    }
    println!();
}

fn print_frame(frame: &MeasurementFrame, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(frame) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize frame {}: {}", frame.sequence, e),
        },
        OutputFormat::Compact => print_frame_compact(frame),
        OutputFormat::Table => print_frame_table(frame),
    }
}

fn print_frame_compact(frame: &MeasurementFrame) {
    let (min_mv, max_mv) = frame
        .cell_voltages_mv
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let status = format!("0x{:08X}", frame.status_flags);
    let status = if frame.has_faults() { status.red() } else { status.green() };

    println!(
        "#{:<6} t={:>9.1}s  {:>7.3} V  {:>8.3} A  cell {:.1}..{:.1} mV  {}",
        frame.sequence,
        frame.timestamp_ms / 1000.0,
        frame.pack_voltage_mv / 1000.0,
        frame.pack_current_ma / 1000.0,
        min_mv,
        max_mv,
        status
    );
}

fn print_frame_table(frame: &MeasurementFrame) {
    println!("{}", "=".repeat(80).bright_blue());
    println!(
        "{} {}   {} {:.1} ms",
        "AFE frame".bright_blue().bold(),
        frame.sequence.to_string().bright_white(),
        "t =".bright_black(),
        frame.timestamp_ms
    );

    println!("{}", "Cell voltages (mV):".bright_white());
    for (r, values) in frame.cell_voltages_mv.chunks(4).enumerate() {
        let cells: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(c, v)| {
                let text = format!("C{:02}: {:>7.1}", r * 4 + c, v);
                if *v == 0.0 { text.red().to_string() } else { text }
            })
            .collect();
        println!("  {}", cells.join("  |  "));
    }

    println!("{}", "Cell temperatures (°C):".bright_white());
    for r in 0..NUM_CELLS / 4 {
        let cells: Vec<String> = (r * 4..r * 4 + 4)
            .map(|cell| match frame.cell_temperature_c(cell) {
                Some(t) if frame.cell_temperatures_cc[cell] > i16::MIN => format!("C{:02}: {:>6.1}", cell, t),
                _ => format!("C{:02}: {:>6}", cell, "FAULT").red().to_string(),
            })
            .collect();
        println!("  {}", cells.join("  |  "));
    }

    println!(
        "Pack: {:.3} V   {:.3} A",
        frame.pack_voltage_mv / 1000.0,
        frame.pack_current_ma / 1000.0
    );

    let faults = frame.fault_descriptions();
    if faults.is_empty() {
        println!("Status: 0x{:08X}  {}", frame.status_flags, "no faults".green());
    } else {
        println!("Status: 0x{:08X}", frame.status_flags);
        for fault in faults {
            println!("  {} {}", "⚠".yellow(), fault.bright_red());
        }
    }
}

fn print_summary(runner: &SilRunner) {
    let state = runner.pack_state();
    let stats = runner.afe().statistics();

    println!();
    println!("{}", "📊 Final Pack State".bright_blue().bold());
    println!("  Pack voltage:   {:.3} V", state.pack_voltage_mv / 1000.0);
    println!("  Pack SOC:       {:.1}%", state.pack_soc_pct);
    println!("  Pack current:   {:.3} A", state.pack_current_ma / 1000.0);
    println!("  Simulated time: {:.1} s", runner.sim_time_ms() / 1000.0);

    println!("{}", "Cell imbalance".bright_white().bold());
    println!("  Voltage delta:  {:.2} mV", state.imbalance.voltage_delta_mv);
    println!("  SOC delta:      {:.2}%", state.imbalance.soc_delta_pct);

    println!("{}", "AFE".bright_white().bold());
    println!("  Measurements:   {}", stats.measurement_count);
    println!(
        "  CRC errors:     {} ({:.2}%)",
        stats.crc_error_count,
        stats.crc_error_rate_observed * 100.0
    );
    if stats.pending_scheduled > 0 {
        println!("  Pending faults: {}", stats.pending_scheduled);
    }
}
