//! Core application runner (business logic) for `eddystone-tlm-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::advertisement::{RawAdvertisement, to_hex};
use crate::monitor::{BeaconMonitor, DEFAULT_TARGET_NAME, MonitorConfig, MonitorEvent};
use crate::output::influxdb::{DEFAULT_MEASUREMENT, InfluxDbFormatter};
use crate::output::text::TextFormatter;
use crate::output::{Format, OutputFormatter};
use crate::policy::EmitPolicy;
use crate::scanner::{Backend, ScanError};
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;

/// Scanning mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Scan for a fixed duration, at most one reading per device per throttle window
    #[default]
    Scan,
    /// Monitor until interrupted, reporting only significant changes
    Monitor,
}

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Case-insensitive fragment of the advertised device name to follow
    #[arg(long, default_value = DEFAULT_TARGET_NAME)]
    pub name: String,

    /// Scanning mode
    #[arg(long, default_value_t, value_enum)]
    pub mode: Mode,

    /// How long a single scan runs.
    /// Accepts duration with suffix: 30s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "30s", value_parser = crate::policy::parse_duration)]
    pub duration: Duration,

    /// Report each device at most once per interval during a single scan
    #[arg(long, default_value = "2s", value_parser = crate::policy::parse_duration)]
    pub throttle: Duration,

    /// Temperature change (Celsius) that triggers a report in monitor mode
    #[arg(long, default_value_t = crate::policy::DEFAULT_TEMPERATURE_DELTA)]
    pub temperature_delta: f64,

    /// Humidity change (percent) that triggers a report in monitor mode
    #[arg(long, default_value_t = crate::policy::DEFAULT_HUMIDITY_DELTA)]
    pub humidity_delta: f64,

    /// Forget devices that have not reported for this long
    #[arg(long, value_parser = crate::policy::parse_duration)]
    pub forget_after: Option<Duration>,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = DEFAULT_MEASUREMENT)]
    pub influxdb_measurement: String,

    /// Verbose output, print decode errors and devices without telemetry
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

impl Options {
    /// Monitor configuration for the selected mode.
    pub fn monitor_config(&self) -> MonitorConfig {
        let policy = match self.mode {
            Mode::Scan => EmitPolicy::RateLimited(self.throttle),
            Mode::Monitor => EmitPolicy::OnChange {
                temperature: self.temperature_delta,
                humidity: self.humidity_delta,
            },
        };
        MonitorConfig {
            target_name: self.name.clone(),
            policy,
        }
    }

    fn formatter(&self) -> Box<dyn OutputFormatter> {
        match self.format {
            Format::Text => match self.mode {
                Mode::Scan => Box::new(TextFormatter::default()),
                Mode::Monitor => Box::new(TextFormatter::with_timestamps()),
            },
            Format::Influxdb => Box::new(InfluxDbFormatter::new(self.influxdb_measurement.clone())),
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>> + Send + '_>,
    >;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>> + Send + '_>,
    > {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Route one monitor event to the output writers.
fn write_event(
    event: MonitorEvent,
    formatter: &dyn OutputFormatter,
    verbose: bool,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    match event {
        MonitorEvent::Telemetry(reading) => {
            let line = formatter.format(&reading, SystemTime::now());
            writeln!(out, "{line}")
        }
        MonitorEvent::DecodeFailed {
            address,
            raw_bytes,
            error,
        } if verbose => writeln!(
            err,
            "{address}: failed to decode telemetry {}: {error}",
            to_hex(&raw_bytes)
        ),
        MonitorEvent::NoServiceData { address } if verbose => {
            writeln!(err, "{address}: no telemetry service data")
        }
        _ => Ok(()),
    }
}

/// Write the end-of-scan device summary.
fn write_summary(monitor: &BeaconMonitor, out: &mut dyn Write) -> io::Result<()> {
    let devices = monitor.devices();
    let stats = monitor.stats();

    writeln!(out, "--- Scan complete ---")?;
    if devices.is_empty() {
        writeln!(
            out,
            "No telemetry devices matching '{}' found.",
            monitor.config().target_name
        )?;
    } else {
        writeln!(out, "Found {} telemetry device(s):", devices.len())?;
        for (address, state) in devices {
            let frame = &state.last_frame;
            writeln!(
                out,
                "  {} ({address}): T={:.2}°C, H={:.2}%, rssi={}dBm",
                state.name.as_deref().unwrap_or("Unknown"),
                frame.temperature_celsius,
                frame.humidity_percent,
                state.rssi,
            )?;
        }
    }
    writeln!(
        out,
        "{} advertisements, {} readings, {} suppressed, {} decode failures, {} without telemetry",
        stats.advertisements,
        stats.telemetry,
        stats.suppressed,
        stats.decode_failures,
        stats.no_service_data,
    )
}

/// Run the core processing loop, writing formatted output to `out` and verbose errors to `err`.
///
/// - Each advertisement is passed through a [`BeaconMonitor`] configured for `options.mode`.
/// - Readings are formatted and written to `out`.
/// - Decode errors and devices without telemetry are written to `err` only when
///   `options.verbose` is true.
/// - The loop ends when the scanner closes its channel, when `shutdown` completes,
///   or, in [`Mode::Scan`], when `options.duration` has elapsed. A single scan then
///   writes a device summary to `out`.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    let formatter = options.formatter();
    let mut monitor = BeaconMonitor::new(options.monitor_config());

    let mut advertisements = scanner.start_scan(options.backend).await?;
    log::info!(
        "{:?} for devices named like '{}'",
        options.mode,
        options.name
    );

    let deadline = async {
        match options.mode {
            Mode::Scan => tokio::time::sleep(options.duration).await,
            Mode::Monitor => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    loop {
        let advertisement = tokio::select! {
            advertisement = advertisements.recv() => match advertisement {
                Some(advertisement) => advertisement,
                None => {
                    log::info!("scanner closed");
                    break;
                }
            },
            _ = &mut deadline => {
                log::info!("scan duration elapsed");
                break;
            }
            _ = &mut shutdown => {
                log::info!("interrupted");
                break;
            }
        };

        let now = Instant::now();
        if let Some(event) = monitor.observe_at(advertisement, now) {
            write_event(event, formatter.as_ref(), options.verbose, out, err)?;
        }

        if let Some(max_idle) = options.forget_after {
            let removed = monitor.evict_idle(now, max_idle);
            if removed > 0 {
                log::debug!("forgot {removed} idle device(s)");
            }
        }
    }

    // Stops the backend
    drop(advertisements);

    if options.mode == Mode::Scan {
        write_summary(&monitor, out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::uuid16_to_string;
    use crate::test_utils::{
        TEST_ADDRESS, TEST_NAME, advertisement, climate_frame, hex_bytes, tlm_advertisement,
    };
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeScanner {
        advertisements: Mutex<Vec<RawAdvertisement>>,
    }

    impl FakeScanner {
        fn new(advertisements: Vec<RawAdvertisement>) -> Self {
            Self {
                advertisements: Mutex::new(advertisements),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>>
                    + Send
                    + '_,
            >,
        > {
            let advertisements = self.advertisements.lock().unwrap().clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<RawAdvertisement>(advertisements.len().max(1));
                tokio::spawn(async move {
                    for a in advertisements {
                        let _ = tx.send(a).await;
                    }
                    // drop tx to close channel
                });
                Ok(rx)
            })
        }
    }

    /// A scanner that never delivers anything and never closes.
    struct SilentScanner;

    impl Scanner for SilentScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>>
                    + Send
                    + '_,
            >,
        > {
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<RawAdvertisement>(1);
                tokio::spawn(async move {
                    tx.closed().await;
                });
                Ok(rx)
            })
        }
    }

    struct FailingScanner;

    impl Scanner for FailingScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>>
                    + Send
                    + '_,
            >,
        > {
            Box::pin(async move { Err(ScanError::Bluetooth("no adapter".to_string())) })
        }
    }

    fn options(mode: Mode) -> Options {
        Options {
            name: "nRF52840_DUMMY".to_string(),
            mode,
            duration: Duration::from_secs(3600),
            throttle: Duration::from_secs(2),
            temperature_delta: 0.1,
            humidity_delta: 1.0,
            forget_after: None,
            format: Format::Text,
            influxdb_measurement: DEFAULT_MEASUREMENT.to_string(),
            verbose: false,
            backend: Backend::default(),
        }
    }

    async fn run(options: Options, scanner: &dyn Scanner) -> (String, String) {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(options, scanner, &mut out, &mut err, std::future::pending())
            .await
            .unwrap();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn run_writes_readings_and_summary() {
        let scanner = FakeScanner::new(vec![tlm_advertisement(
            TEST_ADDRESS,
            climate_frame(0x1700, 1650),
        )]);

        let (out, err) = run(options(Mode::Scan), &scanner).await;
        assert!(err.is_empty());

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "nRF52840_DUMMY_01 (AA:BB:CC:DD:EE:FF) rssi=-60dBm T=23.00°C H=50.00% count=1 uptime=1.0s version=0"
        );
        assert_eq!(lines[1], "--- Scan complete ---");
        assert_eq!(lines[2], "Found 1 telemetry device(s):");
        assert_eq!(
            lines[3],
            "  nRF52840_DUMMY_01 (AA:BB:CC:DD:EE:FF): T=23.00°C, H=50.00%, rssi=-60dBm"
        );
        assert_eq!(
            lines[4],
            "1 advertisements, 1 readings, 0 suppressed, 0 decode failures, 0 without telemetry"
        );
    }

    #[tokio::test]
    async fn run_rate_limits_single_scan() {
        let payload = climate_frame(0x1700, 1650);
        let scanner = FakeScanner::new(vec![
            tlm_advertisement(TEST_ADDRESS, payload.clone()),
            tlm_advertisement(TEST_ADDRESS, payload),
        ]);

        let (out, _) = run(options(Mode::Scan), &scanner).await;
        let readings = out.lines().filter(|l| l.contains("count=")).count();
        assert_eq!(readings, 1);
        assert!(out.contains("1 readings, 1 suppressed"));
    }

    #[tokio::test]
    async fn run_monitor_reports_changes_only() {
        let scanner = FakeScanner::new(vec![
            tlm_advertisement(TEST_ADDRESS, climate_frame(0x1700, 1650)),
            tlm_advertisement(TEST_ADDRESS, climate_frame(0x170D, 1650)),
            tlm_advertisement(TEST_ADDRESS, climate_frame(0x1733, 1650)),
        ]);

        let (out, _) = run(options(Mode::Monitor), &scanner).await;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        // Monitor mode stamps each reading with the time of day
        assert!(lines.iter().all(|l| l.starts_with('[') && l[9..].starts_with("] ")));
        assert!(lines[0].contains("T=23.00°C"));
        assert!(lines[1].contains("T=23.20°C"));
        // No summary in monitor mode
        assert!(!out.contains("Scan complete"));
    }

    #[tokio::test]
    async fn run_prints_decode_errors_only_when_verbose() {
        let scanner = FakeScanner::new(vec![
            tlm_advertisement(TEST_ADDRESS, vec![0x06; 13]),
            advertisement(
                TEST_ADDRESS,
                Some(TEST_NAME),
                vec![(uuid16_to_string(0x181A), vec![0x01])],
            ),
        ]);

        let (_, err) = run(options(Mode::Monitor), &scanner).await;
        assert!(err.is_empty());

        let mut verbose = options(Mode::Monitor);
        verbose.verbose = true;
        let (out, err) = run(verbose, &scanner).await;

        assert!(out.is_empty());
        let lines: Vec<&str> = err.lines().collect();
        assert_eq!(
            lines,
            vec![
                "AA:BB:CC:DD:EE:FF: failed to decode telemetry 06060606060606060606060606: Unexpected payload length: 13 bytes",
                "AA:BB:CC:DD:EE:FF: no telemetry service data",
            ]
        );
    }

    #[tokio::test]
    async fn run_continues_after_decode_failure() {
        let scanner = FakeScanner::new(vec![
            tlm_advertisement(TEST_ADDRESS, vec![0x01, 0x02]),
            tlm_advertisement(TEST_ADDRESS, hex_bytes("063615e3000002b2000035c7")),
        ]);

        let (out, _) = run(options(Mode::Monitor), &scanner).await;
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("version=6"));
    }

    #[tokio::test]
    async fn run_writes_influxdb_lines() {
        let scanner = FakeScanner::new(vec![tlm_advertisement(
            TEST_ADDRESS,
            climate_frame(0x1700, 1650),
        )]);
        let mut opts = options(Mode::Monitor);
        opts.format = Format::Influxdb;

        let (out, _) = run(opts, &scanner).await;
        assert!(out.starts_with("eddystone_tlm,address=AA:BB:CC:DD:EE:FF,name=nRF52840_DUMMY_01 "));
        assert!(out.contains("temperature=23,"));
        assert!(out.ends_with('\n'));
    }

    #[tokio::test]
    async fn run_summary_without_devices() {
        let scanner =
            FakeScanner::new(vec![advertisement(TEST_ADDRESS, Some("Other"), Vec::new())]);

        let (out, _) = run(options(Mode::Scan), &scanner).await;
        assert!(out.contains("No telemetry devices matching 'nRF52840_DUMMY' found."));
        assert!(out.contains("1 advertisements, 0 readings"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_single_scan_stops_after_duration() {
        let mut opts = options(Mode::Scan);
        opts.duration = Duration::from_secs(30);

        let (out, _) = run(opts, &SilentScanner).await;
        assert!(out.starts_with("--- Scan complete ---"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(
            options(Mode::Monitor),
            &SilentScanner,
            &mut out,
            &mut err,
            std::future::ready(()),
        )
        .await
        .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn run_propagates_scan_errors() {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let result = run_with_io(
            options(Mode::Scan),
            &FailingScanner,
            &mut out,
            &mut err,
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(RunError::Scan(ScanError::Bluetooth(_)))));
    }

    #[test]
    fn monitor_config_follows_mode() {
        let scan = options(Mode::Scan).monitor_config();
        assert_eq!(scan.policy, EmitPolicy::RateLimited(Duration::from_secs(2)));
        assert_eq!(scan.target_name, "nRF52840_DUMMY");

        let monitor = options(Mode::Monitor).monitor_config();
        assert_eq!(monitor.policy, EmitPolicy::on_change());
    }

    #[test]
    fn options_parse_defaults() {
        let opts = Options::try_parse_from(["eddystone-tlm-listener"]).unwrap();
        assert_eq!(opts.name, "nRF52840_DUMMY");
        assert_eq!(opts.mode, Mode::Scan);
        assert_eq!(opts.duration, Duration::from_secs(30));
        assert_eq!(opts.throttle, Duration::from_secs(2));
        assert_eq!(opts.format, Format::Text);
        assert_eq!(opts.forget_after, None);
    }

    #[test]
    fn options_parse_monitor_mode() {
        let opts = Options::try_parse_from([
            "eddystone-tlm-listener",
            "--mode",
            "monitor",
            "--name",
            "sensor",
            "--temperature-delta",
            "0.5",
            "--forget-after",
            "10m",
            "--format",
            "influxdb",
        ])
        .unwrap();
        assert_eq!(opts.mode, Mode::Monitor);
        assert_eq!(opts.name, "sensor");
        assert_eq!(opts.temperature_delta, 0.5);
        assert_eq!(opts.forget_after, Some(Duration::from_secs(600)));
        assert_eq!(opts.format, Format::Influxdb);
    }
}
