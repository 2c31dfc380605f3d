//! Integration benchmark for the telemetry processing pipeline.
//!
//! Benchmarks the full application loop using the same patterns as the
//! tests in app.rs - with a FakeScanner feeding advertisements through
//! run_with_io.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use eddystone_tlm_listener::app::{Mode, Options, Scanner, run_with_io};
use eddystone_tlm_listener::output::Format;
use eddystone_tlm_listener::{Backend, RawAdvertisement, ScanError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Long layout payload: 23.4375 C, 53.91 %, count 695
fn long_payload() -> Vec<u8> {
    vec![
        0x20, 0x01, 0x06, 0xF3, 0x17, 0x70, 0x00, 0x00, 0x02, 0xB7, 0x00, 0x00, 0x36, 0x2B,
    ]
}

fn advertisement(address: String, payload: Vec<u8>) -> RawAdvertisement {
    RawAdvertisement {
        address,
        name: Some("nRF52840_DUMMY_01".to_string()),
        rssi: -60,
        service_data: vec![(
            "0000feaa-0000-1000-8000-00805f9b34fb".to_string(),
            payload,
        )],
    }
}

/// A fake scanner that replays advertisements, similar to the one in app.rs tests.
struct FakeScanner {
    advertisements: Vec<RawAdvertisement>,
}

impl Scanner for FakeScanner {
    fn start_scan(
        &self,
        _backend: Backend,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>> + Send + '_>,
    > {
        let advertisements = self.advertisements.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<RawAdvertisement>(advertisements.len().max(1));
            tokio::spawn(async move {
                for a in advertisements {
                    let _ = tx.send(a).await;
                }
            });
            Ok(rx)
        })
    }
}

fn default_options(mode: Mode) -> Options {
    Options {
        name: "nRF52840_DUMMY".to_string(),
        mode,
        duration: Duration::from_secs(3600),
        throttle: Duration::from_secs(2),
        temperature_delta: 0.1,
        humidity_delta: 1.0,
        forget_after: None,
        format: Format::Text,
        influxdb_measurement: "eddystone_tlm".to_string(),
        verbose: false,
        backend: Backend::default(),
    }
}

fn run_once(rt: &Runtime, scanner: &FakeScanner, options: Options, capacity: usize) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(capacity);
    let mut err = Vec::<u8>::new();

    rt.block_on(async {
        run_with_io(options, scanner, &mut out, &mut err, std::future::pending())
            .await
            .unwrap();
    });

    out
}

/// Benchmark batches of distinct devices through the full pipeline
fn bench_batch_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_pipeline");
    let rt = Runtime::new().unwrap();

    for batch_size in [1, 10, 100] {
        let scanner = FakeScanner {
            advertisements: (0..batch_size)
                .map(|i| advertisement(format!("AA:BB:CC:DD:EE:{i:02X}"), long_payload()))
                .collect(),
        };

        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                b.iter(|| {
                    let out = run_once(&rt, &scanner, default_options(Mode::Monitor), 128 * size);
                    black_box(out)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark a single scan where most sightings are rate limited
fn bench_rate_limited_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limited_pipeline");
    let rt = Runtime::new().unwrap();

    let scanner = FakeScanner {
        advertisements: (0..100)
            .map(|_| advertisement("AA:BB:CC:DD:EE:FF".to_string(), long_payload()))
            .collect(),
    };

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_same_device", |b| {
        b.iter(|| {
            let out = run_once(&rt, &scanner, default_options(Mode::Scan), 512);
            black_box(out)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_batch_pipeline, bench_rate_limited_pipeline);
criterion_main!(benches);
