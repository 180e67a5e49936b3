// =============================================================================
// seed-producer — synthetic report generator
// =============================================================================
// Posts randomized ReportMessage JSON payloads to a running ingestion
// server's /enqueue endpoint at a configurable rate, for local soak testing
// and for seeding a fresh database with plausible data.
// =============================================================================

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Serialize)]
struct LatLon {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
struct ReportMessage {
    user_name: String,
    user_location: LatLon,
    location_name: String,
    location_pos: LatLon,
    report_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_minutes: Option<i64>,
}

#[derive(Parser)]
#[command(name = "seed-producer")]
#[command(about = "Generates synthetic transit reports against a running ingestion server")]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Reports per second
    #[arg(long, default_value_t = 20)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Number of distinct reporter usernames to round-robin through. These
    /// must already exist in the target database.
    #[arg(long, default_value_t = 10)]
    users: usize,

    /// Number of distinct trip@stop locations to report against
    #[arg(long, default_value_t = 5)]
    locations: usize,

    /// Center latitude, degrees
    #[arg(long, default_value_t = 50.06143)]
    lat: f64,

    /// Center longitude, degrees
    #[arg(long, default_value_t = 19.93658)]
    lon: f64,
}

const REPORT_TYPES: &[&str] = &["DELAY", "MAINTENANCE", "ACCIDENT", "SOLVED", "OTHER"];

struct Counters {
    sent: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    network_error: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }
}

fn build_report(rng: &mut impl Rng, user: &str, location: &str, center: (f64, f64)) -> ReportMessage {
    let mut jitter = || rng.gen_range(-0.01..0.01);
    let pos = LatLon {
        latitude: center.0 + jitter(),
        longitude: center.1 + jitter(),
    };
    ReportMessage {
        user_name: user.to_string(),
        user_location: LatLon {
            latitude: pos.latitude + jitter() * 0.1,
            longitude: pos.longitude + jitter() * 0.1,
        },
        location_name: location.to_string(),
        location_pos: pos,
        report_type: REPORT_TYPES[rng.gen_range(0..REPORT_TYPES.len())],
        delay_minutes: if rng.gen_bool(0.7) { Some(rng.gen_range(1..30)) } else { None },
    }
}

fn main() {
    let args = Args::parse();

    println!("=== seed-producer ===");
    println!("Target:    {}/enqueue", args.url);
    println!("Rate:      {} report/s", args.rate);
    println!("Duration:  {}s", args.duration);
    println!("Users:     {}", args.users);
    println!("Locations: {}", args.locations);
    println!();

    let users: Vec<String> = (0..args.users).map(|i| format!("seed-user-{i}")).collect();
    let locations: Vec<String> = (0..args.locations).map(|i| format!("trip-{i}@stop-{i}")).collect();

    let health_url = format!("{}/health", args.url);
    match reqwest::blocking::get(&health_url) {
        Ok(r) if r.status().is_success() => println!("Server health: OK"),
        Ok(r) => {
            eprintln!("Server health check failed: {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot reach server: {}", e);
            std::process::exit(1);
        }
    }

    let counters = Arc::new(Counters::new());
    let enqueue_url = format!("{}/enqueue", args.url);

    let interval = Duration::from_micros(1_000_000 / args.rate as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("\nSending...\n");
    let start = Instant::now();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let mut rng = rand::thread_rng();
    let mut tick = 0u64;

    while Instant::now() < deadline {
        let user = &users[(tick as usize) % users.len()];
        let location = &locations[(tick as usize) % locations.len()];
        let report = build_report(&mut rng, user, location, (args.lat, args.lon));

        let req_start = Instant::now();
        counters.sent.fetch_add(1, Ordering::Relaxed);

        match client.post(&enqueue_url).json(&report).send() {
            Ok(resp) => {
                let lat = req_start.elapsed().as_micros() as u64;
                counters.latency_sum_us.fetch_add(lat, Ordering::Relaxed);

                if resp.status().is_success() {
                    counters.accepted.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                    if tick < 5 {
                        eprintln!("Unexpected status: {}", resp.status());
                    }
                }
            }
            Err(_) => {
                counters.network_error.fetch_add(1, Ordering::Relaxed);
            }
        }

        tick += 1;

        if tick % 500 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!(
                "  [{:.1}s] sent={} accepted={} rejected={} err={} ({:.0} report/s)",
                elapsed,
                sent,
                counters.accepted.load(Ordering::Relaxed),
                counters.rejected.load(Ordering::Relaxed),
                counters.network_error.load(Ordering::Relaxed),
                sent as f64 / elapsed,
            );
        }

        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            std::thread::sleep(target - actual);
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    let accepted = counters.accepted.load(Ordering::Relaxed);
    let avg_lat = if sent > 0 {
        counters.latency_sum_us.load(Ordering::Relaxed) / sent
    } else {
        0
    };

    println!("\n=== Results ===");
    println!("Duration:    {:.2}s", elapsed.as_secs_f64());
    println!("Total sent:  {}", sent);
    println!("Accepted:    {} ({:.1}%)", accepted, accepted as f64 / sent.max(1) as f64 * 100.0);
    println!("Rejected:    {}", counters.rejected.load(Ordering::Relaxed));
    println!("Net errors:  {}", counters.network_error.load(Ordering::Relaxed));
    println!("Avg latency: {} us", avg_lat);
    println!("Throughput:  {:.1} report/s", sent as f64 / elapsed.as_secs_f64());
}
