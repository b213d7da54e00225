use std::sync::Arc;
use std::time::{Duration, Instant};

use careslot::model::*;
use careslot::{BookingRequest, CoreConfig, CoreError, SchedulingService};
use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

const SLOT_MINUTES: u32 = 30;
const SLOTS_PER_DAY: usize = 24; // 08:00–20:00

/// 2030-01-01T00:00:00Z
fn epoch() -> Ms {
    NaiveDate::from_ymd_opt(2030, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

/// Start of the `n`th bookable half hour, counting from `epoch()`.
fn slot_start(n: usize) -> Ms {
    let day = (n / SLOTS_PER_DAY) as Ms;
    let within = (n % SLOTS_PER_DAY) as Ms;
    epoch() + day * DAY_MS + 8 * 60 * MINUTE_MS + within * SLOT_MINUTES as Ms * MINUTE_MS
}

fn every_day() -> Vec<AvailabilityWindow> {
    (0..7)
        .map(|d| {
            AvailabilityWindow::new(
                d,
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            )
        })
        .collect()
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn new_doctor(service: &SchedulingService) -> DoctorId {
    let doctor = Ulid::new();
    service
        .set_doctor_availability(doctor, every_day())
        .await
        .unwrap();
    doctor
}

async fn phase1_sequential(service: &SchedulingService) {
    let doctor = new_doctor(service).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        service
            .book_appointment(
                BookingRequest::new(Ulid::new(), doctor, slot_start(i)).with_duration(SLOT_MINUTES),
            )
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("book latency", &mut latencies);
}

async fn phase2_concurrent(service: Arc<SchedulingService>) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            // One doctor per task: writers never share a critical section
            let doctor = new_doctor(&service).await;
            for j in 0..n_per_task {
                service
                    .book_appointment(BookingRequest::new(Ulid::new(), doctor, slot_start(j)))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(service: Arc<SchedulingService>) {
    let doctor = new_doctor(&service).await;

    let writer = {
        let service = service.clone();
        tokio::spawn(async move {
            for i in 0..1000 {
                service
                    .book_appointment(BookingRequest::new(Ulid::new(), doctor, slot_start(i)))
                    .await
                    .unwrap();
            }
        })
    };

    let mut reader_handles = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        reader_handles.push(tokio::spawn(async move {
            let filter = AppointmentFilter {
                doctor_id: Some(doctor),
                date_range: Some(Span::new(epoch(), epoch() + 7 * DAY_MS)),
                ..Default::default()
            };
            let mut latencies = Vec::with_capacity(500);
            for _ in 0..500 {
                let t = Instant::now();
                let _ = service.query_appointments(&filter).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    writer.await.unwrap();
    let mut latencies = Vec::new();
    for h in reader_handles {
        latencies.extend(h.await.unwrap());
    }
    print_latency("query latency", &mut latencies);
}

async fn phase4_contention_storm(service: Arc<SchedulingService>) {
    let doctor = new_doctor(&service).await;
    let n = 256;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = service
                .book_appointment(BookingRequest::new(Ulid::new(), doctor, slot_start(0)))
                .await;
            (result, t.elapsed())
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    let mut latencies = Vec::with_capacity(n);
    for h in handles {
        let (result, elapsed) = h.await.unwrap();
        match result {
            Ok(_) => winners += 1,
            Err(CoreError::DoubleBooking { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
        latencies.push(elapsed);
    }

    assert_eq!(winners, 1, "exactly one booking must win the slot");
    println!(
        "  {n} racing bookings in {:.2}s: {winners} won, {conflicts} double-booked",
        start.elapsed().as_secs_f64()
    );
    print_latency("racing book latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    careslot::observability::init_tracing();
    let config = CoreConfig::from_env();

    println!("=== careslot stress benchmark ===");
    match &config.data_dir {
        Some(dir) => println!("journal: {}\n", dir.display()),
        None => println!("journal: memory\n"),
    }

    let service = Arc::new(SchedulingService::open(config).await.expect("open failed"));

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&service).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(service.clone()).await;

    println!("\n[phase 3] query latency under write load");
    phase3_read_under_load(service.clone()).await;

    println!("\n[phase 4] contention storm");
    phase4_contention_storm(service.clone()).await;

    let t = Instant::now();
    service.compact().await.expect("compaction failed");
    println!("\n[compact] {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    println!("\n=== benchmark complete ===");
}
