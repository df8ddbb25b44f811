use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use tracing_subscriber::EnvFilter;

use redis_gcra::{
    GcraRateLimiter, GcraRateLimiterOptions, GcraStore, LimitOverrides, LocalGcraStore,
};

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Provider {
    Local,
    Redis,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum KeyDist {
    Hot,
    Uniform,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "redis-gcra-stress",
    about = "Load test / admission check harness for redis-gcra"
)]
struct Args {
    #[arg(long, value_enum, default_value_t = Provider::Local)]
    provider: Provider,

    #[arg(long, value_enum, default_value_t = KeyDist::Hot)]
    key_dist: KeyDist,

    #[arg(long, default_value_t = 16)]
    tasks: usize,

    #[arg(long, default_value_t = 10)]
    duration_s: u64,

    #[arg(long, default_value_t = 1000)]
    key_space: usize,

    #[arg(long, default_value_t = 100.0)]
    burst: f64,

    #[arg(long, default_value_t = 50.0)]
    rate: f64,

    #[arg(long, default_value_t = 1000.0)]
    period_ms: f64,

    #[arg(long, default_value_t = 1.0)]
    cost: f64,

    #[arg(long, default_value_t = 100)]
    sample_every: u64,

    #[arg(long, default_value = "redis://127.0.0.1:16379/")]
    redis_url: String,

    #[arg(long, default_value = "stress")]
    prefix: String,
}

#[derive(Default)]
struct Counts {
    admitted: AtomicU64,
    admitted_cost: AtomicU64,
    limited: AtomicU64,
    errors: AtomicU64,
}

fn build_keys(args: &Args) -> Vec<String> {
    let n = match args.key_dist {
        KeyDist::Hot => 1,
        KeyDist::Uniform => args.key_space.max(1),
    };
    (0..n).map(|i| format!("user_{i}")).collect()
}

fn should_sample(iter: u64, sample_every: u64) -> bool {
    if sample_every <= 1 {
        return true;
    }

    iter.is_multiple_of(sample_every)
}

fn options(args: &Args) -> GcraRateLimiterOptions {
    // Unique per run so leftover Redis state never skews the budget.
    let run_id = std::process::id();

    GcraRateLimiterOptions {
        key_prefix: Some(format!("{}_{run_id}", args.prefix)),
        defaults: LimitOverrides::default()
            .burst(args.burst)
            .rate(args.rate)
            .period_ms(args.period_ms)
            .cost(args.cost),
    }
}

/// Upper bound of tokens a single key can hand out over `elapsed`.
fn theoretical_budget(args: &Args, elapsed: Duration) -> f64 {
    args.burst + elapsed.as_secs_f64() * 1000.0 * args.rate / args.period_ms
}

fn print_results(
    args: &Args,
    elapsed: Duration,
    touched_keys: usize,
    hist: &Histogram<u64>,
    counts: &Counts,
) {
    let ops = counts.admitted.load(Ordering::Relaxed)
        + counts.limited.load(Ordering::Relaxed)
        + counts.errors.load(Ordering::Relaxed);

    println!("provider={:?} key_dist={:?}", args.provider, args.key_dist);
    println!(
        "tasks={} duration_s={} key_space={} burst={} rate={} period_ms={} cost={}",
        args.tasks,
        args.duration_s,
        args.key_space,
        args.burst,
        args.rate,
        args.period_ms,
        args.cost
    );
    println!(
        "elapsed_s={:.3} ops={} ops_per_s={:.0}",
        elapsed.as_secs_f64(),
        ops,
        ops as f64 / elapsed.as_secs_f64()
    );

    let admitted_cost = counts.admitted_cost.load(Ordering::Relaxed);
    let budget = theoretical_budget(args, elapsed) * touched_keys as f64;
    println!(
        "admitted={} limited={} errors={}",
        counts.admitted.load(Ordering::Relaxed),
        counts.limited.load(Ordering::Relaxed),
        counts.errors.load(Ordering::Relaxed)
    );
    println!(
        "admitted_cost={} budget={:.0} keys={} over_budget={}",
        admitted_cost,
        budget,
        touched_keys,
        admitted_cost as f64 > budget.floor()
    );

    if !hist.is_empty() {
        println!(
            "lat_us p50={} p95={} p99={} p999={} max={}",
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.95),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.max()
        );
        println!("sample_every={} samples={}", args.sample_every, hist.len());
    } else {
        println!("no latency samples collected");
    }
}

async fn drive<S>(args: Args, limiter: GcraRateLimiter<S>)
where
    S: GcraStore + 'static,
{
    let limiter = Arc::new(limiter);
    let keys = Arc::new(build_keys(&args));
    let counts = Arc::new(Counts::default());
    let cost = args.cost.max(0.0) as u64;

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration_s);

    let mut join = Vec::with_capacity(args.tasks);
    for t in 0..args.tasks {
        let limiter = Arc::clone(&limiter);
        let keys = Arc::clone(&keys);
        let counts = Arc::clone(&counts);
        let sample_every = args.sample_every;

        join.push(tokio::spawn(async move {
            let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
            let mut touched = HashSet::new();
            let mut i = 0_u64;
            let mut seed = (t as u64 + 1) * 0x9E37_79B9_7F4A_7C15;
            let overrides = LimitOverrides::default();

            let mut rng_u64 = || {
                // xorshift64*
                seed ^= seed >> 12;
                seed ^= seed << 25;
                seed ^= seed >> 27;
                seed = seed.wrapping_mul(0x2545_F491_4F6C_DD1D);
                seed
            };

            while Instant::now() < deadline {
                i = i.wrapping_add(1);
                let idx = (rng_u64() as usize) % keys.len();
                let t0 = should_sample(i, sample_every).then(Instant::now);

                let res = limiter.limit(&keys[idx], &overrides).await;

                if let Some(t0) = t0 {
                    let us = t0.elapsed().as_micros() as u64;
                    let _ = hist.record(us.max(1));
                }

                match res {
                    Ok(decision) if !decision.limited => {
                        counts.admitted.fetch_add(1, Ordering::Relaxed);
                        counts.admitted_cost.fetch_add(cost, Ordering::Relaxed);
                        touched.insert(idx);
                    }
                    Ok(_) => {
                        counts.limited.fetch_add(1, Ordering::Relaxed);
                        touched.insert(idx);
                    }
                    Err(err) => {
                        counts.errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %err, "stress.limit_failed");
                    }
                }

                // Keep the local store from starving the scheduler.
                if i.is_multiple_of(64) {
                    tokio::task::yield_now().await;
                }
            }

            (hist, touched)
        }));
    }

    let mut merged = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
    let mut touched = HashSet::new();
    for j in join {
        let (hist, keys) = j.await.unwrap();
        merged.add(&hist).unwrap();
        touched.extend(keys);
    }

    let elapsed = started.elapsed();
    print_results(&args, elapsed, touched.len(), &merged, &counts);
}

fn run_local(args: &Args, rt: &tokio::runtime::Runtime) {
    let limiter = GcraRateLimiter::new(LocalGcraStore::new(), options(args)).unwrap();
    rt.block_on(drive(args.clone(), limiter));
}

#[cfg(feature = "redis-tokio")]
fn run_redis(args: &Args, rt: &tokio::runtime::Runtime) {
    use redis_gcra::redis::{GcraRedisClient, RedisGcraStore};

    rt.block_on(async {
        let client = redis::Client::open(args.redis_url.as_str()).unwrap();
        let client = GcraRedisClient::from_client(client, args.tasks.clamp(1, 16))
            .await
            .unwrap();

        let store = RedisGcraStore::new(client);
        store.load_script().await.unwrap();

        let limiter = GcraRateLimiter::new(store, options(args)).unwrap();
        drive(args.clone(), limiter).await;
    });
}

#[cfg(not(feature = "redis-tokio"))]
fn run_redis(_: &Args, _: &tokio::runtime::Runtime) {
    eprintln!("redis provider requires: cargo run -p redis-gcra-stress --features redis-tokio -- ...");
    std::process::exit(2);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    match args.provider {
        Provider::Local => run_local(&args, &rt),
        Provider::Redis => run_redis(&args, &rt),
    }
}
