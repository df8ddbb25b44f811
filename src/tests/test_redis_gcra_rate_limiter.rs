use std::{env, time::Duration};

use redis::AsyncCommands;

use crate::{
    GcraRateLimiter, GcraRateLimiterOptions, GcraStore, LimitOverrides, LimitParameters,
    MAX_TTL_SECONDS, PeekDecision,
    gcra::evaluate,
    redis::{GcraRedisClient, RedisGcraStore},
};

use super::runtime::{async_sleep, block_on};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    let n: u64 = rand::random();
    format!("redis_gcra_test_{n}")
}

async fn build_limiter(
    url: &str,
    defaults: LimitOverrides,
) -> (
    GcraRateLimiter<RedisGcraStore>,
    redis::aio::ConnectionManager,
    String,
) {
    let client = redis::Client::open(url).unwrap();
    let cm = client.get_connection_manager().await.unwrap();
    let prefix = unique_prefix();

    let limiter = GcraRateLimiter::new(
        RedisGcraStore::new(cm.clone()),
        GcraRateLimiterOptions {
            key_prefix: Some(prefix.clone()),
            defaults,
        },
    )
    .unwrap();

    (limiter, cm, prefix)
}

fn within(d: Duration, low_ms: u128, high_ms: u128) -> bool {
    let ms = d.as_millis();
    ms >= low_ms && ms <= high_ms
}

#[test]
fn basic_limit_and_regen() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let (limiter, _cm, _prefix) = build_limiter(&url, LimitOverrides::default()).await;
        let opts = LimitOverrides::default()
            .burst(2f64)
            .rate(1f64)
            .period_ms(1000f64)
            .cost(1f64);

        let d = limiter.limit("testKey", &opts).await.unwrap();
        assert!(!d.limited);
        assert_eq!(d.remaining, 1);
        assert_eq!(d.retry_in, Some(Duration::ZERO));
        assert!(within(d.reset_in, 990, 1000));

        let d = limiter.limit("testKey", &opts).await.unwrap();
        assert!(!d.limited);
        assert_eq!(d.remaining, 0);
        assert!(within(d.reset_in, 1980, 2000));

        let d = limiter.limit("testKey", &opts).await.unwrap();
        assert!(d.limited);
        assert_eq!(d.remaining, 0);
        let retry_in = d.retry_in.unwrap();
        assert!(within(retry_in, 870, 1000), "retry_in={retry_in:?}");
        assert!(within(d.reset_in, 1970, 2000));

        async_sleep(retry_in + Duration::from_millis(1)).await;

        let d = limiter.limit("testKey", &opts).await.unwrap();
        assert!(!d.limited);
        assert_eq!(d.remaining, 0);
        assert!(within(d.reset_in, 1960, 2000));
    });
}

#[test]
fn limits_different_keys_independently() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let (limiter, _cm, _prefix) = build_limiter(&url, LimitOverrides::default()).await;
        let o = LimitOverrides::default();

        let (a, b, c) = futures::join!(
            limiter.limit("key1", &o),
            limiter.limit("key2", &o),
            limiter.limit("key1", &o),
        );

        let key2 = b.unwrap();
        assert!(!key2.limited);
        assert_eq!(key2.remaining, 59);

        // Same-key calls may be serialized in either order.
        let (mut first, mut second) = (a.unwrap(), c.unwrap());
        if first.remaining < second.remaining {
            std::mem::swap(&mut first, &mut second);
        }
        assert_eq!(first.remaining, 59);
        assert!(within(first.reset_in, 990, 1000));
        assert_eq!(second.remaining, 58);
        assert!(within(second.reset_in, 1980, 2000));
    });
}

#[test]
fn respects_key_prefixes_and_reset() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let (limiter, mut cm, prefix) =
            build_limiter(&url, LimitOverrides::default().cost(5f64)).await;

        let d = limiter.limit("key1", &LimitOverrides::default()).await.unwrap();
        assert_eq!(d.remaining, 55);
        assert!(within(d.reset_in, 4990, 5000));

        let stored = format!("{prefix}/key1");
        let exists: bool = cm.exists(&stored).await.unwrap();
        assert!(exists);

        let ttl: i64 = cm.ttl(&stored).await.unwrap();
        assert!((1..=5).contains(&ttl), "ttl={ttl}");

        assert!(limiter.reset("key1").await.unwrap());
        assert!(!limiter.reset("key1").await.unwrap());

        let exists: bool = cm.exists(&stored).await.unwrap();
        assert!(!exists);

        let p = limiter.peek("key1", &LimitOverrides::default()).await.unwrap();
        assert_eq!(
            p,
            PeekDecision {
                limited: false,
                remaining: 60,
                reset_in: Duration::ZERO,
            }
        );
    });
}

#[test]
fn peek_does_not_modify() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let (limiter, mut cm, prefix) = build_limiter(&url, LimitOverrides::default()).await;
        let o = LimitOverrides::default();

        limiter.peek("key1", &o).await.unwrap();
        let exists: bool = cm.exists(format!("{prefix}/key1")).await.unwrap();
        assert!(!exists, "peek must not create state");

        limiter.limit("key1", &o).await.unwrap();
        let before: String = cm.get(format!("{prefix}/key1")).await.unwrap();

        for _ in 0..3 {
            let p = limiter.peek("key1", &o).await.unwrap();
            assert!(!p.limited);
            assert_eq!(p.remaining, 59);
            assert!(within(p.reset_in, 980, 1000));
        }

        let after: String = cm.get(format!("{prefix}/key1")).await.unwrap();
        assert_eq!(before, after);
    });
}

#[test]
fn rejection_does_not_write() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let (limiter, mut cm, prefix) = build_limiter(&url, LimitOverrides::default()).await;
        let opts = LimitOverrides::default().burst(3f64).cost(2f64);

        assert!(!limiter.limit("k", &opts).await.unwrap().limited);
        let before: String = cm.get(format!("{prefix}/k")).await.unwrap();

        let d = limiter.limit("k", &opts).await.unwrap();
        assert!(d.limited);
        assert_eq!(d.remaining, 1);

        let after: String = cm.get(format!("{prefix}/k")).await.unwrap();
        assert_eq!(before, after);
    });
}

#[test]
fn unsatisfiable_cost() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let (limiter, _cm, _prefix) = build_limiter(&url, LimitOverrides::default()).await;
        let opts = LimitOverrides::default()
            .burst(1000f64)
            .rate(100f64)
            .period_ms(60_000f64)
            .cost(1001f64);

        let d = limiter.limit("testCase", &opts).await.unwrap();
        assert!(d.limited);
        assert_eq!(d.remaining, 1000);
        assert_eq!(d.retry_in, None);
    });
}

#[test]
fn sequential_reference_cases() {
    let Some(url) = redis_url() else {
        return;
    };

    let cases = [
        (4500f64, 75f64, 60_000f64, 2f64, 1u32, 4498u64),
        (1000f64, 100f64, 60_000f64, 200f64, 4, 200),
        (1000f64, 100f64, 60_000f64, 200f64, 5, 0),
        (1000f64, 100f64, 60_000f64, 1f64, 137, 863),
    ];

    block_on(async {
        for (index, (burst, rate, period, cost, repeat, remaining)) in
            cases.into_iter().enumerate()
        {
            let (limiter, _cm, _prefix) = build_limiter(&url, LimitOverrides::default()).await;
            let opts = LimitOverrides::default()
                .burst(burst)
                .rate(rate)
                .period_ms(period)
                .cost(cost);

            let mut last = None;
            for _ in 0..repeat {
                last = Some(limiter.limit("testCase", &opts).await.unwrap());
            }

            let last = last.unwrap();
            assert!(!last.limited, "case {index}");
            // Regeneration during the run can only add tokens.
            assert!(last.remaining >= remaining, "case {index}");
            assert!(last.remaining <= remaining + 1, "case {index}");
        }
    });
}

#[test]
fn fractional_emission_interval_depletes_one_token_per_call() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let (limiter, _cm, _prefix) = build_limiter(&url, LimitOverrides::default()).await;
        // ~8571.43ms per token, so wall clock drift during the run stays far below one token.
        let opts = LimitOverrides::default()
            .burst(7f64)
            .rate(7f64)
            .period_ms(60_000f64)
            .cost(1f64);

        for expected in (0..7u64).rev() {
            let d = limiter.limit("k", &opts).await.unwrap();
            assert!(!d.limited);
            assert_eq!(d.remaining, expected);
        }

        let d = limiter.limit("k", &opts).await.unwrap();
        assert!(d.limited);
        assert_eq!(d.remaining, 0);
    });
}

#[test]
fn huge_ttl_is_capped() {
    let Some(url) = redis_url() else {
        return;
    };

    block_on(async {
        let client = redis::Client::open(url.as_str()).unwrap();
        let mut cm = client.get_connection_manager().await.unwrap();
        let store = RedisGcraStore::new(cm.clone());

        // TAT lands 1e19ms out. A now that is a multiple of 2048 keeps the sum exact.
        let key = format!("{}/huge", unique_prefix());
        let params = LimitParameters::new(1e9, 1f64, 1e10, 1e9).unwrap();
        let now_ms = 1_700_000_000_000u64;

        let outcome = store.perform_gcra(&key, now_ms, &params).await.unwrap();
        assert_eq!(outcome, evaluate(now_ms, &params, None).outcome);
        assert!(!outcome.limited);

        let ttl: i64 = cm.ttl(&key).await.unwrap();
        assert!(ttl > 0 && ttl as u64 <= MAX_TTL_SECONDS, "ttl={ttl}");

        assert_eq!(store.delete(&key).await.unwrap(), 1);
    });
}

#[test]
fn script_matches_local_engine() {
    let Some(url) = redis_url() else {
        return;
    };

    let cases = [
        (5f64, 2f64, 1000f64, 2f64, 4usize),
        (7f64, 7f64, 1000f64, 1f64, 9),
        (3f64, 3f64, 1000f64, 1f64, 5),
    ];

    block_on(async {
        let client = redis::Client::open(url.as_str()).unwrap();
        let store = RedisGcraStore::new(GcraRedisClient::from_client(client, 2).await.unwrap());
        store.load_script().await.unwrap();

        for (burst, rate, period, cost, repeat) in cases {
            let key = format!("{}/parity", unique_prefix());
            let params = LimitParameters::new(burst, rate, period, cost).unwrap();
            let now_ms = 1_700_000_000_000u64;

            let mut tat = None;
            for _ in 0..repeat {
                let local = evaluate(now_ms, &params, tat);
                if local.next_tat.is_some() {
                    tat = local.next_tat;
                }

                let remote = store.perform_gcra(&key, now_ms, &params).await.unwrap();
                assert_eq!(remote, local.outcome, "case {burst}/{rate}/{period}/{cost}");
            }

            assert_eq!(store.delete(&key).await.unwrap(), 1);
        }
    });
}
