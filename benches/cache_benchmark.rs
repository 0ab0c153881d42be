use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::{sync::Arc, time::Duration};

use cms_server::cache::{ManualClock, TtlCache};

fn cache_set_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set");

    for size in [10, 25, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let cache = TtlCache::from_capacity(size);
                for i in 0..size {
                    let key = format!("localhost_page_{}", i);
                    cache.set(black_box(&key), black_box("<h1>page</h1>"), 900);
                }
            });
        });
    }

    group.finish();
}

fn cache_get_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get");

    for size in [10, 25, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let cache = TtlCache::from_capacity(size);
            for i in 0..size {
                cache.set(&format!("localhost_page_{}", i), "<h1>page</h1>", 900);
            }

            b.iter(|| {
                for i in 0..size {
                    let key = format!("localhost_page_{}", i);
                    let _ = cache.get(black_box(&key));
                }
            });
        });
    }

    group.finish();
}

fn cache_get_miss_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_miss");

    for size in [10, 25, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let cache = TtlCache::from_capacity(size);
            for i in 0..size {
                cache.set(&format!("localhost_page_{}", i), "<h1>page</h1>", 900);
            }

            b.iter(|| {
                let _ = cache.get(black_box("quizbin_page_missing"));
            });
        });
    }

    group.finish();
}

fn cache_full_rejection_benchmark(c: &mut Criterion) {
    c.bench_function("cache_full_rejection", |b| {
        let cache = TtlCache::from_capacity(25);
        for i in 0..25 {
            cache.set(&format!("localhost_page_{}", i), "<h1>page</h1>", 900);
        }

        b.iter(|| {
            let stored = cache.set(black_box("localhost_page_extra"), black_box("x"), 900);
            assert!(!stored);
        });
    });
}

fn cache_expiry_sweep_benchmark(c: &mut Criterion) {
    c.bench_function("cache_expiry_sweep", |b| {
        b.iter(|| {
            let clock = Arc::new(ManualClock::new());
            let cache = TtlCache::with_clock(100, Arc::clone(&clock));
            for i in 0..100 {
                cache.set(&format!("localhost_page_{}", i), "<h1>page</h1>", 1);
            }
            clock.advance(Duration::from_secs(2));
            // 满载时的写入触发一次整体清扫
            cache.set(black_box("fresh"), black_box("v"), 900);
        });
    });
}

fn cache_large_value_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_large_value");

    for value_size in [1024, 10240, 102400].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(value_size),
            value_size,
            |b, &value_size| {
                let value = "x".repeat(value_size);
                let cache = TtlCache::from_capacity(10);
                cache.set("localhost_page_index", &value, 900);
                b.iter(|| {
                    let _ = cache.get(black_box("localhost_page_index"));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    cache_set_benchmark,
    cache_get_benchmark,
    cache_get_miss_benchmark,
    cache_full_rejection_benchmark,
    cache_expiry_sweep_benchmark,
    cache_large_value_benchmark
);
criterion_main!(benches);
