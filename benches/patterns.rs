//! Benchmarks for chart-pattern analysis and scoring.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use chartscan::prelude::*;

/// Simple test bar structure
#[derive(Debug, Clone, Copy)]
struct TestBar {
  o: f64,
  h: f64,
  l: f64,
  c: f64,
  v: f64,
}

impl OHLCV for TestBar {
  fn open(&self) -> f64 {
    self.o
  }

  fn high(&self) -> f64 {
    self.h
  }

  fn low(&self) -> f64 {
    self.l
  }

  fn close(&self) -> f64 {
    self.c
  }

  fn volume(&self) -> f64 {
    self.v
  }
}

/// Generate a drifting, oscillating daily series
fn generate_series(n: usize) -> PriceSeries {
  let mut bars = Vec::with_capacity(n);
  let mut price: f64 = 50.0;

  for i in 0..n {
    let change = ((i * 7 + 13) % 100) as f64 / 50.0 - 0.9; // Deterministic "random", upward drift
    let volatility = 0.5 + ((i * 3) % 10) as f64 / 10.0;

    let o = price;
    let c = (price + change * 0.5).max(1.0);
    let h = o.max(c) + volatility * 0.5;
    let l = (o.min(c) - volatility * 0.5).max(0.5);
    let v = 1_000_000.0 + ((i * 11) % 17) as f64 * 50_000.0;

    bars.push(TestBar { o, h, l, c, v });
    price = c;
  }

  PriceSeries::from_bars(&bars)
}

fn bench_metrics(c: &mut Criterion) {
  let series = generate_series(400);

  c.bench_function("metrics_400_bars", |b| {
    b.iter(|| {
      let _ = black_box(TechnicalMetrics::compute(black_box(&series)));
    })
  });
}

fn bench_single_pattern(c: &mut Criterion) {
  let series = generate_series(400);

  let engine = EngineBuilder::new()
    .add(BuiltinDetector::Vcp(VcpDetector::with_defaults()))
    .require_trend_template(false)
    .build()
    .unwrap();

  c.bench_function("analyze_vcp_400_bars", |b| {
    b.iter(|| {
      let _ = black_box(engine.analyze(black_box("BENCH"), black_box(&series), None));
    })
  });
}

fn bench_all_patterns(c: &mut Criterion) {
  let series = generate_series(400);
  let benchmark = PriceSeries::from_closes(vec![100.0; 400]);

  let engine = EngineBuilder::new()
    .with_all_defaults()
    .require_trend_template(false)
    .build()
    .unwrap();

  c.bench_function("analyze_all_patterns_400_bars", |b| {
    b.iter(|| {
      let _ = black_box(engine.analyze(black_box("BENCH"), black_box(&series), Some(&benchmark)));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let engine = EngineBuilder::new()
    .with_all_defaults()
    .require_trend_template(false)
    .build()
    .unwrap();

  let mut group = c.benchmark_group("scaling");

  for size in [260, 500, 1000, 2500].iter() {
    let series = generate_series(*size);

    group.bench_with_input(BenchmarkId::new("analyze", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(engine.analyze("BENCH", black_box(&series), None));
      })
    });
  }

  group.finish();
}

fn bench_parallel_analysis(c: &mut Criterion) {
  let universe: Vec<(String, PriceSeries)> =
    (0..32).map(|i| (format!("SYM{i}"), generate_series(300 + i * 5))).collect();

  let engine = EngineBuilder::new()
    .with_all_defaults()
    .require_trend_template(false)
    .build()
    .unwrap();

  let instruments: Vec<(&str, &PriceSeries)> =
    universe.iter().map(|(t, s)| (t.as_str(), s)).collect();

  c.bench_function("parallel_analysis_32_instruments", |b| {
    b.iter(|| {
      let _ = black_box(analyze_parallel(black_box(&engine), black_box(instruments.clone()), None));
    })
  });
}

fn bench_score_batch(c: &mut Criterion) {
  let engine = EngineBuilder::new()
    .with_all_defaults()
    .require_trend_template(false)
    .build()
    .unwrap();
  let candidates: Vec<ChartCandidate> = (0..256)
    .map(|i| {
      let series = generate_series(300 + i % 40);
      engine.analyze("BENCH", &series, None).features
    })
    .collect();

  let scorer = PatternScorer::new();

  c.bench_function("score_batch_256", |b| {
    b.iter(|| {
      let _ = black_box(scorer.score_batch(black_box(&candidates)));
    })
  });
}

criterion_group!(
  benches,
  bench_metrics,
  bench_single_pattern,
  bench_all_patterns,
  bench_scaling,
  bench_parallel_analysis,
  bench_score_batch,
);

criterion_main!(benches);
