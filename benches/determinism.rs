use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use park_lockstep::config::EngineConfig;
use park_lockstep::game::{run_frame, tick};
use park_lockstep::sandbox;

fn loaded_park(rides: i32) -> park_lockstep::SimulationContext<sandbox::SandboxPark> {
    let mut ctx = sandbox::new_context(EngineConfig::default());
    ctx.load_scenario([0x1234_5678, 0x9ABC_DEF0], 1_000_000);
    ctx.execute(&mut sandbox::set_park_open(true));
    for i in 0..rides {
        ctx.execute(&mut sandbox::create_ride(i % 6));
        ctx.execute(&mut sandbox::set_ride_status(i, true));
    }
    for i in 0..200 {
        ctx.execute(&mut sandbox::place_scenery(i % 20, i / 20, 10));
    }
    ctx
}

fn bench_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for rides in [0i32, 8, 32] {
        group.bench_with_input(BenchmarkId::new("rides", rides), &rides, |b, &rides| {
            b.iter_batched(
                || loaded_park(rides),
                |mut ctx| {
                    for _ in 0..100 {
                        tick(&mut ctx);
                    }
                    black_box(ctx.tick())
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_checksum(c: &mut Criterion) {
    let ctx = loaded_park(32);
    c.bench_function("checksum", |b| b.iter(|| black_box(ctx.checksum())));
}

fn bench_dispatch(c: &mut Criterion) {
    c.bench_function("dispatch/place_scenery", |b| {
        b.iter_batched(
            || loaded_park(0),
            |mut ctx| {
                for i in 0..100 {
                    ctx.execute(&mut sandbox::place_scenery(100 + i, 7, 5));
                }
                run_frame(&mut ctx, 25, 1);
                black_box(ctx.finances.cash)
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(determinism_benches, bench_ticks, bench_checksum, bench_dispatch);
criterion_main!(determinism_benches);
