//! Registry and routing benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tandem_core::{dispatch, ConnectionHandle, ConnectionManager, Registry};
use tandem_protocol::Frame;

/// Registry with `sessions` sessions, each with one controller and
/// `observers` observers.
fn populated(sessions: u64, observers: u64) -> Registry {
    let mut registry = Registry::new();
    let mut next = 1;
    for s in 0..sessions {
        let session = format!("session-{s}");
        registry.set_controller(&session, ConnectionHandle::new(next));
        next += 1;
        for _ in 0..observers {
            registry.add_observer(&session, ConnectionHandle::new(next));
            next += 1;
        }
    }
    registry
}

fn bench_purge(c: &mut Criterion) {
    let mut group = c.benchmark_group("purge");

    for sessions in [10, 100, 1_000] {
        group.bench_function(format!("{sessions}_sessions"), |b| {
            b.iter_batched(
                || populated(sessions, 4),
                |mut registry| registry.purge(black_box(ConnectionHandle::new(1))),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for observers in [1_usize, 10, 100] {
        group.bench_function(format!("{observers}_observers"), |b| {
            let connections = ConnectionManager::new();
            let mut registry = Registry::new();
            let (controller, _controller_rx) = connections.open(1);
            registry.set_controller("A", controller);

            let mut receivers = Vec::new();
            for _ in 0..observers {
                let (handle, rx) = connections.open(1024);
                registry.add_observer("A", handle);
                receivers.push(rx);
            }

            b.iter(|| {
                let outcome = dispatch(
                    &mut registry,
                    &connections,
                    controller,
                    Frame::control_sync("A", 128, "kindA"),
                );
                for rx in &mut receivers {
                    let _ = rx.try_recv();
                }
                outcome
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_purge, bench_fan_out);
criterion_main!(benches);
