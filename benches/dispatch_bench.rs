//! Benchmarks for registration, dispatch, and event posting.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use service_container::prelude::*;
use service_container::{QuitEvent, StartServiceEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

const LOGGER: InterfaceHash = InterfaceHash::of("Logger");

struct NoDeps;
impl Service for NoDeps {
    fn new(_registry: DependencyRegistry, _properties: Properties, _handle: ContainerHandle) -> Self {
        NoDeps
    }
    fn start(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
    fn stop(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
}

struct Provider;
impl Service for Provider {
    fn new(_registry: DependencyRegistry, _properties: Properties, _handle: ContainerHandle) -> Self {
        Provider
    }
    fn start(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
    fn stop(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
}

struct Consumer;
impl Service for Consumer {
    fn new(_registry: DependencyRegistry, _properties: Properties, _handle: ContainerHandle) -> Self {
        Consumer
    }
    fn start(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
    fn stop(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("single_no_deps", |b| {
        b.iter(|| {
            let container = Container::new();
            let id = container.register::<NoDeps>(Properties::new(), vec![], vec![]);
            black_box(id)
        })
    });

    group.bench_function("provider_then_consumer", |b| {
        b.iter(|| {
            let container = Container::new();
            container.register::<Provider>(Properties::new(), vec![LOGGER], vec![]);
            let id = container.register::<Consumer>(
                Properties::new(),
                vec![],
                vec![Dependency::required(LOGGER, 1)],
            );
            black_box(id)
        })
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_service_reaches_active", |b| {
        b.iter(|| {
            let container = Container::new();
            let id = container.register::<NoDeps>(Properties::new(), vec![], vec![]);
            container.post(ServiceId::SYSTEM, |base| QuitEvent { base });
            container.run_until_quit();
            black_box(id)
        })
    });

    group.bench_function("dependency_satisfied_after_provider_registers", |b| {
        b.iter(|| {
            let container = Container::new();
            let consumer = container.register::<Consumer>(
                Properties::new(),
                vec![],
                vec![Dependency::required(LOGGER, 1)],
            );
            container.register::<Provider>(Properties::new(), vec![LOGGER], vec![]);
            container.post(ServiceId::SYSTEM, |base| QuitEvent { base });
            container.run_until_quit();
            black_box(consumer)
        })
    });

    group.finish();
}

fn bench_post(c: &mut Criterion) {
    let mut group = c.benchmark_group("post");
    group.throughput(Throughput::Elements(1));

    let container = Container::new();
    let origin = container.register::<NoDeps>(Properties::new(), vec![], vec![]);
    container.post(ServiceId::SYSTEM, |base| QuitEvent { base });
    container.run_until_quit();

    group.bench_function("post_start_event", |b| {
        b.iter(|| {
            let id = container.post(origin, |base| StartServiceEvent { base, target: origin });
            black_box(id)
        })
    });

    group.bench_function("post_prioritized", |b| {
        b.iter(|| {
            let id = container.post_prioritized(origin, Priority::HIGHEST, |base| StartServiceEvent {
                base,
                target: origin,
            });
            black_box(id)
        })
    });

    group.finish();
}

fn bench_completion_callbacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("callbacks");

    group.bench_function("register_and_drop", |b| {
        let container = Container::new();
        let origin = container.register::<NoDeps>(Properties::new(), vec![], vec![]);
        container.post(ServiceId::SYSTEM, |base| QuitEvent { base });
        container.run_until_quit();
        let count = Arc::new(AtomicU32::new(0));

        b.iter(|| {
            let count = Arc::clone(&count);
            let registration = container.register_completion(
                origin,
                StartServiceEvent::TYPE_TAG,
                move |_envelope| {
                    count.fetch_add(1, Ordering::Relaxed);
                },
            );
            black_box(registration)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_dispatch,
    bench_post,
    bench_completion_callbacks,
);
criterion_main!(benches);
