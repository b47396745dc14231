//! End-to-end scenarios exercising the full register → dispatch → lifecycle
//! pipeline through the public API only.

use service_container::prelude::*;
use service_container::{PropertyValue, QuitEvent, StartServiceEvent, StopServiceEvent, TypeTag};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Plain;
impl Service for Plain {
    fn new(_registry: DependencyRegistry, _properties: Properties, _handle: ContainerHandle) -> Self {
        Plain
    }
    fn start(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
    fn stop(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
}

fn drain(container: &Container, max_steps: usize) {
    for _ in 0..max_steps {
        if !container.step() {
            break;
        }
    }
}

/// 1. Single service, no deps: reaches ACTIVE and its start completion
/// callback fires exactly once.
#[test]
fn single_service_no_deps_reaches_active_with_one_completion() {
    let container = Container::new();
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);

    let s = container.register::<Plain>(Properties::new(), vec![], vec![]);
    let _reg = container.register_completion(s, StartServiceEvent::TYPE_TAG, move |_env| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    drain(&container, 8);

    assert_eq!(container.state_of(s), Some(ServiceState::Active));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// 2. A consumer requiring interface I stays RESOLVED until a provider of I
/// becomes ACTIVE; registration order doesn't change the end state.
#[test]
fn required_dependency_arriving_later_unblocks_start_either_order() {
    const LOGGER: InterfaceHash = InterfaceHash::of("Logger");

    // Consumer registered first.
    {
        let container = Container::new();
        let consumer = container.register::<Plain>(
            Properties::new(),
            vec![],
            vec![Dependency::required(LOGGER, 1)],
        );
        assert_eq!(container.state_of(consumer), Some(ServiceState::Installed));

        let provider = container.register::<Plain>(Properties::new(), vec![LOGGER], vec![]);
        drain(&container, 16);

        assert_eq!(container.state_of(provider), Some(ServiceState::Active));
        assert_eq!(container.state_of(consumer), Some(ServiceState::Active));
    }

    // Provider registered first: same end state.
    {
        let container = Container::new();
        let provider = container.register::<Plain>(Properties::new(), vec![LOGGER], vec![]);
        let consumer = container.register::<Plain>(
            Properties::new(),
            vec![],
            vec![Dependency::required(LOGGER, 1)],
        );
        drain(&container, 16);

        assert_eq!(container.state_of(provider), Some(ServiceState::Active));
        assert_eq!(container.state_of(consumer), Some(ServiceState::Active));
    }
}

/// 3. Stopping a provider moves its dependent out of ACTIVE and back to
/// INSTALLED (its required slot is now empty).
#[test]
fn provider_withdrawn_stops_dependent() {
    const LOGGER: InterfaceHash = InterfaceHash::of("Logger");

    let container = Container::new();
    let consumer = container.register::<Plain>(
        Properties::new(),
        vec![],
        vec![Dependency::required(LOGGER, 1)],
    );
    let provider = container.register::<Plain>(Properties::new(), vec![LOGGER], vec![]);
    drain(&container, 16);
    assert_eq!(container.state_of(consumer), Some(ServiceState::Active));
    assert_eq!(container.state_of(provider), Some(ServiceState::Active));

    container.post(ServiceId::SYSTEM, |base| StopServiceEvent { base, target: provider });
    drain(&container, 16);

    // Provider declared no dependencies of its own, so its registry is
    // trivially satisfied and it settles back at RESOLVED, ready to
    // restart, rather than INSTALLED.
    assert_eq!(container.state_of(provider), Some(ServiceState::Resolved));
    assert_eq!(container.state_of(consumer), Some(ServiceState::Installed));
}

/// 4. Higher-priority (numerically smaller) events preempt lower-priority
/// ones queued ahead of them, breaking ties by post order.
#[test]
fn priority_preemption_orders_dispatch() {
    struct Ping {
        base: EventBase,
        tag: u32,
    }
    impl Event for Ping {
        const TYPE_TAG: TypeTag = TypeTag(0xA11CE);
        const NAME: &'static str = "Ping";
        fn base(&self) -> &EventBase {
            &self.base
        }
    }

    let container = Container::new();
    let origin = container.register::<Plain>(Properties::new(), vec![], vec![]);
    drain(&container, 4);

    let order = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&order);
    let _reg = container.register_handler(origin, Ping::TYPE_TAG, move |env| {
        if let Some(ping) = env.as_typed::<Ping>() {
            recorded.lock().unwrap().push(ping.tag);
        }
        HandlerOutcome::Handled
    });

    // Post low-urgency first, then two higher-urgency events; the
    // higher-priority ones should be dispatched first, in post order.
    container.post_prioritized(origin, Priority(100), |base| Ping { base, tag: 3 });
    container.post_prioritized(origin, Priority(0), |base| Ping { base, tag: 1 });
    container.post_prioritized(origin, Priority(0), |base| Ping { base, tag: 2 });

    drain(&container, 8);

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

/// 5. A service that fails its first start with FAILED_AND_RETRY and
/// succeeds on the second attempt is started exactly twice, ends ACTIVE,
/// and fires its completion callback exactly once.
#[test]
fn retry_start_eventually_settles_with_one_completion() {
    struct Flaky {
        attempts: Arc<AtomicU32>,
    }
    impl Service for Flaky {
        fn new(_registry: DependencyRegistry, properties: Properties, _handle: ContainerHandle) -> Self {
            let attempts = match properties.get("attempts") {
                Some(PropertyValue::Any(any)) => any.clone().downcast::<AtomicU32>().unwrap(),
                _ => Arc::new(AtomicU32::new(0)),
            };
            Flaky { attempts }
        }
        fn start(&mut self) -> StartStopOutcome {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                StartStopOutcome::FailedRetry
            } else {
                StartStopOutcome::Succeeded
            }
        }
        fn stop(&mut self) -> StartStopOutcome {
            StartStopOutcome::Succeeded
        }
    }

    let container = Container::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let mut props = Properties::new();
    props.insert("attempts", PropertyValue::Any(attempts.clone()));

    let s = container.register::<Flaky>(props, vec![], vec![]);

    let completions = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&completions);
    let _reg = container.register_completion(s, StartServiceEvent::TYPE_TAG, move |_env| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    drain(&container, 16);

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(container.state_of(s), Some(ServiceState::Active));
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

/// 6. Quit drains everything queued up to and including the QuitEvent, then
/// stops; events posted after the latch is set are dropped.
#[test]
fn quit_drains_queued_events_then_drops_the_rest() {
    struct Counter {
        base: EventBase,
        seq: u32,
    }
    impl Event for Counter {
        const TYPE_TAG: TypeTag = TypeTag(0xC0FFEE);
        const NAME: &'static str = "Counter";
        fn base(&self) -> &EventBase {
            &self.base
        }
    }

    let container = Container::new();
    let origin = container.register::<Plain>(Properties::new(), vec![], vec![]);
    drain(&container, 4);

    let dispatched = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&dispatched);
    let _reg = container.register_handler(origin, Counter::TYPE_TAG, move |_env| {
        seen.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::Handled
    });

    container.post(origin, |base| Counter { base, seq: 1 });
    container.post(origin, |base| Counter { base, seq: 2 });
    container.post(origin, |base| Counter { base, seq: 3 });
    container.post(ServiceId::SYSTEM, |base| QuitEvent { base });

    let post_quit_a = container.post(origin, |base| Counter { base, seq: 4 });
    let post_quit_b = container.post(origin, |base| Counter { base, seq: 5 });

    assert!(post_quit_a.is_dropped());
    assert!(post_quit_b.is_dropped());

    container.run_until_quit();

    assert_eq!(dispatched.load(Ordering::SeqCst), 3);
}
