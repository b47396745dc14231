//! Demonstrates structured logging of lifecycle transitions and dispatch.
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use service_container::prelude::*;
use service_container::QuitEvent;

const DATABASE: InterfaceHash = InterfaceHash::of("Database");

struct Database;
impl Service for Database {
    fn new(_registry: DependencyRegistry, _properties: Properties, _handle: ContainerHandle) -> Self {
        Database
    }
    fn start(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
    fn stop(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
}

struct Users;
impl Service for Users {
    fn new(_registry: DependencyRegistry, _properties: Properties, _handle: ContainerHandle) -> Self {
        Users
    }
    fn start(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
    fn stop(&mut self) -> StartStopOutcome {
        StartStopOutcome::Succeeded
    }
}

fn main() {
    #[cfg(feature = "logging")]
    service_container::logging::init();

    println!("=== service-container logging demo ===\n");

    let container = Container::new();

    // Users declares a required dependency on Database before Database
    // is even registered (logs: "registered", then "started" once resolved).
    let _users = container.register::<Users>(
        Properties::new(),
        vec![],
        vec![Dependency::required(DATABASE, 1)],
    );
    let _db = container.register::<Database>(Properties::new(), vec![DATABASE], vec![]);

    container.post(ServiceId::SYSTEM, |base| QuitEvent { base });
    container.run_until_quit();

    println!("\n=== Demo complete ===");
    println!("Check the log output above for registration, dependency-offer, and start events.");
}
