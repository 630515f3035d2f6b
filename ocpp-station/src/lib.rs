//! # ocpp-station
//!
//! Station-side engine: inbound dispatch, per-EVSE transaction state,
//! outbound calls with an offline queue, and the boot/heartbeat timers.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod evse;
pub mod handlers;
pub mod observer;
pub mod outbound;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod station;
pub mod store;
pub mod transaction;

#[cfg(test)]
mod testkit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EvseConfig, StationConfig};
pub use dispatcher::Dispatcher;
pub use evse::{Evse, EvseState};
pub use handlers::{station_registry, FollowUp, HandlerRegistry};
pub use observer::{ErrorSink, ExchangeEvent, ExchangeObserver, LogSink, ObserverChain, TracingObserver};
pub use outbound::Outbound;
pub use queue::{OfflineQueue, PassOutcome};
pub use runtime::StationRuntime;
pub use scheduler::Scheduler;
pub use station::Station;
pub use store::StationStore;
