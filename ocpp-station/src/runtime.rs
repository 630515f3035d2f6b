//! Wires the station, its pipelines and timers together.

use std::sync::Arc;

use tokio::task::JoinHandle;

use ocpp_core::payloads::{BootNotificationResponse, BootReason};
use ocpp_core::{Failure, InboundHandler, SignatureCoordinator, Transport};

use crate::clock::{Clock, SystemClock};
use crate::config::StationConfig;
use crate::dispatcher::Dispatcher;
use crate::handlers::station_registry;
use crate::observer::{ExchangeObserver, ObserverChain, TracingObserver};
use crate::outbound::Outbound;
use crate::queue::OfflineQueue;
use crate::scheduler::Scheduler;
use crate::station::Station;

/// A fully assembled station engine.
pub struct StationRuntime {
    station: Arc<Station>,
    observers: Arc<ObserverChain>,
    outbound: Arc<Outbound>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    timers: Vec<JoinHandle<()>>,
}

impl StationRuntime {
    /// Assemble on the system clock.
    pub fn new(config: StationConfig, signatures: SignatureCoordinator) -> Self {
        Self::with_clock(config, signatures, Arc::new(SystemClock))
    }

    pub fn with_clock(config: StationConfig, signatures: SignatureCoordinator, clock: Arc<dyn Clock>) -> Self {
        let queue = Arc::new(OfflineQueue::new(config.maintenance_lock_timeout, config.call_timeout));
        let station = Arc::new(Station::new(config, signatures, clock));

        let observers = Arc::new(ObserverChain::default());
        observers.register(Arc::new(TracingObserver));

        let outbound = Arc::new(Outbound::new(station.clone(), observers.clone(), queue));
        let dispatcher = Arc::new(Dispatcher::new(
            station.clone(),
            station_registry(),
            observers.clone(),
            outbound.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(station.clone(), outbound.clone()));

        Self {
            station,
            observers,
            outbound,
            dispatcher,
            scheduler,
            timers: Vec::new(),
        }
    }

    pub fn station(&self) -> &Arc<Station> {
        &self.station
    }

    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn add_observer(&self, observer: Arc<dyn ExchangeObserver>) {
        self.observers.register(observer);
    }

    /// Callback for the transport to invoke per inbound request.
    pub fn inbound_handler(&self) -> Arc<dyn InboundHandler> {
        self.dispatcher.clone()
    }

    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        self.outbound.attach(transport);
    }

    pub async fn boot(&self, reason: BootReason) -> Result<BootNotificationResponse, Failure> {
        self.scheduler.boot(reason).await
    }

    /// Start the heartbeat and maintenance loops. Calling again is a no-op.
    pub fn start_timers(&mut self) {
        if !self.timers.is_empty() {
            return;
        }
        self.timers.push(self.scheduler.spawn_heartbeat());
        self.timers.push(self.scheduler.spawn_maintenance());
        tracing::info!(station = %self.station.id(), "timers started");
    }

    pub fn stop_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

impl Drop for StationRuntime {
    fn drop(&mut self) {
        self.stop_timers();
    }
}
