//! Boot handshake plus the heartbeat and maintenance timers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use ocpp_core::command::{BootNotification, Heartbeat};
use ocpp_core::payloads::{BootNotificationResponse, BootReason, Empty, RegistrationStatus};
use ocpp_core::Failure;

use crate::clock::deadline_after;
use crate::outbound::Outbound;
use crate::queue::PassOutcome;
use crate::station::Station;

pub struct Scheduler {
    station: Arc<Station>,
    outbound: Arc<Outbound>,
}

impl Scheduler {
    pub fn new(station: Arc<Station>, outbound: Arc<Outbound>) -> Self {
        Self { station, outbound }
    }

    /// Send BootNotification. An accepted handshake re-arms the heartbeat
    /// with the advised interval, clamped to the floor.
    pub async fn boot(&self, reason: BootReason) -> Result<BootNotificationResponse, Failure> {
        let response = self
            .outbound
            .call::<BootNotification>(&self.station.boot_request(reason))
            .await?;

        tracing::info!(status = ?response.status, interval = response.interval, "boot handshake finished");
        if response.status == RegistrationStatus::Accepted {
            let advised = Duration::from_secs(response.interval.max(0) as u64);
            self.station.set_heartbeat_interval(advised);
        }
        Ok(response)
    }

    /// One heartbeat, unless heartbeats are disabled or the channel is down.
    /// A missed heartbeat is not queued for later delivery.
    pub async fn heartbeat_tick(&self) {
        if self.station.config().heartbeat_disabled {
            return;
        }
        if let Some(transport) = self.outbound.transport() {
            if !transport.is_connected() {
                tracing::debug!("heartbeat skipped: transport disconnected");
                return;
            }
        }
        if let Err(failure) = self.outbound.call::<Heartbeat>(&Empty {}).await {
            tracing::warn!(code = %failure.code, "heartbeat failed: {}", failure.detail);
        }
    }

    /// One offline queue pass, unless maintenance is disabled.
    pub async fn maintenance_tick(&self) -> Option<PassOutcome> {
        if self.station.config().maintenance_disabled {
            return None;
        }
        let queue = self.outbound.queue().clone();
        Some(queue.run_pass(self.outbound.transport()).await)
    }

    /// Heartbeat loop. The period is re-read every tick so a boot handshake
    /// or a SetVariables can change it.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let clock = scheduler.station.clock().clone();
            let mut deadline = clock.now();
            loop {
                deadline = deadline_after(deadline, scheduler.station.heartbeat_interval());
                clock.sleep_until(deadline).await;
                scheduler.heartbeat_tick().await;
            }
        })
    }

    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let clock = scheduler.station.clock().clone();
            let interval = scheduler.station.config().maintenance_interval;
            let mut deadline = clock.now();
            loop {
                deadline = deadline_after(deadline, interval);
                clock.sleep_until(deadline).await;
                if let Some(PassOutcome::Skipped) = scheduler.maintenance_tick().await {
                    tracing::debug!("maintenance tick skipped");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserverChain;
    use crate::queue::OfflineQueue;
    use crate::testkit::{self, MockTransport};
    use ocpp_core::Action;

    fn scheduler(station: Arc<Station>) -> (Arc<Scheduler>, Arc<Outbound>) {
        let outbound = Arc::new(Outbound::new(
            station.clone(),
            Arc::new(ObserverChain::default()),
            Arc::new(OfflineQueue::new(Duration::from_millis(100), Duration::from_secs(5))),
        ));
        (Arc::new(Scheduler::new(station, outbound.clone())), outbound)
    }

    fn boot_reply(interval: i64) -> serde_json::Value {
        serde_json::json!({
            "currentTime": "2026-01-01T00:00:00Z",
            "interval": interval,
            "status": "Accepted",
        })
    }

    #[tokio::test]
    async fn boot_clamps_advised_interval() {
        let station = Arc::new(testkit::station());
        let (scheduler, outbound) = scheduler(station.clone());
        let (transport, _sent) = MockTransport::new();
        transport.respond_with(|_| boot_reply(2));
        outbound.attach(transport);

        let response = scheduler.boot(BootReason::PowerUp).await.unwrap();
        assert_eq!(response.interval, 2);
        assert_eq!(station.heartbeat_interval(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn rejected_boot_keeps_interval() {
        let station = Arc::new(testkit::station());
        let (scheduler, outbound) = scheduler(station.clone());
        let (transport, _sent) = MockTransport::new();
        transport.respond_with(|_| {
            serde_json::json!({
                "currentTime": "2026-01-01T00:00:00Z",
                "interval": 300,
                "status": "Rejected",
            })
        });
        outbound.attach(transport);

        scheduler.boot(BootReason::PowerUp).await.unwrap();
        assert_eq!(station.heartbeat_interval(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn disabled_timers_are_noops() {
        let station = Arc::new(testkit::station_from(testkit::config().without_timers()));
        let (scheduler, outbound) = scheduler(station);
        let (transport, mut sent) = MockTransport::new();
        outbound.attach(transport);

        scheduler.heartbeat_tick().await;
        assert!(scheduler.maintenance_tick().await.is_none());
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn heartbeat_is_not_queued_while_disconnected() {
        let station = Arc::new(testkit::station());
        let (scheduler, outbound) = scheduler(station);
        let (transport, mut sent) = MockTransport::new();
        transport.set_connected(false);
        outbound.attach(transport.clone());

        scheduler.heartbeat_tick().await;
        assert!(outbound.queue().is_empty());
        assert!(sent.try_recv().is_err());

        transport.set_connected(true);
        scheduler.heartbeat_tick().await;
        assert_eq!(sent.try_recv().unwrap().action, Action::Heartbeat);
    }

    #[tokio::test]
    async fn heartbeat_loop_follows_clock() {
        let (station, clock) = testkit::station_with_clock();
        let station = Arc::new(station);
        let (scheduler, outbound) = scheduler(station);
        let (transport, mut sent) = MockTransport::new();
        outbound.attach(transport);

        let handle = scheduler.spawn_heartbeat();
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(sent.try_recv().is_err());

        clock.advance(Duration::from_secs(30));
        let first = sent.recv().await.unwrap();
        assert_eq!(first.action, Action::Heartbeat);

        handle.abort();
    }
}
