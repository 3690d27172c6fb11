//! Proxy supervisor: wires the passive/active endpoints and their retry
//! queues together according to `ProxyDirection`, and owns shutdown.

use crate::endpoint::{self, Side, SideChannels};
use crate::settings::{ProxyDirection, Settings};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub struct ProxySupervisor {
    analyzer: Arc<SideChannels>,
    lis: Arc<SideChannels>,
}

impl ProxySupervisor {
    pub fn new() -> Self {
        Self {
            analyzer: Arc::new(SideChannels::new()),
            lis: Arc::new(SideChannels::new()),
        }
    }

    /// Start the passive and active endpoints for `settings.proxy_direction`
    /// and run until `shutdown` is flipped to `true`.
    pub async fn run(self, settings: Arc<Settings>, shutdown: watch::Receiver<bool>) {
        let (passive_side, active_side) = match settings.proxy_direction {
            ProxyDirection::ListenerToClient => (Side::Analyzer, Side::Lis),
            ProxyDirection::ClientToListener => (Side::Lis, Side::Analyzer),
        };
        info!(?passive_side, ?active_side, "starting proxy supervisor");

        let (passive_own, passive_opposite) = self.channels_for(passive_side);
        let (active_own, active_opposite) = self.channels_for(active_side);

        let passive_task = tokio::spawn(endpoint::run_passive(
            settings.port,
            passive_side,
            settings.proxy_direction,
            settings.clone(),
            passive_own,
            passive_opposite,
            shutdown.clone(),
        ));

        let active_task = tokio::spawn(endpoint::run_active(
            settings.client_host.clone(),
            settings.client_port,
            active_side,
            settings.proxy_direction,
            settings.clone(),
            active_own,
            active_opposite,
            shutdown.clone(),
        ));

        let _ = tokio::join!(passive_task, active_task);
        info!("proxy supervisor stopped");
    }

    fn channels_for(&self, side: Side) -> (Arc<SideChannels>, Arc<SideChannels>) {
        match side {
            Side::Analyzer => (self.analyzer.clone(), self.lis.clone()),
            Side::Lis => (self.lis.clone(), self.analyzer.clone()),
        }
    }
}

impl Default for ProxySupervisor {
    fn default() -> Self {
        Self::new()
    }
}
