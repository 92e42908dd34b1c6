//! Core host functionality
//!
//! This module provides:
//! - Tick-rate constants
//! - Host node state and shutdown signalling
//! - The field registry
//! - The tick driver that advances every hosted field

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;

use crate::config::HostConfig;
use crate::field::{Field, FieldContext, FieldError};
use crate::social::SocialSync;
use crate::template::TemplateCatalog;

/// Default cadence of the tick driver
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Identity of the node hosting the fields, plus its shutdown switch
pub struct HostState {
    pub node_name: String,
    pub host: String,
    pub port: u16,
    pub world_id: i32,
    pub channel_id: i32,
    shutdown: watch::Sender<bool>,
}

impl HostState {
    pub fn from_config(config: &HostConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            node_name: config.node_name.clone(),
            host: config.host.clone(),
            port: config.port,
            world_id: config.world_id,
            channel_id: config.channel_id,
            shutdown,
        }
    }

    /// Request host shutdown. Every subscriber sees it.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn should_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// The fields a node hosts, keyed by field id
#[derive(Default)]
pub struct FieldRegistry {
    fields: BTreeMap<u32, Arc<Field>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate `ids` from `catalog` (all catalog fields when `ids` is
    /// empty).
    pub fn build(
        catalog: &TemplateCatalog,
        ids: &[u32],
        context: &FieldContext,
    ) -> Result<Self, FieldError> {
        let ids = if ids.is_empty() { catalog.field_ids() } else { ids.to_vec() };
        let mut registry = Self::new();
        for id in ids {
            let template = catalog
                .field(id)
                .ok_or(FieldError::MissingTemplate { kind: "field", id })?;
            registry.insert(Field::new(template, catalog, context.clone())?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, field: Arc<Field>) -> Option<Arc<Field>> {
        self.fields.insert(field.id(), field)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Field>> {
        self.fields.get(&id).cloned()
    }

    pub fn fields(&self) -> Vec<Arc<Field>> {
        self.fields.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Shorthand for a `FieldContext` matching a host's config.
pub fn field_context(config: &HostConfig, social: Arc<dyn SocialSync>) -> FieldContext {
    FieldContext {
        gen_interval: config.gen_interval(),
        rng_seed: config.rng_seed,
        ..FieldContext::new(config.channel_id, social)
    }
}

/// Call `try_tick` on every field each `interval` until `shutdown` flips to
/// true (or its sender is dropped). Returns the number of rounds run.
pub async fn run_tick_driver(
    fields: Vec<Arc<Field>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut rounds = 0u64;

    tracing::info!("[core] [tick] driver started fields={} interval={:?}", fields.len(), interval);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let reports = join_all(fields.iter().map(|f| f.try_tick())).await;
                let spawned: usize = reports.iter().map(|r| r.mobs_spawned + r.others_spawned).sum();
                if spawned > 0 {
                    tracing::debug!("[core] [tick] round={} spawned={}", rounds, spawned);
                }
                rounds += 1;
            }
        }
    }
    tracing::info!("[core] [tick] driver stopped after {} rounds", rounds);
    rounds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HostConfig {
        HostConfig::from_str("node_name: test-node\nchannel_id: 2\n").unwrap()
    }

    #[test]
    fn test_host_state_from_config() {
        let state = HostState::from_config(&config());
        assert_eq!(state.node_name, "test-node");
        assert_eq!(state.channel_id, 2);
        assert_eq!(state.port, 8585);
        assert!(!state.should_shutdown());
    }

    #[test]
    fn test_host_state_shutdown() {
        let state = HostState::from_config(&config());
        let rx = state.subscribe_shutdown();
        state.request_shutdown();
        assert!(state.should_shutdown());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_TICK_INTERVAL, Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_driver_stops_on_shutdown() {
        let state = HostState::from_config(&config());
        let driver = tokio::spawn(run_tick_driver(
            Vec::new(),
            Duration::from_millis(5),
            state.subscribe_shutdown(),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        state.request_shutdown();
        let rounds = driver.await.unwrap();
        assert!(rounds >= 1);
    }

    #[tokio::test]
    async fn test_driver_exits_when_already_shut_down() {
        let (tx, rx) = watch::channel(true);
        let rounds = run_tick_driver(Vec::new(), Duration::from_millis(5), rx).await;
        assert_eq!(rounds, 0);
        drop(tx);
    }
}
