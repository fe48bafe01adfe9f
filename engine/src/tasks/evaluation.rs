use std::sync::Arc;

use tokio::task::JoinSet;

use super::SharedState;
use crate::scheduler::{Scheduler, SchedulerSettings};

pub fn spawn_scheduler(state: &SharedState, tasks: &mut JoinSet<anyhow::Result<()>>) {
    let scheduler = Arc::new(Scheduler::new(
        state.registry.clone(),
        state.market.clone(),
        state.indicators.clone(),
        state.distributor.clone(),
        SchedulerSettings::from_config(&state.config),
    ));
    tasks.spawn(crate::supervisor::supervised("scheduler", move || scheduler.clone().run()));
}

pub fn spawn_registry_sync(state: &SharedState, tasks: &mut JoinSet<anyhow::Result<()>>) {
    let store = state.store.clone();
    let registry = state.registry.clone();
    let redis_url = state.config.redis_url.clone();
    let interval = state.config.registry_sync_interval;
    let fire_mode = state.config.default_fire_mode;

    tasks.spawn(crate::supervisor::supervised("registry_sync", move || {
        let s = store.clone();
        let reg = registry.clone();
        let url = redis_url.clone();
        async move { super::registry_sync::run(s.as_ref(), reg, &url, interval, fire_mode).await }
    }));
}
