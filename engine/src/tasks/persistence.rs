use tokio::task::JoinSet;

use super::SharedState;

pub fn spawn_redis_state_persister(state: &SharedState, tasks: &mut JoinSet<anyhow::Result<()>>) {
    let redis_url = state.config.redis_url.clone();
    let registry = state.registry.clone();
    tasks.spawn(crate::supervisor::supervised("state_persister", move || {
        let url = redis_url.clone();
        let reg = registry.clone();
        async move { crate::storage::redis::run_state_persister(&url, reg).await }
    }));
}
