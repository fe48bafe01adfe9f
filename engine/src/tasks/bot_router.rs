use tokio::task::JoinSet;

use super::SharedState;
use crate::dispatch::bot;

pub fn spawn_bot_router(state: &SharedState, tasks: &mut JoinSet<anyhow::Result<()>>) {
    let store = state.store.clone();

    match state.memory_broker.clone() {
        Some(broker) => {
            tasks.spawn(crate::supervisor::supervised("bot_router", move || {
                bot::run_memory(broker.subscribe(bot::all_conditions()), store.clone())
            }));
        }
        None => {
            let brokers = state.config.kafka_brokers.clone();
            tasks.spawn(crate::supervisor::supervised("bot_router", move || {
                let b = brokers.clone();
                let s = store.clone();
                async move { bot::run_kafka(&b, s).await }
            }));
        }
    }
}
