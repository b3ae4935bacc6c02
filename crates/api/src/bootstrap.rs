use std::time::Duration;

use legalese_history::HistoryStore;

use crate::config::ServiceConfig;
use crate::orchestrator::Capability;
use crate::simplifier;

/// Process-wide collaborators built once at startup. Neither failure here stops the
/// process: an unready capability is reported through `/api/health`, and an unreachable
/// store only degrades history.
#[derive(Debug, Clone)]
pub struct Services {
    pub capability: Capability,
    pub history: HistoryStore,
}

impl Services {
    pub fn simplifier_ready(&self) -> bool {
        self.capability.is_ready()
    }
}

pub async fn bootstrap(config: &ServiceConfig) -> Services {
    let capability = match simplifier::from_config(config) {
        Ok(simplifier) => {
            tracing::info!(
                provider = ?config.simplifier_provider,
                model = %config.simplifier_model,
                "completion capability initialised"
            );
            Capability::Ready(simplifier)
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                "could not initialise completion capability; serving in degraded mode"
            );
            Capability::Unavailable {
                reason: err.to_string(),
            }
        }
    };

    let history = HistoryStore::new(
        config.history_db_url.clone(),
        Duration::from_millis(config.history_connect_timeout_ms),
    );
    if !history.is_configured() {
        tracing::warn!("HISTORY_DB_URL not set; history persistence disabled");
    } else {
        match history.probe().await {
            Ok(()) => tracing::info!("history store reachable"),
            Err(err) => tracing::warn!(
                error = %err,
                "history store probe failed; history will be retried per request"
            ),
        }
    }

    Services {
        capability,
        history,
    }
}
