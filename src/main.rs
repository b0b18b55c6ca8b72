mod config;
mod domain;
mod emission;
mod fhir_bridge;
mod generator;
mod hl7msg;
mod inbound;
mod pam;
mod transport;
mod wire;

use std::process::ExitCode;
use std::sync::Arc;

use config::AppConfig;
use domain::store::Store;
use transport::GatewayState;

/// Process exit codes per spec.md §6: 0 clean shutdown, 2 configuration
/// error, 3 store unreachable at startup, 130 SIGINT.
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_SIGINT: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", config.app.log_level.clone());
    env_logger::init_from_env(env);

    log::info!(
        "starting {} with {} MLLP listener(s) and {} file endpoint(s)",
        config.app.app_name,
        config.pam.mllp_listeners.len(),
        config.pam.file_endpoints.len()
    );

    let store = Arc::new(Store::new());
    let shutdown_timeout = std::time::Duration::from_secs(config.app.graceful_shutdown_timeout_seconds);
    let mllp_listeners = config.pam.mllp_listeners.clone();
    let file_endpoints = config.pam.file_endpoints.clone();
    let state = Arc::new(GatewayState::new(store, config));

    let mut tasks = Vec::new();
    for listener_cfg in mllp_listeners {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = transport::mllp_server::run_listener(state, listener_cfg).await {
                log::error!("MLLP listener task ended: {e}");
            }
        }));
    }
    for endpoint in file_endpoints {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            transport::file_poller::run_poller(state, endpoint).await;
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install SIGINT handler");
    log::info!("received SIGINT, shutting down (grace period {:?})", shutdown_timeout);

    for task in &tasks {
        task.abort();
    }
    tokio::time::sleep(shutdown_timeout.min(std::time::Duration::from_secs(1))).await;

    ExitCode::from(EXIT_SIGINT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{EntityKind, Subscriber, TransportKind};

    const ADMIT: &str = "MSH|^~\\&|SRC|FAC|DST|FAC|20250513081608||ADT^A01|C001|P|2.5\rEVN|A01|20250513081608\rPID|||0001^^^CPAGE&1.2.250.1.211.10.200.2&ISO^PI||DOE^JOHN||19800101|M\rPV1||I|SERV^101^01||||||||||||||||V100\rZBE|1^MOVT^1.2.250.1.213.1.1.1.4^ISO|20250513081608||INSERT|N||^^^^^^UF^^^CARDIO||M\r";

    #[tokio::test]
    async fn end_to_end_admission_reaches_file_subscriber() {
        let store = Arc::new(Store::new());
        let state = GatewayState::new(store.clone(), AppConfig::default());

        let dir = std::env::temp_dir().join(format!("pam-fr-gateway-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let sub_id = store.allocate_subscriber_id().await;
        store
            .add_subscriber(Subscriber {
                id: sub_id,
                transport: TransportKind::File,
                endpoint: dir.to_string_lossy().to_string(),
                strict_mode: false,
                enabled: true,
                kinds: vec![EntityKind::AdminFile, EntityKind::Movement],
            })
            .await;

        let outcome = state.process_inbound(ADMIT, TransportKind::Mllp).await;
        assert!(outcome.ack.contains("AA"));

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert!(count > 0, "expected at least one dropped file for a subscribed entity kind");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn disabled_subscriber_receives_nothing() {
        let store = Arc::new(Store::new());
        let state = GatewayState::new(store.clone(), AppConfig::default());

        let dir = std::env::temp_dir().join(format!("pam-fr-gateway-test-disabled-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let sub_id = store.allocate_subscriber_id().await;
        store
            .add_subscriber(Subscriber {
                id: sub_id,
                transport: TransportKind::File,
                endpoint: dir.to_string_lossy().to_string(),
                strict_mode: false,
                enabled: false,
                kinds: vec![EntityKind::AdminFile, EntityKind::Movement],
            })
            .await;

        state.process_inbound(ADMIT, TransportKind::Mllp).await;

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
