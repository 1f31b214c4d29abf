//! Registry refresh from discovery passes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::client::{DiscoveryClient, DiscoveryReport};
use crate::registry::{CapabilityRegistry, SharedRegistry};

/// Run one discovery pass and publish its outcome as the new snapshot
pub async fn refresh(
    client: &DiscoveryClient,
    endpoints: &[String],
    registry: &SharedRegistry,
) -> (DiscoveryReport, Arc<CapabilityRegistry>) {
    let report = client.discover_all(endpoints).await;
    let snapshot = registry.replace_all(report.discovered.iter().cloned()).await;
    (report, snapshot)
}

/// Periodically re-run discovery until `shutdown` flips to `true`
///
/// The first tick is skipped: the initial pass is expected to have run at startup
pub fn spawn_refresh_loop(
    client: DiscoveryClient,
    endpoints: Vec<String>,
    registry: SharedRegistry,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tracing::info!(interval_secs = every.as_secs(), "registry refresh enabled");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (report, snapshot) = refresh(&client, &endpoints, &registry).await;
                    tracing::debug!(
                        version = snapshot.version(),
                        failures = report.failures.len(),
                        "periodic registry refresh"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("registry refresh loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::{Json, Router, extract::State, routing::get};
    use serde_json::{Value, json};

    use super::*;
    use crate::registry::{CapabilityDescriptor, Skill};

    fn agent_document(base_url: &str, skill_id: &str) -> Value {
        json!({
            "serviceId": "storage",
            "displayName": "storage agent",
            "endpointUrl": format!("{base_url}/invoke"),
            "skills": [{ "id": skill_id, "description": "disk housekeeping" }],
        })
    }

    /// Serve a descriptor that the test can swap while the loop runs
    async fn spawn_mutable_agent(skill_id: &str) -> (String, Arc<Mutex<Value>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let document = Arc::new(Mutex::new(agent_document(&base_url, skill_id)));

        let router = Router::new()
            .route(
                "/.well-known/agent.json",
                get(|State(doc): State<Arc<Mutex<Value>>>| async move {
                    Json(doc.lock().unwrap().clone())
                }),
            )
            .with_state(Arc::clone(&document));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        (base_url, document)
    }

    fn descriptor(id: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            service_id: id.to_string(),
            display_name: format!("{id} agent"),
            description: None,
            version: None,
            endpoint_url: "http://127.0.0.1:1/invoke".parse().unwrap(),
            skills: vec![Skill {
                id: format!("{id}_skill"),
                name: None,
                description: format!("does {id} things"),
                tags: vec![],
                example_inputs: vec![],
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_refreshes_each_interval_until_shutdown() {
        let registry = SharedRegistry::new();
        let registered = registry.register(descriptor("retired")).await.version();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let every = Duration::from_secs(30);
        let handle = spawn_refresh_loop(
            DiscoveryClient::with_client(reqwest::Client::new()),
            Vec::new(),
            registry.clone(),
            every,
            shutdown_rx,
        );

        // No pass before the first interval elapses
        tokio::time::sleep(every / 2).await;
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.version(), registered);
        assert!(snapshot.contains("retired"));

        // The pass finds nothing, so the stale service is evicted
        tokio::time::sleep(every).await;
        let snapshot = registry.snapshot().await;
        assert!(snapshot.version() > registered);
        assert!(snapshot.is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_picks_up_changed_descriptor() {
        let (base_url, document) = spawn_mutable_agent("find_unattached_disks").await;
        let client = DiscoveryClient::with_client(reqwest::Client::new());
        let endpoints = vec![base_url.clone()];
        let registry = SharedRegistry::new();

        let (_, initial) = refresh(&client, &endpoints, &registry).await;
        assert_eq!(initial.get("storage").unwrap().skills[0].id, "find_unattached_disks");

        *document.lock().unwrap() = agent_document(&base_url, "snapshot_cleanup");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let every = Duration::from_secs(60);
        let handle = spawn_refresh_loop(client, endpoints, registry.clone(), every, shutdown_rx);

        // Network round trips race the paused clock, so poll
        let mut refreshed = None;
        for _ in 0..50 {
            tokio::time::sleep(every).await;
            let snapshot = registry.snapshot().await;
            if snapshot.version() > initial.version() {
                refreshed = Some(snapshot);
                break;
            }
        }
        let refreshed = refreshed.expect("registry was never refreshed");
        assert_eq!(refreshed.get("storage").unwrap().skills[0].id, "snapshot_cleanup");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_when_sender_dropped() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_refresh_loop(
            DiscoveryClient::with_client(reqwest::Client::new()),
            Vec::new(),
            SharedRegistry::new(),
            Duration::from_secs(30),
            shutdown_rx,
        );

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }
}
