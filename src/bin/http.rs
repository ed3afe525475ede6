#[cfg(feature = "http_api")]
const SERVICE_USER: &str = "http-server";

#[cfg(feature = "http_api")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use timetable_sync::{
        AppConfig, ChangeBroker, Credentials, Role, Session, SessionManager, SyncDependencies,
        TracingActivitySink, http_api,
        persistence::{InMemoryEntityStore, InMemorySlotStore, SlotStore},
        session::StaticAuthenticator,
        snapshot::StoreSnapshotLoader,
        telemetry,
    };

    telemetry::init_tracing();
    let config = AppConfig::from_env()?;
    let addr: SocketAddr = config.http_addr.parse()?;

    let broker = ChangeBroker::new();
    let slots: Arc<dyn SlotStore> = match &config.db_path {
        #[cfg(feature = "sqlite")]
        Some(path) => Arc::new(timetable_sync::persistence::SqliteSlotStore::new(
            path,
            broker.clone(),
        )?),
        #[cfg(not(feature = "sqlite"))]
        Some(path) => {
            tracing::warn!(path = %path.display(), "built without sqlite, using in-memory store");
            Arc::new(InMemorySlotStore::new(broker.clone()))
        }
        None => Arc::new(InMemorySlotStore::new(broker.clone())),
    };
    let entities = Arc::new(InMemoryEntityStore::new(broker.clone()));
    let loader = Arc::new(StoreSnapshotLoader::new(slots.clone(), entities));

    // The server runs its sync under a service account, signed in once at startup.
    let password = uuid::Uuid::new_v4().to_string();
    let service_account = Session::new(
        SERVICE_USER,
        config.school_id.clone(),
        config.academic_year_id.clone(),
        Role::SuperAdmin,
    );
    let authenticator =
        StaticAuthenticator::new().with_account(SERVICE_USER, password.clone(), service_account);
    let manager = SessionManager::new(
        Arc::new(authenticator),
        SyncDependencies {
            slots,
            loader,
            feed: Arc::new(broker),
            activity: Arc::new(TracingActivitySink),
            config: config.sync.clone(),
        },
    );
    manager
        .sign_in(&Credentials::new(SERVICE_USER, password))
        .await?;
    let orchestrator = manager
        .orchestrator()
        .ok_or("service account has no active session")?;

    println!("timetable-sync HTTP API listening on http://{addr}");
    let state = http_api::AppState::with_orchestrator(orchestrator);
    let served = http_api::serve(addr, state).await;
    manager.sign_out().await;
    served?;
    Ok(())
}

#[cfg(not(feature = "http_api"))]
fn main() {
    eprintln!("Rebuild with the `http_api` feature to enable the HTTP server.");
}
