use std::{net::SocketAddr, sync::Arc};

use tokio::signal;
use tracing::{error, info};

use inventory_ledger as ledger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = ledger::config::load_config()?;
    ledger::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = ledger::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        ledger::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = ledger::events::EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(ledger::events::process_events(event_rx));

    let app_state = ledger::AppState::new(db_arc, cfg.ledger.clone(), Some(event_sender));

    // Periodic drift sweeps
    let mut audit_workers = Vec::new();
    match cfg.ledger.audit_interval() {
        Some(interval) => {
            audit_workers.push(app_state.parts.clone().spawn_audit_worker(interval));
            audit_workers.push(app_state.fuel.clone().spawn_audit_worker(interval));
        }
        None => info!("Periodic audits disabled"),
    }

    let app = ledger::build_router(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("inventory-ledger listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for worker in audit_workers {
        worker.abort();
    }
    info!("inventory-ledger stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
