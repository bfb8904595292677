//! echowatch - Echo Server Health Monitor
//!
//! Probes a TCP echo server and an HTTP echo server on a fixed cadence,
//! tracks their health with threshold counters and mails an opted-in
//! address when a service goes down or recovers.

mod config;
mod db;
mod health;
mod history;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::Config;
use db::Store;
use health::{Health, ServiceId};
use history::HistoryBook;
use notify::{LogNotifier, MailgunNotifier, Notifier};
use probe::{Probe, RequestProbe, StreamProbe};
use scheduler::{Poller, Scheduler};
use web::{AppState, LiveStatus, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("echowatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = Config::load()?;
    tracing::info!("Starting echowatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    for service in ServiceId::ALL {
        if store.seed_status(service, Health::Healthy)? {
            tracing::info!("Seeded initial status for {}", service);
        }
    }
    tracing::info!("Database initialized successfully");

    let notifier: Arc<dyn Notifier> = if cfg.mailgun.is_configured() {
        let m = &cfg.mailgun;
        Arc::new(MailgunNotifier::new(&m.domain, &m.api_key, &m.sender)?)
    } else {
        tracing::warn!("Mailgun not configured, notifications will only be logged");
        Arc::new(LogNotifier)
    };

    let history = Arc::new(HistoryBook::new(cfg.history_capacity));
    let live = Arc::new(LiveStatus::default());

    // One poller per echo server
    let settings = &cfg.probe;
    let probes = [
        Probe::Stream(StreamProbe::new(
            &cfg.tcp.host,
            cfg.tcp.port,
            &settings.auth_token,
            &settings.message,
            settings.timeout(),
        )),
        Probe::Request(RequestProbe::new(
            &cfg.http.url,
            &settings.auth_token,
            &settings.message,
            settings.timeout(),
        )?),
    ];

    let pollers = probes
        .into_iter()
        .map(|probe| {
            let live = live.clone();
            Poller::new(
                probe,
                settings.thresholds(),
                settings.interval(),
                store.clone(),
                store.clone(),
                notifier.clone(),
                history.clone(),
            )
            .with_cycle_hook(Arc::new(move |service, up| live.set(service, up)))
        })
        .collect();

    let scheduler = Scheduler::new(pollers);
    let handles = scheduler.start();

    // Start web server
    let server = Server::new(cfg.http_port, AppState { store, history, live });
    tokio::select! {
        res = server.start() => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown requested"),
    }

    scheduler.stop();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
