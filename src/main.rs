use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use roomsched::compactor;
use roomsched::config::Config;
use roomsched::notify::{LogSink, MailQueue, NotificationSink, SmtpMailer};
use roomsched::scheduler::Scheduler;
use roomsched::seed::Seed;
use roomsched::server;
use roomsched::store::WalStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?.with_args(std::env::args().skip(1));
    roomsched::observability::init(config.metrics_port)?;

    if let Some(dir) = config.wal_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let store = Arc::new(WalStore::open(&config.wal_path)?);
    if let Some(path) = &config.seed {
        Seed::load(path)?.apply(store.as_ref()).await?;
    }
    tokio::spawn(compactor::run_compactor(store.clone(), config.compact_threshold));

    let notifier: Arc<dyn NotificationSink> = match &config.smtp_addr {
        Some(relay) => Arc::new(MailQueue::spawn(
            Arc::new(SmtpMailer::new(relay.clone(), config.mail_from.clone())),
            config.notify_queue,
        )),
        None => Arc::new(LogSink),
    };
    let scheduler = Arc::new(
        Scheduler::new(store, notifier).with_gate_timeout(config.gate_timeout),
    );

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roomsched listening on {addr}");
    info!("  wal: {}", config.wal_path.display());
    info!("  max_connections: {max_connections}");
    info!("  mail: {}", config.smtp_addr.as_deref().unwrap_or("log only"));
    info!(
        "  gate timeout: {}",
        config.gate_timeout.map_or("none".to_string(), |t| format!("{t:?}"))
    );
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight sessions
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(roomsched::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(roomsched::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(roomsched::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let scheduler = scheduler.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until the session closes
                    if let Err(e) = server::process_connection(socket, scheduler).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(roomsched::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight sessions to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("roomsched stopped");
    Ok(())
}
