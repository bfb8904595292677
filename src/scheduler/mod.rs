//! Scheduler module: one independent poll loop per monitored service.

mod poller;

pub use poller::*;

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Runs every poller on its own task.
pub struct Scheduler {
    pollers: Vec<Arc<Poller>>,
    stop_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(pollers: Vec<Poller>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            pollers: pollers.into_iter().map(Arc::new).collect(),
            stop_tx,
        }
    }

    /// Spawn one task per poller. A stalled probe only ever holds up its
    /// own task.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting scheduler with {} pollers", self.pollers.len());

        self.pollers
            .iter()
            .map(|poller| {
                let poller = poller.clone();
                let stop_rx = self.stop_tx.subscribe();
                tracing::info!("Scheduler: Adding poller for {}", poller.service());

                tokio::spawn(async move {
                    poller.run(stop_rx).await;
                    tracing::info!("Scheduler: Stopped poller for {}", poller.service());
                })
            })
            .collect()
    }

    /// Stop every running poller after its current cycle.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::health::{Health, ServiceId, Thresholds};
    use crate::history::HistoryBook;
    use crate::notify::LogNotifier;
    use crate::probe::{Probe, RequestProbe, StreamProbe};
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn spawn_tcp_echo() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (reader, mut writer) = socket.into_split();
                    let mut reader = BufReader::new(reader);
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    writer.write_all(b"auth ok\n").await.unwrap();
                    line.clear();
                    reader.read_line(&mut line).await.unwrap();
                    writer.write_all(format!("CLOUDWALK {}", line).as_bytes()).await.unwrap();
                });
            }
        });
        port
    }

    /// HTTP "server" that accepts connections and never answers.
    async fn spawn_black_hole() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_poller_does_not_block_the_other() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        for service in ServiceId::ALL {
            store.seed_status(service, Health::Healthy).unwrap();
        }
        let history = Arc::new(HistoryBook::new(100));
        let thresholds = Thresholds { healthy: 3, unhealthy: 2 };
        let interval = Duration::from_millis(50);

        let port = spawn_tcp_echo().await;
        let tcp = Probe::Stream(StreamProbe::new("127.0.0.1", port, "t", "hello", Duration::from_secs(1)));
        let black_hole = spawn_black_hole().await;
        let http = Probe::Request(RequestProbe::new(&black_hole, "t", "hello", Duration::from_secs(30)).unwrap());

        let pollers = vec![
            Poller::new(tcp, thresholds, interval, store.clone(), store.clone(), Arc::new(LogNotifier), history.clone()),
            Poller::new(http, thresholds, interval, store.clone(), store.clone(), Arc::new(LogNotifier), history.clone()),
        ];
        let scheduler = Scheduler::new(pollers);
        let handles = scheduler.start();

        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert!(history.history(ServiceId::Tcp).len().await >= 2);
        assert_eq!(history.history(ServiceId::Http).len().await, 0);
        assert!(history
            .history(ServiceId::Tcp)
            .snapshot()
            .await
            .iter()
            .all(|r| r.cloud_state));

        scheduler.stop();
        for handle in handles {
            handle.abort();
        }
    }
}
