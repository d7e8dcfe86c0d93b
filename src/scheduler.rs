//! Poll Scheduler
//!
//! Runs one scan cycle over every monitored royalty address, sleeps
//! `poll_interval`, repeats until shutdown. Each cycle runs in its own task
//! so a panic inside a scan is logged and the loop carries on after
//! `panic_backoff`. On shutdown an in-flight cycle is aborted; watermarks
//! are only committed at the end of a full address scan, so the next run
//! re-reads anything the aborted cycle did not finish.
//!
//! Created: 2026-03-06

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use crate::scanner::{SaleScanner, ScanReport};

const DEFAULT_PANIC_BACKOFF: Duration = Duration::from_secs(5);

pub struct Scheduler {
    scanner: Arc<SaleScanner>,
    poll_interval: Duration,
    concurrent: bool,
    panic_backoff: Duration,
}

impl Scheduler {
    pub fn new(scanner: Arc<SaleScanner>, poll_interval: Duration, concurrent: bool) -> Self {
        Self {
            scanner,
            poll_interval,
            concurrent,
            panic_backoff: DEFAULT_PANIC_BACKOFF,
        }
    }

    pub fn with_panic_backoff(mut self, backoff: Duration) -> Self {
        self.panic_backoff = backoff;
        self
    }

    fn spawn_cycle(&self) -> JoinHandle<Vec<ScanReport>> {
        let scanner = Arc::clone(&self.scanner);
        let concurrent = self.concurrent;
        tokio::spawn(async move {
            let addresses = scanner.monitored().royalty_addresses.clone();
            if concurrent {
                join_all(addresses.iter().map(|a| scanner.scan_address(a))).await
            } else {
                let mut reports = Vec::with_capacity(addresses.len());
                for address in &addresses {
                    reports.push(scanner.scan_address(address).await);
                }
                reports
            }
        })
    }

    /// Single cycle. `Err` only if the cycle task panicked.
    pub async fn run_once(&self) -> Result<Vec<ScanReport>, JoinError> {
        let reports = self.spawn_cycle().await?;
        log_cycle(&reports);
        Ok(reports)
    }

    /// Loop until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler started: {} address(es), every {}s ({})",
            self.scanner.monitored().royalty_addresses.len(),
            self.poll_interval.as_secs(),
            if self.concurrent { "concurrent" } else { "sequential" }
        );

        let mut cycles: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut cycle = self.spawn_cycle();
            let wait = tokio::select! {
                result = &mut cycle => {
                    cycles += 1;
                    match result {
                        Ok(reports) => {
                            log_cycle(&reports);
                            self.poll_interval
                        }
                        Err(e) => {
                            error!("Scan cycle {} failed: {}", cycles, e);
                            self.panic_backoff
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested, abandoning in-flight cycle");
                    cycle.abort();
                    break;
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Scheduler stopped after {} cycle(s)", cycles);
    }
}

fn log_cycle(reports: &[ScanReport]) {
    let notified: usize = reports.iter().map(ScanReport::notified).sum();
    let processed: usize = reports.iter().map(ScanReport::processed).sum();
    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    info!(
        "Cycle complete: {} address(es) | {} new tx | {} notified | {} listing failure(s)",
        reports.len(),
        processed,
        notified,
        failed
    );
}
