//! TON NFT Royalty Sales Watcher
//!
//! Polls the royalty addresses of NFT collections, recognises completed
//! marketplace sales (fixed price, auction, offer) among their incoming
//! transactions, and posts one notification per sale.
//!
//! Created: 2026-03-03

pub mod address;
pub mod chain;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod notify;
pub mod scanner;
pub mod scheduler;
pub mod stack;
pub mod types;
pub mod watermark;

// Re-export commonly used types
pub use address::TonAddress;
pub use config::{Config, MonitoredSet};
pub use scanner::{SaleScanner, ScanReport, ScanSettings, TxOutcome};
pub use scheduler::Scheduler;
pub use types::{SaleKind, SaleNotification, SaleRecord};
