//! Sale Scanner
//!
//! One pass over one royalty address:
//! 1. read watermark W
//! 2. list transactions page by page back to W, keep those newer than W,
//!    oldest first
//! 3. per transaction: probe the source contract's sale methods, decode,
//!    parse, check completion, resolve metadata, check collection,
//!    fetch floor, notify
//! 4. commit max(W, newest seen) if anything was newer than W
//!
//! Per-transaction failures are recorded as a `TxOutcome` and never abort
//! the pass. A failed listing aborts the pass with the watermark untouched.
//! Every network call is bounded by `call_timeout`; listing, probes and the
//! metadata lookup retry transient failures under `probe_retry`.
//!
//! Created: 2026-03-06

use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::address::TonAddress;
use crate::chain::{retry, ChainClient, MethodOutcome, RetryPolicy};
use crate::config::MonitoredSet;
use crate::enrichment::EnrichmentGateway;
use crate::error::{ChainError, EnrichmentError};
use crate::notify::Notifier;
use crate::stack::{classify_wire_kind, parse_sale_with_kind, StackCodec, WireValue};
use crate::types::{SaleNotification, SaleRecord, TransactionSummary};
use crate::watermark::WatermarkStore;

pub const DEFAULT_PROBE_METHODS: [&str; 2] = ["get_sale_data", "get_offer_data"];

/// Listing pages fetched per scan before giving up on reaching the watermark
const MAX_LISTING_PAGES: usize = 40;

/// How long (chain time) a notified sale contract stays in the dedup map
const DEDUP_RETENTION_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Transactions requested per listing page
    pub tx_limit: u32,
    /// Retry policy for listing pages, each probe method and metadata lookups
    pub probe_retry: RetryPolicy,
    /// Upper bound for any single network call
    pub call_timeout: Duration,
    /// Sale-probe get-methods, in priority order
    pub probe_methods: Vec<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            tx_limit: 25,
            probe_retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(20),
            probe_methods: DEFAULT_PROBE_METHODS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// What happened to one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxOutcome {
    /// External inbound message, nothing to probe
    NoCounterparty,
    /// Every probe method was not applicable
    NotASale,
    /// Transient failures exhausted the probe retries
    ProbeExhausted,
    /// Stack fetched but could not be parsed
    Invalid,
    /// Sale not finished (open auction, active listing)
    Incomplete,
    Canceled,
    /// Sale contract already notified this run
    Duplicate,
    MetadataUnavailable,
    NotInCollection,
    Notified,
    NotifyFailed,
}

impl fmt::Display for TxOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one pass over one address.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub address: TonAddress,
    pub watermark_before: u64,
    pub fetched: usize,
    /// (transaction id, outcome) in processing order
    pub outcomes: Vec<(String, TxOutcome)>,
    /// Value committed to the store, if a commit happened
    pub committed: Option<u64>,
    /// Listing failure that aborted the pass
    pub error: Option<String>,
}

impl ScanReport {
    fn new(address: TonAddress, watermark_before: u64) -> Self {
        Self {
            address,
            watermark_before,
            fetched: 0,
            outcomes: Vec::new(),
            committed: None,
            error: None,
        }
    }

    pub fn count(&self, outcome: TxOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn notified(&self) -> usize {
        self.count(TxOutcome::Notified)
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }
}

enum Probe {
    Stack(Vec<WireValue>),
    NotASale,
    Exhausted,
}

pub struct SaleScanner {
    chain: Arc<dyn ChainClient>,
    enrichment: Arc<dyn EnrichmentGateway>,
    notifier: Arc<dyn Notifier>,
    watermarks: Arc<dyn WatermarkStore>,
    monitored: Arc<MonitoredSet>,
    codec: StackCodec,
    settings: ScanSettings,
    /// Sale contracts notified in this process run → utime of the notifying tx.
    /// Entries older than `DEDUP_RETENTION_SECS` behind the watermark are pruned.
    notified: DashMap<TonAddress, u64>,
}

impl SaleScanner {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        enrichment: Arc<dyn EnrichmentGateway>,
        notifier: Arc<dyn Notifier>,
        watermarks: Arc<dyn WatermarkStore>,
        monitored: Arc<MonitoredSet>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            chain,
            enrichment,
            notifier,
            watermarks,
            monitored,
            codec: StackCodec::default(),
            settings,
            notified: DashMap::new(),
        }
    }

    pub fn with_codec(mut self, codec: StackCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn monitored(&self) -> &MonitoredSet {
        &self.monitored
    }

    /// Sale contracts currently remembered for dedup.
    pub fn remembered_sales(&self) -> usize {
        self.notified.len()
    }

    fn forget_notified_before(&self, utime: u64) {
        self.notified.retain(|_, notified_at| *notified_at >= utime);
    }

    /// Scan one royalty address and commit its watermark.
    pub async fn scan_address(&self, address: &TonAddress) -> ScanReport {
        let key = address.storage_key();
        let watermark = self.watermarks.read(&key);
        let mut report = ScanReport::new(*address, watermark);

        let mut transactions = match self.list_new_transactions(address, watermark).await {
            Ok(txs) => txs,
            Err(e) => {
                warn!("[{}] Listing failed, skipping this cycle: {}", address.short(), e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.fetched = transactions.len();

        // indexers return newest first
        transactions.reverse();
        transactions.sort_by_key(|tx| tx.utime);

        let mut max_seen = watermark;
        for tx in transactions.iter().filter(|tx| tx.utime > watermark) {
            max_seen = max_seen.max(tx.utime);
            let outcome = self.process_transaction(address, tx).await;
            debug!("[{}] tx {} @{}: {}", address.short(), tx.id, tx.utime, outcome);
            report.outcomes.push((tx.id.clone(), outcome));
        }

        if max_seen > watermark {
            match self.watermarks.write(&key, max_seen) {
                Ok(stored) => report.committed = Some(stored),
                Err(e) => error!("[{}] Watermark commit failed: {}", address.short(), e),
            }
        }
        if let Some(stored) = report.committed {
            self.forget_notified_before(stored.saturating_sub(DEDUP_RETENTION_SECS));
        }

        info!(
            "[{}] fetched {} | new {} | notified {} | skipped {} | watermark {} -> {}",
            address.short(),
            report.fetched,
            report.processed(),
            report.notified(),
            report.processed() - report.notified(),
            watermark,
            report.committed.unwrap_or(watermark)
        );
        report
    }

    /// Page backwards from the newest transaction until the listing reaches `since`.
    async fn list_new_transactions(
        &self,
        address: &TonAddress,
        since: u64,
    ) -> Result<Vec<TransactionSummary>, ChainError> {
        let chain = &self.chain;
        let (limit, timeout) = (self.settings.tx_limit, self.settings.call_timeout);

        let mut transactions = Vec::new();
        let mut seen = HashSet::new();
        let mut before_lt = None;
        for _ in 0..MAX_LISTING_PAGES {
            let page = retry(
                &self.settings.probe_retry,
                move || {
                    with_timeout(
                        timeout,
                        chain.list_transactions(address, since, limit, before_lt),
                        || ChainError::Timeout,
                    )
                },
                ChainError::is_transient,
            )
            .await?;

            transactions.extend(page.transactions.into_iter().filter(|tx| seen.insert(tx.id.clone())));
            match page.next_before_lt {
                Some(lt) if before_lt.map_or(true, |prev| lt < prev) => before_lt = Some(lt),
                _ => return Ok(transactions),
            }
        }

        warn!(
            "[{}] Listing did not reach watermark {} within {} pages, older transactions are skipped",
            address.short(),
            since,
            MAX_LISTING_PAGES
        );
        Ok(transactions)
    }

    async fn process_transaction(&self, royalty: &TonAddress, tx: &TransactionSummary) -> TxOutcome {
        let Some(contract) = tx.source else {
            return TxOutcome::NoCounterparty;
        };

        let stack = match self.probe(&contract).await {
            Probe::Stack(stack) => stack,
            Probe::NotASale => return TxOutcome::NotASale,
            Probe::Exhausted => {
                warn!("[{}] Probe retries exhausted for {} (tx {})", royalty.short(), contract.short(), tx.id);
                return TxOutcome::ProbeExhausted;
            }
        };

        let kind_hint = stack.first().and_then(classify_wire_kind);
        let record = match parse_sale_with_kind(&self.codec.decode_stack(&stack), kind_hint) {
            Ok(record) => record,
            Err(e) => {
                warn!("[{}] Unparseable sale stack from {}: {}", royalty.short(), contract.short(), e);
                return TxOutcome::Invalid;
            }
        };

        if !record.is_settled() {
            let canceled = record.auction.as_ref().map_or(false, |a| a.is_canceled);
            return if canceled { TxOutcome::Canceled } else { TxOutcome::Incomplete };
        }

        if self.notified.contains_key(&contract) {
            return TxOutcome::Duplicate;
        }

        self.enrich_and_notify(royalty, &contract, tx, &record).await
    }

    /// Try each probe method in order; the first non-empty stack wins.
    async fn probe(&self, contract: &TonAddress) -> Probe {
        let chain = &self.chain;
        let timeout = self.settings.call_timeout;
        let mut exhausted = false;
        for method in &self.settings.probe_methods {
            let result = retry(
                &self.settings.probe_retry,
                move || with_timeout(timeout, chain.invoke_read_method(contract, method), || ChainError::Timeout),
                ChainError::is_transient,
            )
            .await;

            match result {
                Ok(MethodOutcome::Stack(stack)) if !stack.is_empty() => return Probe::Stack(stack),
                Ok(_) => {}
                Err(e) => {
                    debug!("{} on {} failed: {}", method, contract.short(), e);
                    exhausted = true;
                }
            }
        }
        if exhausted {
            Probe::Exhausted
        } else {
            Probe::NotASale
        }
    }

    async fn enrich_and_notify(
        &self,
        royalty: &TonAddress,
        contract: &TonAddress,
        tx: &TransactionSummary,
        record: &SaleRecord,
    ) -> TxOutcome {
        let timeout = self.settings.call_timeout;
        let enrichment = &self.enrichment;
        let nft = &record.nft;

        let lookup = retry(
            &self.settings.probe_retry,
            move || with_timeout(timeout, enrichment.nft_metadata(nft), || EnrichmentError::Timeout),
            EnrichmentError::is_transient,
        )
        .await;
        let meta = match lookup {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                warn!("[{}] No metadata for NFT {}", royalty.short(), record.nft);
                return TxOutcome::MetadataUnavailable;
            }
            Err(e) => {
                warn!("[{}] Metadata lookup failed for {}: {}", royalty.short(), record.nft, e);
                return TxOutcome::MetadataUnavailable;
            }
        };

        let collection = match meta.collection {
            Some(c) if self.monitored.is_monitored_collection(&c) => c,
            other => {
                debug!(
                    "[{}] NFT {} collection {:?} not monitored",
                    royalty.short(),
                    record.nft.short(),
                    other
                );
                return TxOutcome::NotInCollection;
            }
        };

        let floor = match tokio::time::timeout(timeout, self.enrichment.floor_price(&collection)).await {
            Ok(Ok(floor)) => floor,
            Ok(Err(e)) => {
                debug!("Floor lookup failed for {}: {}", collection.short(), e);
                None
            }
            Err(_) => {
                debug!("Floor lookup timed out for {}", collection.short());
                None
            }
        };

        let notification = SaleNotification::new(record, &meta, floor.as_ref());
        match tokio::time::timeout(timeout, self.notifier.notify(&notification)).await {
            Ok(Ok(())) => {
                self.notified.insert(*contract, tx.utime);
                info!(
                    "[{}] {} {} for {} TON (tx {})",
                    royalty.short(),
                    record.kind,
                    notification.title(),
                    record.price.normalize(),
                    tx.id
                );
                TxOutcome::Notified
            }
            Ok(Err(e)) => {
                error!("[{}] Notification failed for {}: {}", royalty.short(), record.nft, e);
                TxOutcome::NotifyFailed
            }
            Err(_) => {
                error!("[{}] Notification timed out for {}", royalty.short(), record.nft);
                TxOutcome::NotifyFailed
            }
        }
    }
}

/// Bound a network call; expiry becomes `expired()`, a transient error.
async fn with_timeout<T, E, F, G>(limit: Duration, fut: F, expired: G) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    G: FnOnce() -> E,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(expired()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TransactionPage;
    use crate::error::NotifyError;
    use crate::stack::wire_stack;
    use crate::types::{FloorPrice, NftMetadata, SaleKind};
    use crate::watermark::MemoryWatermarkStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    // -- fixtures -------------------------------------------------------

    fn addr(byte: u8) -> TonAddress {
        TonAddress::new(0, [byte; 32])
    }

    const ROYALTY: u8 = 0xaa;
    const COLLECTION: u8 = 0xc0;
    const OTHER_COLLECTION: u8 = 0xc1;
    const MARKET: u8 = 0x01;
    const BUYER: u8 = 0x0b;

    fn cell(a: TonAddress) -> Value {
        json!({"type": "cell", "cell": a.to_raw()})
    }

    fn num(v: &str) -> Value {
        json!({"type": "num", "num": v})
    }

    fn fixed_price_stack(nft: TonAddress, complete: bool, price_nano: u64) -> Value {
        json!([
            num("0x46495850524943"),
            num(if complete { "-0x1" } else { "0x0" }),
            num("1000"),
            cell(addr(MARKET)),
            cell(nft),
            cell(addr(BUYER)),
            num(&price_nano.to_string()),
        ])
    }

    fn auction_stack(nft: TonAddress, is_end: bool, canceled: bool) -> Value {
        let mut items = vec![json!(["num", "0x0"]); 20];
        items[0] = json!(["num", "0x415543"]);
        items[1] = json!(["num", if is_end { "-1" } else { "0" }]);
        items[3] = cell(addr(MARKET));
        items[4] = cell(nft);
        items[5] = cell(addr(BUYER));
        items[6] = json!(["num", "7000000000"]);
        items[15] = json!(["num", "100000000000"]);
        items[16] = json!(["num", "1000000000"]);
        items[19] = json!(["num", if canceled { "-1" } else { "0" }]);
        Value::Array(items)
    }

    fn offer_stack(nft: TonAddress) -> Value {
        json!([
            num("0x4f46464552"),
            num("-1"),
            num("1234"),
            num("0"),
            cell(addr(MARKET)),
            cell(nft),
            cell(addr(BUYER)),
            num("3000000000"),
        ])
    }

    fn tx(id: &str, utime: u64, source: Option<TonAddress>) -> TransactionSummary {
        TransactionSummary {
            id: id.to_string(),
            lt: utime,
            utime,
            source,
        }
    }

    // -- fakes ----------------------------------------------------------

    #[derive(Clone)]
    enum Reply {
        Stack(Value),
        NotApplicable,
        Transient,
        Hang,
    }

    #[derive(Default)]
    struct FakeChain {
        txs: Mutex<Vec<TransactionSummary>>,
        replies: Mutex<HashMap<(TonAddress, String), Reply>>,
        list_fails: AtomicU32,
        list_calls: AtomicU32,
        invoke_calls: AtomicU32,
    }

    impl FakeChain {
        fn set_txs(&self, txs: Vec<TransactionSummary>) {
            *self.txs.lock().unwrap() = txs;
        }

        fn reply(&self, contract: TonAddress, method: &str, reply: Reply) {
            self.replies
                .lock()
                .unwrap()
                .insert((contract, method.to_string()), reply);
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn list_transactions(
            &self,
            _address: &TonAddress,
            since: u64,
            limit: u32,
            before_lt: Option<u64>,
        ) -> Result<TransactionPage, ChainError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.list_fails.load(Ordering::SeqCst) > 0 {
                self.list_fails.fetch_sub(1, Ordering::SeqCst);
                return Err(ChainError::RateLimited);
            }
            // newest first, like the real indexer
            let mut txs: Vec<TransactionSummary> = self
                .txs
                .lock()
                .unwrap()
                .iter()
                .filter(|t| before_lt.map_or(true, |lt| t.lt < lt))
                .cloned()
                .collect();
            txs.sort_by_key(|t| std::cmp::Reverse(t.lt));
            txs.truncate(limit as usize);
            Ok(TransactionPage::new(txs, since, limit))
        }

        async fn invoke_read_method(
            &self,
            address: &TonAddress,
            method: &str,
        ) -> Result<MethodOutcome, ChainError> {
            self.invoke_calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get(&(*address, method.to_string()))
                .cloned()
                .unwrap_or(Reply::NotApplicable);
            match reply {
                Reply::Stack(v) => Ok(MethodOutcome::Stack(wire_stack(&v))),
                Reply::NotApplicable => Ok(MethodOutcome::NotApplicable),
                Reply::Transient => Err(ChainError::Status {
                    status: 503,
                    body: String::new(),
                }),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    #[derive(Default)]
    struct FakeEnrichment {
        collections: Mutex<HashMap<TonAddress, TonAddress>>,
        /// Errors returned by the next metadata lookups, front first
        metadata_errors: Mutex<VecDeque<EnrichmentError>>,
        metadata_calls: AtomicU32,
        floor_fails: bool,
    }

    impl FakeEnrichment {
        fn nft_in(&self, nft: TonAddress, collection: u8) {
            self.collections.lock().unwrap().insert(nft, addr(collection));
        }

        fn fail_metadata(&self, errors: Vec<EnrichmentError>) {
            self.metadata_errors.lock().unwrap().extend(errors);
        }
    }

    #[async_trait]
    impl EnrichmentGateway for FakeEnrichment {
        async fn nft_metadata(&self, nft: &TonAddress) -> Result<Option<NftMetadata>, EnrichmentError> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.metadata_errors.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(self.collections.lock().unwrap().get(nft).map(|c| NftMetadata {
                collection: Some(*c),
                owner: Some(addr(BUYER)),
                name: Some(format!("Item {}", nft.short())),
                image_url: None,
            }))
        }

        async fn floor_price(&self, _collection: &TonAddress) -> Result<Option<FloorPrice>, EnrichmentError> {
            if self.floor_fails {
                return Err(EnrichmentError::Timeout);
            }
            Ok(Some(FloorPrice {
                price: dec!(4),
                link: Some("https://getgems.io/nft/EQfloor".into()),
            }))
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<SaleNotification>>,
        fail: bool,
    }

    impl FakeNotifier {
        fn sent(&self) -> Vec<SaleNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, sale: &SaleNotification) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Timeout);
            }
            self.sent.lock().unwrap().push(sale.clone());
            Ok(())
        }
    }

    struct Harness {
        chain: Arc<FakeChain>,
        enrichment: Arc<FakeEnrichment>,
        notifier: Arc<FakeNotifier>,
        store: Arc<MemoryWatermarkStore>,
        scanner: SaleScanner,
    }

    fn settings() -> ScanSettings {
        ScanSettings {
            probe_retry: RetryPolicy::fixed(3, Duration::ZERO),
            call_timeout: Duration::from_millis(200),
            ..ScanSettings::default()
        }
    }

    fn harness_with(enrichment: FakeEnrichment, notifier: FakeNotifier) -> Harness {
        let chain = Arc::new(FakeChain::default());
        let enrichment = Arc::new(enrichment);
        let notifier = Arc::new(notifier);
        let store = Arc::new(MemoryWatermarkStore::new());
        let monitored = Arc::new(MonitoredSet::new(
            vec![addr(ROYALTY)],
            HashSet::from([addr(COLLECTION)]),
        ));
        let scanner = SaleScanner::new(
            chain.clone(),
            enrichment.clone(),
            notifier.clone(),
            store.clone(),
            monitored,
            settings(),
        );
        Harness {
            chain,
            enrichment,
            notifier,
            store,
            scanner,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeEnrichment::default(), FakeNotifier::default())
    }

    fn royalty_key() -> String {
        addr(ROYALTY).storage_key()
    }

    // -- scenarios ------------------------------------------------------

    #[tokio::test]
    async fn test_fixed_price_sale_notified_once() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 5_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SaleKind::FixedPrice);
        assert_eq!(sent[0].price, dec!(5.0));
        assert_eq!(sent[0].nft, nft);
        assert_eq!(sent[0].marketplace, Some(addr(MARKET)));
        assert_eq!(sent[0].counterparty, Some(addr(BUYER)));
        assert_eq!(sent[0].floor_price, Some(dec!(4)));
        assert_eq!(report.notified(), 1);
        assert_eq!(report.committed, Some(1_000));
        assert_eq!(h.store.read(&royalty_key()), 1_000);
    }

    #[tokio::test]
    async fn test_second_scan_is_idempotent() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale)), tx("t0", 900, None)]);

        let first = h.scanner.scan_address(&addr(ROYALTY)).await;
        let second = h.scanner.scan_address(&addr(ROYALTY)).await;

        assert_eq!(first.notified(), 1);
        assert_eq!(second.processed(), 0);
        assert_eq!(second.committed, None);
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.store.read(&royalty_key()), 1_000);
    }

    #[tokio::test]
    async fn test_fresh_scanner_with_same_store_sends_nothing() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);
        h.scanner.scan_address(&addr(ROYALTY)).await;

        // simulated restart: new scanner (empty dedup map), same watermark store
        let restarted = SaleScanner::new(
            h.chain.clone(),
            h.enrichment.clone(),
            h.notifier.clone(),
            h.store.clone(),
            Arc::new(h.scanner.monitored().clone()),
            settings(),
        );
        let report = restarted.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.processed(), 0);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic() {
        let h = harness();
        let royalty = addr(ROYALTY);
        let mut last = 0;
        for batch in [vec![500, 300], vec![200], vec![800, 700, 100], vec![], vec![800]] {
            h.chain
                .set_txs(batch.iter().map(|t| tx(&t.to_string(), *t, None)).collect());
            h.scanner.scan_address(&royalty).await;
            let now = h.store.read(&royalty_key());
            assert!(now >= last, "watermark went {} -> {}", last, now);
            last = now;
        }
        assert_eq!(last, 800);
    }

    #[tokio::test]
    async fn test_open_auction_not_notified() {
        let h = harness();
        let (sale, nft) = (addr(0x11), addr(0x21));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(auction_stack(nft, false, false)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::Incomplete), 1);
        assert!(h.notifier.sent().is_empty());
        // attempted, so the watermark still moves
        assert_eq!(report.committed, Some(1_000));
    }

    #[tokio::test]
    async fn test_finished_auction_uses_last_bid() {
        let h = harness();
        let (sale, nft) = (addr(0x11), addr(0x21));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(auction_stack(nft, true, false)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        h.scanner.scan_address(&addr(ROYALTY)).await;
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SaleKind::Auction);
        assert_eq!(sent[0].price, dec!(7));
    }

    #[tokio::test]
    async fn test_canceled_auction_not_notified() {
        let h = harness();
        let (sale, nft) = (addr(0x11), addr(0x21));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(auction_stack(nft, true, true)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::Canceled), 1);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_fixed_price_not_notified() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, false, 5_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        h.scanner.scan_address(&addr(ROYALTY)).await;
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_collection_not_notified() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 5_000_000_000)));
        h.enrichment.nft_in(nft, OTHER_COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::NotInCollection), 1);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_nft_metadata_skips() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 5_000_000_000)));
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::MetadataUnavailable), 1);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_listing_changes_nothing() {
        let h = harness();
        h.store.write(&royalty_key(), 777).unwrap();

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.fetched, 0);
        assert_eq!(report.committed, None);
        assert!(report.error.is_none());
        assert_eq!(h.store.read(&royalty_key()), 777);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transient_probe_failures_skip_but_advance() {
        let h = harness();
        let (flaky, good, nft) = (addr(0x10), addr(0x12), addr(0x20));
        for method in DEFAULT_PROBE_METHODS {
            h.chain.reply(flaky, method, Reply::Transient);
        }
        h.chain.reply(good, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 2_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(good)), tx("t2", 2_000, Some(flaky))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;

        assert_eq!(report.count(TxOutcome::ProbeExhausted), 1);
        assert_eq!(report.notified(), 1);
        // 3 attempts x 2 methods for the flaky contract + 1 for the good one
        assert_eq!(h.chain.invoke_calls.load(Ordering::SeqCst), 7);
        assert_eq!(h.store.read(&royalty_key()), 2_000);
    }

    #[tokio::test]
    async fn test_hung_probe_times_out() {
        let h = harness();
        let sale = addr(0x10);
        h.chain.reply(sale, "get_sale_data", Reply::Hang);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::ProbeExhausted), 1);
        assert_eq!(report.committed, Some(1_000));
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_without_commit() {
        let h = harness();
        h.chain.list_fails.store(10, Ordering::SeqCst);
        h.chain.set_txs(vec![tx("t1", 1_000, None)]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert!(report.error.is_some());
        assert_eq!(report.committed, None);
        assert_eq!(h.chain.list_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.store.read(&royalty_key()), 0);
    }

    #[tokio::test]
    async fn test_listing_recovers_within_retries() {
        let h = harness();
        h.chain.list_fails.store(2, Ordering::SeqCst);
        h.chain.set_txs(vec![tx("t1", 1_000, None)]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert!(report.error.is_none());
        assert_eq!(report.committed, Some(1_000));
    }

    #[tokio::test]
    async fn test_offer_probe_after_not_applicable() {
        let h = harness();
        let (offer, nft) = (addr(0x13), addr(0x23));
        h.chain.reply(offer, "get_sale_data", Reply::NotApplicable);
        h.chain.reply(offer, "get_offer_data", Reply::Stack(offer_stack(nft)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(offer))]);

        h.scanner.scan_address(&addr(ROYALTY)).await;
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SaleKind::Offer);
        assert_eq!(sent[0].price, dec!(3));
        // NotApplicable is not retried
        assert_eq!(h.chain.invoke_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_plain_transfers_are_not_sales() {
        let h = harness();
        h.chain.set_txs(vec![tx("t1", 1_000, Some(addr(0x55))), tx("t2", 1_001, None)]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::NotASale), 1);
        assert_eq!(report.count(TxOutcome::NoCounterparty), 1);
        assert_eq!(report.committed, Some(1_001));
    }

    #[tokio::test]
    async fn test_malformed_stack_skipped() {
        let h = harness();
        let (bad, sale, nft) = (addr(0x14), addr(0x10), addr(0x20));
        h.chain.reply(bad, "get_sale_data", Reply::Stack(json!([num("0x1"), num("0x2")])));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(bad)), tx("t2", 1_100, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::Invalid), 1);
        assert_eq!(report.notified(), 1);
    }

    #[tokio::test]
    async fn test_same_sale_contract_notified_once_per_run() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale)), tx("t2", 1_005, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.notified(), 1);
        assert_eq!(report.count(TxOutcome::Duplicate), 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_processed_oldest_first() {
        let h = harness();
        let pairs = [(addr(0x10), addr(0x20), 3_000), (addr(0x11), addr(0x21), 1_000), (addr(0x12), addr(0x22), 2_000)];
        let mut txs = Vec::new();
        for (sale, nft, utime) in pairs {
            h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
            h.enrichment.nft_in(nft, COLLECTION);
            txs.push(tx(&utime.to_string(), utime, Some(sale)));
        }
        h.chain.set_txs(txs);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        let ids: Vec<&str> = report.outcomes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["1000", "2000", "3000"]);
        let nfts: Vec<TonAddress> = h.notifier.sent().iter().map(|n| n.nft).collect();
        assert_eq!(nfts, vec![addr(0x21), addr(0x22), addr(0x20)]);
    }

    #[tokio::test]
    async fn test_old_transactions_ignored() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.store.write(&royalty_key(), 1_000).unwrap();
        h.chain.set_txs(vec![tx("old", 1_000, Some(sale)), tx("older", 10, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.fetched, 0);
        assert_eq!(report.processed(), 0);
        assert_eq!(report.committed, None);
        assert_eq!(h.chain.invoke_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_floor_failure_does_not_block() {
        let h = harness_with(
            FakeEnrichment {
                floor_fails: true,
                ..Default::default()
            },
            FakeNotifier::default(),
        );
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        h.scanner.scan_address(&addr(ROYALTY)).await;
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].floor_price, None);
        assert_eq!(sent[0].floor_link, None);
    }

    #[tokio::test]
    async fn test_notify_failure_is_contained() {
        let h = harness_with(
            FakeEnrichment::default(),
            FakeNotifier {
                fail: true,
                ..Default::default()
            },
        );
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale)), tx("t2", 1_100, None)]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(report.count(TxOutcome::NotifyFailed), 1);
        assert_eq!(report.processed(), 2);
        assert_eq!(report.committed, Some(1_100));
    }

    #[tokio::test]
    async fn test_boc_encoded_nft_address() {
        let h = harness();
        let sale = addr(0x10);
        let nft: TonAddress = "0:68f3a076d3451a18fd41e05c71b4c020545d46b2757064e65825ded0c49bf02c"
            .parse()
            .unwrap();
        let mut stack = fixed_price_stack(nft, true, 1_500_000_000);
        stack[4] = json!({
            "type": "cell",
            "cell": "b5ee9c72010101010024000043800d1e740eda68a3431fa83c0b8e3698040a8ba8d64eae0c9ccb04bbda18937e0590"
        });
        h.chain.reply(sale, "get_sale_data", Reply::Stack(stack));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        h.scanner.scan_address(&addr(ROYALTY)).await;
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].price, dec!(1.5));
    }

    #[tokio::test]
    async fn test_burst_larger_than_page_is_fully_scanned() {
        let h = harness_with(FakeEnrichment::default(), FakeNotifier::default());
        let scanner = SaleScanner::new(
            h.chain.clone(),
            h.enrichment.clone(),
            h.notifier.clone(),
            h.store.clone(),
            Arc::new(h.scanner.monitored().clone()),
            ScanSettings {
                tx_limit: 2,
                ..settings()
            },
        );
        let mut txs = Vec::new();
        for (i, utime) in [1_000u64, 1_001, 1_002].into_iter().enumerate() {
            let (sale, nft) = (addr(0x10 + i as u8), addr(0x20 + i as u8));
            h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
            h.enrichment.nft_in(nft, COLLECTION);
            txs.push(tx(&utime.to_string(), utime, Some(sale)));
        }
        h.chain.set_txs(txs);

        let report = scanner.scan_address(&addr(ROYALTY)).await;

        assert_eq!(report.fetched, 3);
        assert_eq!(report.notified(), 3);
        assert_eq!(report.committed, Some(1_002));
        // one full page, then a short one
        assert_eq!(h.chain.list_calls.load(Ordering::SeqCst), 2);
        let ids: Vec<&str> = report.outcomes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["1000", "1001", "1002"]);
    }

    #[tokio::test]
    async fn test_paging_stops_at_watermark() {
        let h = harness();
        let scanner = SaleScanner::new(
            h.chain.clone(),
            h.enrichment.clone(),
            h.notifier.clone(),
            h.store.clone(),
            Arc::new(h.scanner.monitored().clone()),
            ScanSettings {
                tx_limit: 2,
                ..settings()
            },
        );
        h.store.write(&royalty_key(), 1_001).unwrap();
        h.chain.set_txs((995..=1_003).map(|t| tx(&t.to_string(), t, None)).collect());

        let report = scanner.scan_address(&addr(ROYALTY)).await;

        // [1003, 1002] then [1001, 1000] which reaches the watermark
        assert_eq!(h.chain.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.processed(), 2);
        assert_eq!(report.committed, Some(1_003));
    }

    #[tokio::test]
    async fn test_metadata_lookup_retried_on_rate_limit() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.enrichment.fail_metadata(vec![EnrichmentError::Status(429), EnrichmentError::Status(429)]);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;

        assert_eq!(report.notified(), 1);
        assert_eq!(h.enrichment.metadata_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_client_error_not_retried() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.enrichment.fail_metadata(vec![EnrichmentError::Status(404)]);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        let report = h.scanner.scan_address(&addr(ROYALTY)).await;

        assert_eq!(report.count(TxOutcome::MetadataUnavailable), 1);
        assert_eq!(h.enrichment.metadata_calls.load(Ordering::SeqCst), 1);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dedup_entries_expire_behind_watermark() {
        let h = harness();
        let (sale, nft) = (addr(0x10), addr(0x20));
        h.chain.reply(sale, "get_sale_data", Reply::Stack(fixed_price_stack(nft, true, 1_000_000_000)));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);
        h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(h.scanner.remembered_sales(), 1);

        // still inside the retention window
        h.chain.set_txs(vec![tx("t2", 1_000 + DEDUP_RETENTION_SECS, None)]);
        h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(h.scanner.remembered_sales(), 1);

        h.chain.set_txs(vec![tx("t3", 1_001 + DEDUP_RETENTION_SECS, None)]);
        h.scanner.scan_address(&addr(ROYALTY)).await;
        assert_eq!(h.scanner.remembered_sales(), 0);
    }

    #[tokio::test]
    async fn test_text_kind_discriminator_detected() {
        let h = harness();
        let (sale, nft) = (addr(0x11), addr(0x21));
        let mut stack = auction_stack(nft, true, false);
        stack[0] = json!("auction");
        h.chain.reply(sale, "get_sale_data", Reply::Stack(stack));
        h.enrichment.nft_in(nft, COLLECTION);
        h.chain.set_txs(vec![tx("t1", 1_000, Some(sale))]);

        h.scanner.scan_address(&addr(ROYALTY)).await;
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SaleKind::Auction);
        assert_eq!(sent[0].price, dec!(7));
    }
}
