//! Scan orchestrator: universe, bootstrap, parallel token scans, dispatch
//!
//! One scan cycle collects data for every universe token, computes signals
//! and the composite score, attaches trade levels for alert-worthy tokens,
//! and hands results and events to the alert sinks. Trade monitoring runs on
//! its own, faster cadence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::alerts::AlertSink;
use crate::collector::Collector;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::levels::{LevelsCalculator, LevelsResult};
use crate::market::{normalize_symbol, MarketDataProvider};
use crate::monitor::TradeMonitor;
use crate::scoring::{Classification, Event, ScoreResult, Scorer};
use crate::signals::SignalEngine;
use crate::storage::{unix_now, Store, StoreStats, UniverseEntry};

/// Hours in the 7d lookback used for the extension penalty.
const PRICE_7D_HOURS: usize = 168;

/// Stablecoins never enter the universe.
const STABLECOINS: [&str; 6] = ["USDT", "USDC", "BUSD", "DAI", "TUSD", "FDUSD"];

/// Attempts at the universe fetch before a transient failure aborts the scan.
const UNIVERSE_FETCH_ATTEMPTS: usize = 3;
const UNIVERSE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Everything produced for one token in one scan cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub symbol: String,
    /// Futures exchanges the token was scanned on.
    pub exchanges: Vec<String>,
    pub current_price: f64,
    pub score: ScoreResult,
    /// Per-signal metadata, keyed by signal name.
    pub signal_details: BTreeMap<String, serde_json::Value>,
    /// Only present when the score clears the alert threshold.
    pub levels: Option<LevelsResult>,
    pub events: Vec<Event>,
}

pub struct Scanner {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn Store>,
    collector: Collector,
    signal_engine: SignalEngine,
    scorer: Scorer,
    levels: LevelsCalculator,
    monitor: TradeMonitor,
    sinks: Vec<Arc<dyn AlertSink>>,
    config: Config,
}

impl Scanner {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn Store>,
        sinks: Vec<Arc<dyn AlertSink>>,
        config: Config,
    ) -> Arc<Self> {
        let collector = Collector::new(
            provider.clone(),
            store.clone(),
            config.scanning.ohlcv_candle_limit,
            config.scanning.orderbook_depth,
        );
        let monitor = TradeMonitor::new(provider.clone(), store.clone(), sinks.clone());
        Arc::new(Self {
            provider,
            store: store.clone(),
            collector,
            signal_engine: SignalEngine::new(store.clone()),
            scorer: Scorer::new(store),
            levels: LevelsCalculator::new(),
            monitor,
            sinks,
            config,
        })
    }

    pub fn monitor(&self) -> &TradeMonitor {
        &self.monitor
    }

    /// One full scan cycle. Returns the alert-worthy results, best first.
    pub async fn run_once(self: Arc<Self>) -> Result<Vec<ScanResult>> {
        let started = std::time::Instant::now();
        info!("starting scan");

        let universe = self.universe().await?;
        let tokens: Vec<UniverseEntry> = universe
            .into_iter()
            .take(self.config.scanning.max_tokens_per_scan)
            .collect();
        let total = tokens.len();
        info!(tokens = total, "universe ready");

        let bootstrapped = self.bootstrap_batch(&tokens).await;
        if bootstrapped > 0 {
            info!(count = bootstrapped, "bootstrapped tokens");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.scanning.max_scan_workers));
        let mut handles = Vec::with_capacity(total);
        for entry in tokens {
            let scanner = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let symbol = entry.symbol.clone();
                (symbol, scanner.scan_token(&entry).await)
            }));
        }

        let mut results: Vec<ScanResult> = Vec::new();
        let mut errors = 0usize;
        for outcome in futures::future::join_all(handles).await {
            match outcome {
                Ok((_, Ok(Some(result)))) => {
                    if result.score.composite_score
                        >= self.config.scanning.alert_score_threshold
                    {
                        results.push(result);
                    }
                }
                Ok((_, Ok(None))) => {}
                Ok((symbol, Err(e))) => {
                    errors += 1;
                    warn!(symbol, error = %e, "token scan failed");
                }
                Err(e) => {
                    errors += 1;
                    error!(error = %e, "scan task panicked");
                }
            }
        }

        results.sort_by(|a, b| {
            b.score
                .composite_score
                .partial_cmp(&a.score.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.send_alerts(&results).await;

        if let Err(e) = self.monitor.monitor_all().await {
            error!(error = %e, "trade monitoring failed");
        }

        info!(
            elapsed_s = started.elapsed().as_secs_f64(),
            scanned = total,
            alerts = results.len(),
            errors,
            "scan done"
        );
        for result in results.iter().take(5) {
            info!(
                symbol = result.symbol,
                score = result.score.composite_score,
                classification = %result.score.classification,
                "top result"
            );
        }
        Ok(results)
    }

    /// Scan loop plus the faster trade-monitor loop, until ctrl-c.
    pub async fn run_continuous(self: Arc<Self>) {
        info!("continuous mode started");
        let mut scan_tick = tokio::time::interval(Duration::from_secs(
            self.config.scanning.scan_interval_minutes * 60,
        ));
        let mut monitor_tick = tokio::time::interval(Duration::from_secs(
            self.config.scanning.trade_monitor_interval_minutes * 60,
        ));

        loop {
            tokio::select! {
                _ = scan_tick.tick() => {
                    if let Err(e) = Arc::clone(&self).run_once().await {
                        error!(error = %e, "scan cycle failed");
                    }
                }
                _ = monitor_tick.tick() => {
                    if let Err(e) = self.monitor.monitor_all().await {
                        error!(error = %e, "trade monitoring failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }
    }

    async fn scan_token(&self, entry: &UniverseEntry) -> Result<Option<ScanResult>> {
        let symbol = &entry.symbol;
        let bundle = self
            .collector
            .collect(symbol, &entry.futures_exchanges)
            .await?;
        if bundle.is_empty() {
            return Ok(None);
        }

        let signals = self.signal_engine.compute_all(symbol, &bundle).await?;
        let price_7d = self
            .signal_engine
            .price_change(symbol, &bundle, PRICE_7D_HOURS)
            .await?;
        let score = self.scorer.score(symbol, &signals, price_7d).await?;
        let current_price = bundle.current_price().unwrap_or(0.0);

        let signal_details: BTreeMap<String, serde_json::Value> = signals
            .iter()
            .map(|(name, signal)| (name.as_str().to_string(), signal.metadata.clone()))
            .collect();

        let levels = if score.composite_score >= self.config.scanning.alert_score_threshold
            && current_price > 0.0
        {
            Some(
                self.levels
                    .compute(symbol, current_price, &bundle, &signals, &score),
            )
        } else {
            None
        };

        let events = self
            .scorer
            .detect_events(symbol, &score, current_price)
            .await?;

        Ok(Some(ScanResult {
            symbol: symbol.clone(),
            exchanges: entry.futures_exchanges.clone(),
            current_price,
            score,
            signal_details,
            levels,
            events,
        }))
    }

    /// Cached universe when fresh enough, otherwise a rebuild.
    async fn universe(&self) -> Result<Vec<UniverseEntry>> {
        if let Some((built_at, entries)) = self.store.universe().await? {
            let age_hours = (unix_now() - built_at) / 3600.0;
            if !entries.is_empty() && age_hours < self.config.universe.max_age_hours {
                info!(tokens = entries.len(), age_hours, "using cached universe");
                return Ok(entries);
            }
        }
        self.build_universe().await
    }

    /// Group futures/spot listings by base symbol, drop stablecoins, and keep
    /// tokens with futures on enough exchanges.
    async fn build_universe(&self) -> Result<Vec<UniverseEntry>> {
        info!("building token universe");
        let candidates = self.fetch_universe_candidates().await?;

        let mut futures_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut spot_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for candidate in candidates {
            let symbol = normalize_symbol(&candidate.symbol);
            if symbol.is_empty() || STABLECOINS.contains(&symbol.as_str()) {
                continue;
            }
            if candidate.futures {
                futures_map
                    .entry(symbol.clone())
                    .or_default()
                    .insert(candidate.exchange.clone());
            }
            if candidate.spot {
                spot_map.entry(symbol).or_default().insert(candidate.exchange);
            }
        }

        let entries: Vec<UniverseEntry> = futures_map
            .into_iter()
            .filter(|(_, exchanges)| exchanges.len() >= self.config.universe.min_futures_exchanges)
            .map(|(symbol, futures)| {
                let spot = spot_map.remove(&symbol).unwrap_or_default();
                UniverseEntry {
                    symbol,
                    futures_exchanges: futures.into_iter().collect(),
                    spot_exchanges: spot.into_iter().collect(),
                }
            })
            .collect();

        self.store.store_universe(entries.clone()).await?;
        info!(
            tokens = entries.len(),
            min_futures = self.config.universe.min_futures_exchanges,
            "universe built"
        );
        Ok(entries)
    }

    /// Universe listing with retries on transient exchange failures. This is
    /// the one provider call a scan cycle cannot proceed without; per-token
    /// fetches degrade gracefully inside the collector instead.
    async fn fetch_universe_candidates(&self) -> Result<Vec<crate::market::UniverseCandidate>> {
        let mut attempt = 1;
        loop {
            match self.provider.list_universe_candidates().await {
                Ok(candidates) => return Ok(candidates),
                Err(e) => {
                    let err = Error::from(e);
                    if !err.is_retryable() || attempt >= UNIVERSE_FETCH_ATTEMPTS {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "universe fetch failed, retrying");
                    tokio::time::sleep(UNIVERSE_RETRY_DELAY).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backfill history for tokens that need it, serially. A token is
    /// re-checked only after `bootstrap.refresh_hours`.
    async fn bootstrap_batch(&self, tokens: &[UniverseEntry]) -> usize {
        let mut count = 0usize;
        for entry in tokens {
            let symbol = &entry.symbol;
            match self.store.bootstrap_timestamp(symbol).await {
                Ok(Some(ts))
                    if (unix_now() - ts) / 3600.0 < self.config.bootstrap.refresh_hours =>
                {
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(symbol, error = %e, "bootstrap timestamp lookup failed");
                    continue;
                }
            }

            match self.collector.needs_bootstrap(symbol).await {
                Ok(false) => {
                    let _ = self.store.set_bootstrap_timestamp(symbol, unix_now()).await;
                    continue;
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(symbol, error = %e, "bootstrap check failed");
                    continue;
                }
            }

            match self
                .collector
                .bootstrap(symbol, &entry.futures_exchanges)
                .await
            {
                Ok(()) => {
                    let _ = self.store.set_bootstrap_timestamp(symbol, unix_now()).await;
                    count += 1;
                }
                Err(e) => warn!(symbol, error = %e, "bootstrap failed"),
            }
        }
        count
    }

    /// Signal alerts go out for WATCHLIST and above; events always go out.
    async fn send_alerts(&self, results: &[ScanResult]) {
        for result in results {
            if result.score.classification >= Classification::Watchlist {
                for sink in &self.sinks {
                    sink.on_signal_alert(result).await;
                }
            }
            for event in &result.events {
                for sink in &self.sinks {
                    sink.on_event(event).await;
                }
            }
        }
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    pub async fn cleanup(&self, days: f64) -> Result<u64> {
        self.store.cleanup(days).await
    }
}
