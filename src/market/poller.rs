//! Price polling with mirror failover and move detection
//!
//! Mirrors are tried from a rotating start index. After a success the start
//! index moves one past the mirror that answered, so a mirror that just
//! failed is tried last on the next cycle. There is no backoff.

use crate::audio::cues::Cue;
use crate::integration::config::MarketConfig;
use crate::market::fetch::PriceFetcher;
use crate::session::events::{CommandSender, SessionCommand};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Latest prices plus the ones they replaced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    pub prices: HashMap<String, f64>,
    pub previous: HashMap<String, f64>,
}

impl MarketSnapshot {
    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }

    pub fn previous_price(&self, symbol: &str) -> Option<f64> {
        self.previous.get(symbol).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Updated { mirror: usize, cue: Option<Cue> },
    AllFailed,
}

pub struct MarketPoller<F: PriceFetcher> {
    fetcher: F,
    mirrors: Vec<String>,
    symbols: Vec<String>,
    alert_symbol: String,
    threshold: f64,
    start_index: usize,
    snapshot: MarketSnapshot,
}

impl<F: PriceFetcher> MarketPoller<F> {
    pub fn new(fetcher: F, config: &MarketConfig) -> Self {
        Self {
            fetcher,
            mirrors: config.mirrors.clone(),
            symbols: config.symbols.clone(),
            alert_symbol: config.alert_symbol.clone(),
            threshold: config.threshold,
            start_index: 0,
            snapshot: MarketSnapshot::default(),
        }
    }

    /// Run one polling cycle
    pub async fn tick(&mut self) -> TickOutcome {
        let count = self.mirrors.len();

        for offset in 0..count {
            let index = (self.start_index + offset) % count;
            let url = &self.mirrors[index];

            let table = match self.fetcher.fetch(url).await {
                Ok(table) => table,
                Err(e) => {
                    warn!("Failed to fetch from mirror {}, trying next: {}", index, e);
                    continue;
                }
            };

            let Some(prices) = self
                .symbols
                .iter()
                .map(|symbol| table.get(symbol).map(|&price| (symbol.clone(), price)))
                .collect::<Option<HashMap<String, f64>>>()
            else {
                warn!("Mirror {} response is missing symbols, trying next", index);
                continue;
            };

            let cue = self.detect_move(&prices);
            let previous = std::mem::replace(&mut self.snapshot.prices, prices);
            self.snapshot.previous.extend(previous);
            self.start_index = (self.start_index + offset + 1) % count;

            debug!("Prices from mirror {}: {:?}", index, self.snapshot.prices);
            return TickOutcome::Updated { mirror: index, cue };
        }

        error!("All price mirrors failed");
        TickOutcome::AllFailed
    }

    fn detect_move(&self, prices: &HashMap<String, f64>) -> Option<Cue> {
        let new = *prices.get(&self.alert_symbol)?;
        let old = self.snapshot.price(&self.alert_symbol)?;
        if old <= 0.0 {
            return None;
        }

        if new > old + self.threshold {
            Some(Cue::PriceUp)
        } else if new < old - self.threshold {
            Some(Cue::PriceDown)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }

    /// Mirror the next cycle starts from
    pub fn start_index(&self) -> usize {
        self.start_index
    }
}

/// Poll immediately, then every `interval`, forwarding cues to the session
/// driver. Returns once the driver is gone.
pub async fn run_market_poller<F: PriceFetcher>(
    mut poller: MarketPoller<F>,
    interval: Duration,
    commands: CommandSender,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Polling {} price mirrors every {:?}", poller.mirrors.len(), interval);

    loop {
        ticker.tick().await;
        if commands.is_closed() {
            break;
        }

        if let TickOutcome::Updated { cue, .. } = poller.tick().await {
            let summary: Vec<String> = poller
                .symbols
                .iter()
                .filter_map(|s| poller.snapshot.price(s).map(|p| format!("{} {:.2}", s, p)))
                .collect();
            info!("{}", summary.join(" | "));

            if let Some(cue) = cue {
                info!("{} moved past threshold: {:?}", poller.alert_symbol, cue);
                if commands.send(SessionCommand::PlayCue(cue)).is_err() {
                    break;
                }
            }
        }
    }

    debug!("Market poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fetch::PriceTable;
    use crate::{Result, SolashenError};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Answers from a script keyed by mirror URL
    struct ScriptedFetcher {
        responses: Mutex<HashMap<String, Vec<Result<PriceTable>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, url: &str, response: Result<PriceTable>) {
            self.responses
                .lock()
                .entry(url.to_string())
                .or_default()
                .push(response);
        }
    }

    #[async_trait]
    impl PriceFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<PriceTable> {
            self.calls.lock().push(url.to_string());
            let mut responses = self.responses.lock();
            match responses.get_mut(url) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Err(SolashenError::MarketFeed("unreachable".into())),
            }
        }
    }

    fn config() -> MarketConfig {
        MarketConfig {
            mirrors: vec!["m0".into(), "m1".into(), "m2".into()],
            ..Default::default()
        }
    }

    fn prices(sol: f64, btc: f64) -> Result<PriceTable> {
        Ok(HashMap::from([
            ("SOLUSDT".to_string(), sol),
            ("BTCUSDT".to_string(), btc),
        ]))
    }

    #[tokio::test]
    async fn test_missing_symbol_counts_as_failure() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("m0", Ok(HashMap::from([("SOLUSDT".to_string(), 1.0)])));
        fetcher.push("m1", prices(100.0, 20000.0));
        let mut poller = MarketPoller::new(fetcher, &config());

        let outcome = poller.tick().await;
        assert_eq!(outcome, TickOutcome::Updated { mirror: 1, cue: None });
        assert_eq!(poller.start_index(), 2);
        assert_eq!(*poller.fetcher.calls.lock(), vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn test_all_failed_keeps_snapshot() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("m0", prices(100.0, 20000.0));
        let mut poller = MarketPoller::new(fetcher, &config());
        poller.tick().await;
        let before = poller.snapshot().clone();

        assert_eq!(poller.tick().await, TickOutcome::AllFailed);
        assert_eq!(poller.snapshot(), &before);
        assert_eq!(poller.start_index(), 1);
    }

    #[tokio::test]
    async fn test_moves_within_threshold_are_quiet() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("m0", prices(100.0, 20000.0));
        fetcher.push("m1", prices(100.05, 25000.0));
        fetcher.push("m2", prices(100.02, 15000.0));
        let mut poller = MarketPoller::new(fetcher, &config());

        poller.tick().await;
        assert_eq!(poller.tick().await, TickOutcome::Updated { mirror: 1, cue: None });
        assert_eq!(poller.tick().await, TickOutcome::Updated { mirror: 2, cue: None });
        assert_eq!(poller.snapshot().previous_price("SOLUSDT"), Some(100.05));
        assert_eq!(poller.snapshot().price("BTCUSDT"), Some(15000.0));
    }
}
