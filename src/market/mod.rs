pub mod fetch;
pub mod poller;

pub use fetch::{HttpPriceFetcher, PriceFetcher, PriceTable};
pub use poller::{run_market_poller, MarketPoller, MarketSnapshot, TickOutcome};
