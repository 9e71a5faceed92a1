//! Data preparation and orchestration.
//!
//! - `interpolate` - daily resampling of the risk-free series
//! - `merge` - inner join of prices and rates
//! - `returns` - log, risk-free and excess returns
//! - `runner` - the configured end-to-end analysis

pub mod interpolate;
pub mod merge;
pub mod returns;
pub mod runner;

pub use interpolate::{BoundaryPolicy, DailyInterpolator};
pub use merge::{merge, CombinedTable};
pub use returns::{ExcessReturnTable, RateScaling, ReturnStats, ReturnTransformer};
pub use runner::{lookback_window, AssetFit, CapmPipeline, PreparedData};
