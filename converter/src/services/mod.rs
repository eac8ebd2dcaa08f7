pub mod discovery;
pub mod driver;
pub mod filter;

pub use discovery::DocketDiscoverer;
pub use driver::{ConversionDriver, DocketOutcome, RunReport, RunState, RunStats};
pub use filter::Filters;
