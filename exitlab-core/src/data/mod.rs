//! Price data: the table handed to signal generation and the source contract.

pub mod provider;
pub mod table;

pub use provider::{DataError, DataRequest, PriceDataSource, PriceFetch};
pub use table::{PriceBar, PriceTable};
