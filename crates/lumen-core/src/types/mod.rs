pub mod chain;
pub mod execution;
pub mod transaction;

pub use chain::*;
pub use execution::*;
pub use transaction::*;
