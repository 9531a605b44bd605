pub mod audit;
pub mod config;
pub mod directory;
pub mod handle;
pub mod ledger;
pub mod lock;
pub mod page;
pub mod paths;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod state;
#[cfg(test)]
pub mod testing;
pub mod tier;
pub mod util;
