//! Google Sheets REST v4 implementation of the ledger source.

mod client;

pub use client::SheetsClient;
