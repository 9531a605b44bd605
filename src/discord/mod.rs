//! Discord REST v10 implementation of the chat directory.

mod client;

pub use client::DiscordClient;
