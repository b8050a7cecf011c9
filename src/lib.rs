pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod event_context;
pub mod events;
pub mod lang;
pub mod ledger;
pub mod locks;
pub mod platform;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod threads;
pub mod translator;

#[cfg(test)]
mod testing;

use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub registry: registry::ChannelRegistry,
    pub translator: Arc<dyn translator::Translator>,
    pub platform: Arc<dyn platform::Platform>,
    /// Routes gateway events to the relay handlers
    pub events: Arc<events::EventTable>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
