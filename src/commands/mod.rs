pub mod channel;
pub mod config;

use crate::{Data, Error};

pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![channel::channel(), config::config()]
}
