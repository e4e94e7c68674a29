#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod consumer;
pub mod event;
pub mod http;
pub mod queue;
pub mod utils;
