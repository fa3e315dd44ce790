#[path = "../support/mod.rs"]
mod support;

mod timeout_retry;
