#[path = "../support/mod.rs"]
mod support;

mod fixtures;
mod output;
