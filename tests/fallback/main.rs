#[path = "../support/mod.rs"]
mod support;

mod conflict_review;
