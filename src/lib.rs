pub mod aggregator;
pub mod app;
pub mod cli;
pub mod completion;
pub mod config;
pub mod evidence;
pub mod extractor;
pub mod fallback;
pub mod formatter;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod prioritizer;
pub mod timeline;
pub mod types;
pub mod variables;
