pub mod app;
pub mod cli;
pub mod collector;
pub mod config;
pub mod content;
pub mod daemon;
pub mod git;
pub mod path_codec;
pub mod process_guard;
pub mod render;
pub mod service;
pub mod session;
pub mod state;
pub mod sync;
pub mod util;
pub mod vcs;
