//! Ducky: an interactive terminal assistant that turns natural-language
//! prompts into runnable shell commands and can poll a saved script,
//! feeding its output back to the model for analysis.

pub mod backend;
pub mod config;
pub mod crumbs;
pub mod display;
pub mod error;
pub mod history;
pub mod parser;
pub mod poll;
pub mod session;
pub mod shell;

pub use error::{DuckyError, Result};
