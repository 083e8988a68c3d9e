pub mod classify;
pub mod cli;
pub mod config;
pub mod network;
pub mod runner;
pub mod utils;

pub use classify::*;
pub use cli::*;
pub use config::*;
pub use network::*;
pub use runner::*;
pub use utils::*;
