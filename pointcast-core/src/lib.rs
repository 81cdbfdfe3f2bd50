mod config;
mod data;
mod deck;
mod statistics;
mod util;

pub use config::*;
pub use data::*;
pub use deck::*;
pub use statistics::*;
pub use util::*;
