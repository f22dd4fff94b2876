pub mod command;
pub mod counts;
pub mod enrichment;
pub mod filter;
pub mod genome;
pub mod threading;
pub mod utils;
