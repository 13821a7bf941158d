pub mod config;
pub mod downstream;
pub mod errors;
pub mod socket;
pub mod state;
