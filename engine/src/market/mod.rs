pub mod indicators;
pub mod models;
pub mod resample;
pub mod snapshot;
pub mod source;
