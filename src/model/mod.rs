pub mod constants;
pub mod rating_model;
pub mod rating_tracker;
pub mod replay_model;
pub mod scoring;
pub mod source_hash;
pub mod structures;
