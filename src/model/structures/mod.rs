pub mod match_record;
pub mod match_result;
pub mod participant_rating;
pub mod seat;
pub mod snapshot;
pub mod stage;
