pub mod helpers;
pub mod target_queue;
