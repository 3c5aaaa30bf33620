pub mod answer_buffer;
pub mod attempt_service;
pub mod countdown;
pub mod progress_service;
pub mod scoring_service;
pub mod session;
