pub mod answer;
pub mod attempt;
pub mod exam;
pub mod progress;
pub mod question;
pub mod score;
