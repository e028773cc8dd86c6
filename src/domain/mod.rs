pub mod detection;
pub mod errors;
pub mod model;
pub mod progress;
pub mod stream;
pub mod tally;
