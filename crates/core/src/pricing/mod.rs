pub mod clock;
pub mod quotes;
pub mod ratio;
