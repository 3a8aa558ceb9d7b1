pub mod extract;
pub mod files;
pub mod prepare;
pub mod types;
