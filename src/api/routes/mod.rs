pub mod health;
pub mod monitors;
pub mod results;
