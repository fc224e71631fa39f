pub mod appointment;
pub mod history;
pub mod lead;
pub mod lost;
pub mod owner;
pub mod stage;
