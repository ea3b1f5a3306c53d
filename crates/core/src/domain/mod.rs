pub mod analytics;
pub mod call;
pub mod memory;
pub mod state;
pub mod tip;
pub mod tool;
