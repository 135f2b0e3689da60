pub mod engine;
pub mod grounder;
pub mod history;
pub mod loop_control;
pub mod proposer;
pub mod state;
pub mod trigger;
