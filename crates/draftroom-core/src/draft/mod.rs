pub mod eligibility;
pub mod pick;
pub mod player;
pub mod schedule;
pub mod state;
