pub mod briefing;
pub mod contract;
pub mod game_plan;
pub mod journal;
pub mod playbook;
