//! BDD step definitions for the uptime service

pub mod catalog_steps;
pub mod gate_steps;
pub mod health_steps;
pub mod monthly_steps;
pub mod notification_steps;
pub mod report_steps;
pub mod status_steps;
