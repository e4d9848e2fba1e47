//! Application services: job scheduling, rendering and output.

pub mod error;
pub mod expression;
pub mod jobs;
pub mod output;
pub mod render;
pub mod repos;
pub mod theme;
