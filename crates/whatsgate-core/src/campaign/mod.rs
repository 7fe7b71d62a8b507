//! Bulk campaigns

pub mod renderer;
pub mod runner;

pub use renderer::MessageRenderer;
pub use runner::{CampaignProgress, CampaignRunner};
