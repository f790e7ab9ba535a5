//! leadflow: lead-engagement messaging core.

pub mod api;
pub mod config;
pub mod conversation;
pub mod engagement;
pub mod error;
pub mod outreach;
pub mod pipeline;
pub mod store;
pub mod types;
