//! HTTP surface: health, version and the tool endpoint

pub mod dispatch;
pub mod handlers;
pub mod serve;
pub mod state;
