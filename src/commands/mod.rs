pub mod app_info;
pub mod dashboard;
pub mod favorites;
pub mod health;
pub mod market_assets;
