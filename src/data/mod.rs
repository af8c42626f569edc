pub mod cache;
pub mod models;
pub mod prices;
pub mod sector_map;
