pub mod clustering;
pub mod cross_sector;
pub mod regime;
pub mod sector;
pub mod volatility;
