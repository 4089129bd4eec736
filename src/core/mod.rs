// Face database building, clustering and best-image selection
pub mod best;
pub mod cluster;
pub mod database;
pub mod dbscan;
pub mod manifest;
pub mod sharpness;
