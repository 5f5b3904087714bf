pub mod assets;
pub mod summary;
