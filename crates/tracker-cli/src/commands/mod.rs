pub mod kdtree;
pub mod projector;
