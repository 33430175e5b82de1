//! Binary persistence helpers shared by [`crate::projector::Projector`] and
//! [`crate::kdtree::KdTree`].

pub mod container;

pub use container::{ContainerReader, ContainerWriter};
