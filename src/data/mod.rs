pub mod catalog;
pub mod features;
pub mod store;

pub use catalog::ProjectCatalog;
pub use features::FeatureMatrix;
pub use store::{InteractionStore, UserItemMatrix};
