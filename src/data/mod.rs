pub mod catalog;
pub mod ratings;

pub use catalog::MovieCatalog;
pub use ratings::RatingStore;
