pub mod fixture;

pub use fixture::{FixtureAdapter, FixtureRecord};
