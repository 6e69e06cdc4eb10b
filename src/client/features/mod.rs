//! Feature services: thin typed wrappers binding a provider registry to the
//! aggregation policy and combination rule of one feature.

pub mod hover;
pub mod location;
pub mod search;
