mod fixture_box;

pub use fixture_box::*;
