//! Globe at Night citizen-science observations.
//! See https://globeatnight.org/maps-data/

pub mod normalize;
pub mod reading;
