//! Device handling: topology inspection, composite layer activation, and
//! volume enumeration.

pub mod discover;
pub mod inspect;
pub mod layers;
