//! Archive production: the tar streamer and the compress/hash/split pipeline.

pub mod chunker;
pub mod streamer;
