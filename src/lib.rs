#![forbid(unsafe_code)]

//! Resolve social-media video links to downloadable renditions and relay the
//! media bytes with the headers the origin CDNs expect.

pub mod config;
pub mod error;
pub mod platform;
pub mod proxy;
pub mod resolver;
pub mod youtube;
pub mod ytdlp;

pub use error::{Error, Result};
pub use platform::{Platform, classify};
