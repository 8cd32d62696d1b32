#![forbid(unsafe_code)]

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod html;
pub mod logging;
pub mod mail;
pub mod model;
pub mod normalize;
pub mod pages;
pub mod pipeline;

pub use error::{Error, Result};
