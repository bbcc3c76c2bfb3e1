#![doc = include_str!("../README.md")]

pub use crate::config::*;
pub use crate::error::Error;
pub use crate::trace::{
    FileStream, MetadataInterpreter, PacketSeek, StreamData, StreamState, Trace,
};
pub use crate::types::*;

pub mod config;
pub mod error;
pub mod parser;
pub mod trace;
pub mod types;
