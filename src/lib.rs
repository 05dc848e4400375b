#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod error;
mod hash;
mod raw;
mod tables;

#[cfg(test)]
mod proptests;

pub use error::Error;
pub use error::Result;
pub use tables::Float32Table;
pub use tables::Float64Table;
pub use tables::Int32Table;
pub use tables::Int64Table;
pub use tables::Uint32Table;
pub use tables::Uint64Table;
