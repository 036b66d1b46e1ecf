pub mod codec;
pub mod types;

#[cfg(test)]
mod tests;

pub use codec::{Codec, CodecError, JsonCodec};
pub use types::*;
