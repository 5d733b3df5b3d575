pub mod converter;
pub mod decoder;
pub mod provider;
pub mod reliable;
pub mod sse;

pub mod mock;

pub use decoder::{decode, DecodedEvent, DecodedRound, EventDecoder};
pub use provider::{AnthropicConfig, AnthropicProvider};
pub use reliable::{ReliableConfig, ReliableProvider};
