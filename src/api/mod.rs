//! DeepSeek chat completion API types

mod deepseek;

pub use deepseek::*;
