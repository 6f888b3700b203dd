//! Text completion adapters.

pub mod openai;
