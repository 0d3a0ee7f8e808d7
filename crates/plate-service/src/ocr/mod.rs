pub mod decoder;

pub use decoder::{clean_plate_text, DecodeError, TextDecoder};
