pub mod byte_utils;
pub mod serialization;
