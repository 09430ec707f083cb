use std::{
    fmt::Display,
    io::{self, Read},
};

pub fn read_u8(source: &mut &[u8]) -> io::Result<u8> {
    let mut buffer = [0];
    source.read_exact(&mut buffer)?;
    Ok(buffer[0])
}

pub fn read_u32(source: &mut &[u8]) -> io::Result<u32> {
    let mut buffer = [0; 4];
    source.read_exact(&mut buffer)?;
    Ok(u32::from_be_bytes(buffer))
}

pub fn read_i32(source: &mut &[u8]) -> io::Result<i32> {
    let mut buffer = [0; 4];
    source.read_exact(&mut buffer)?;
    Ok(i32::from_be_bytes(buffer))
}

pub fn read_i64(source: &mut &[u8]) -> io::Result<i64> {
    let mut buffer = [0; 8];
    source.read_exact(&mut buffer)?;
    Ok(i64::from_be_bytes(buffer))
}

pub fn read_f32(source: &mut &[u8]) -> io::Result<f32> {
    let mut buffer = [0; 4];
    source.read_exact(&mut buffer)?;
    Ok(f32::from_be_bytes(buffer))
}

pub fn write_u8(result: &mut Vec<u8>, num: u8) {
    result.push(num)
}

pub fn write_u32(result: &mut Vec<u8>, num: u32) {
    result.extend(num.to_be_bytes())
}

pub fn write_i32(result: &mut Vec<u8>, num: i32) {
    result.extend(num.to_be_bytes())
}

pub fn write_i64(result: &mut Vec<u8>, num: i64) {
    result.extend(num.to_be_bytes())
}

pub fn write_f32(result: &mut Vec<u8>, num: f32) {
    result.extend(num.to_be_bytes())
}

#[derive(Debug)]
enum ErrorKind {
    NotEnoughBytes,
    BadShape,
    BadEnumTag(u32),
}

/// Error raised while decoding a persisted model stream.
#[derive(Debug)]
pub struct StreamDeserError {
    kind: ErrorKind,
}

impl StreamDeserError {
    pub fn bad_shape() -> Self {
        Self { kind: ErrorKind::BadShape }
    }

    pub fn bad_enum_tag(tag: u32) -> Self {
        Self { kind: ErrorKind::BadEnumTag(tag) }
    }
}

impl Display for StreamDeserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

impl From<io::Error> for StreamDeserError {
    fn from(_: io::Error) -> Self {
        Self { kind: ErrorKind::NotEnoughBytes }
    }
}

impl std::error::Error for StreamDeserError {}

pub type DeserResult<T> = std::result::Result<T, StreamDeserError>;
