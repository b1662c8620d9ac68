use alloc::{string::String, vec::Vec};
use core::{
    any::type_name,
    ops::{Add, Rem, Sub},
};

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::ReadError;

/// Read a value from the start of the given bytes.
pub fn read<T: FromBytes + Copy>(data: &[u8]) -> Result<T, ReadError> { read_at(data, 0) }

/// Read a value at the given offset, failing if it does not fit into the bytes.
pub fn read_at<T: FromBytes + Copy>(data: &[u8], offset: usize) -> Result<T, ReadError> {
    data.get(offset..)
        .and_then(|data| T::read_from_prefix(data).ok())
        .map(|(value, _)| value)
        .ok_or(ReadError {
            type_name: type_name::<T>(),
            offset,
        })
}

/// Borrow `length` bytes at the given offset, failing if the range is out of bounds.
pub fn slice_at(data: &[u8], offset: usize, length: usize) -> Result<&[u8], ReadError> {
    offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
        .ok_or(ReadError {
            type_name: "[u8]",
            offset,
        })
}

pub fn aligned_to<T: Add<Output = T> + Sub<Output = T> + Rem<Output = T> + Eq + Copy + Default>(
    value: T, alignment: T,
) -> T {
    if alignment == T::default() || value % alignment == T::default() {
        return value;
    }
    value + alignment - (value % alignment)
}

pub fn string_to_u16<S: AsRef<str>>(string: S) -> Vec<u8> {
    let string = string.as_ref();
    let mut data = Vec::with_capacity(string.len() * 2 + 2);
    data.extend(string.encode_utf16().flat_map(|c| c.to_le_bytes()));
    data.extend([0, 0]);
    data
}

pub fn u16_to_string(units: &[u16]) -> String { String::from_utf16_lossy(units) }

/// Positioned, bounds-checked reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data:     &'a [u8],
    position: usize,
}
impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self { Self { data, position: 0 } }

    pub fn position(&self) -> usize { self.position }

    pub fn remaining(&self) -> usize { self.data.len().saturating_sub(self.position) }

    pub fn seek(&mut self, position: usize) { self.position = position; }

    pub fn align(&mut self, alignment: usize) {
        self.position = aligned_to(self.position, alignment);
    }

    pub fn read<T: FromBytes + Copy>(&mut self) -> Result<T, ReadError> {
        let value = read_at::<T>(self.data, self.position)?;
        self.position += core::mem::size_of::<T>();
        Ok(value)
    }

    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8], ReadError> {
        let data = slice_at(self.data, self.position, length)?;
        self.position += length;
        Ok(data)
    }

    /// Read a zero-terminated UTF-16 string, consuming the terminator.
    /// Stops at the end of the data if no terminator is present.
    pub fn read_u16_string(&mut self) -> Result<String, ReadError> {
        let mut units = Vec::new();
        while self.remaining() >= 2 {
            let unit = self.read::<u16>()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(u16_to_string(&units))
    }
}

/// Append-only little endian writer with patchable placeholders.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    data: Vec<u8>,
}
impl ByteWriter {
    pub fn new() -> Self { Self::default() }

    pub fn position(&self) -> usize { self.data.len() }

    pub fn write<T: IntoBytes + Immutable + ?Sized>(&mut self, value: &T) {
        self.data.extend_from_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) { self.data.extend_from_slice(data); }

    pub fn write_u16(&mut self, value: u16) { self.write_bytes(&value.to_le_bytes()); }

    pub fn write_u16_string(&mut self, string: &str) { self.write_bytes(&string_to_u16(string)); }

    pub fn align(&mut self, alignment: usize) {
        let padding = aligned_to(self.position(), alignment) - self.position();
        self.data.resize(self.data.len() + padding, 0);
    }

    pub fn reserve_u16(&mut self) -> usize {
        let position = self.position();
        self.write_u16(0);
        position
    }

    pub fn patch_u16(&mut self, position: usize, value: u16) {
        self.data[position..position + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn into_inner(self) -> Vec<u8> { self.data }
}
