//! Contains array node properties.

use std::fmt;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use error::{Error, Result};


/// Raw little-endian element sequence.
pub const ENCODING_PLAIN: u32 = 0;
/// zlib-deflated element sequence.
pub const ENCODING_ZLIB: u32 = 1;

/// A bulk-valued property attached to a node.
///
/// The payload is kept exactly as it sits on disk (deflated when
/// `encoding == 1`); typed accessors inflate and decode on demand. The type
/// codes are `f`/`d`/`i`/`l`/`b` for arrays of `f32`/`f64`/`i32`/`i64`/bool.
#[derive(Clone, PartialEq)]
pub struct ArrayProperty {
    /// One-byte type code.
    pub type_code: u8,
    /// Number of elements in the array, *NOT byte size*.
    pub array_length: u32,
    /// 0 for plain data, 1 for zlib-deflated data.
    pub encoding: u32,
    /// Byte size of the payload as stored in the stream.
    pub compressed_length: u32,
    /// On-disk payload.
    pub data: Vec<u8>,
}

/// Returns the element byte size for an array type code.
pub fn element_len(type_code: u8) -> Option<u64> {
    match type_code {
        b'f' | b'i' => Some(4),
        b'd' | b'l' => Some(8),
        b'b' => Some(1),
        _ => None,
    }
}

macro_rules! implement_array_ctor {
    ($t:ty, $ctor:ident, $ctor_compressed:ident, $code:expr, $write_fun:ident) => (
        impl ArrayProperty {
            /// Creates an uncompressed array property from the given slice.
            pub fn $ctor(values: &[$t]) -> Self {
                let mut data =
                    Vec::<u8>::with_capacity(values.len() * ::std::mem::size_of::<$t>());
                for &v in values {
                    data.$write_fun::<LittleEndian>(v)
                        .expect("writing to a Vec cannot fail");
                }
                ArrayProperty::from_plain_payload($code, values.len() as u32, data)
            }

            /// Creates a zlib-compressed array property from the given slice.
            pub fn $ctor_compressed(values: &[$t]) -> Result<Self> {
                ArrayProperty::$ctor(values).into_compressed()
            }
        }
    )
}

implement_array_ctor!(f32, new_f32_slice, new_f32_slice_compressed, b'f', write_f32);
implement_array_ctor!(f64, new_f64_slice, new_f64_slice_compressed, b'd', write_f64);
implement_array_ctor!(i32, new_i32_slice, new_i32_slice_compressed, b'i', write_i32);
implement_array_ctor!(i64, new_i64_slice, new_i64_slice_compressed, b'l', write_i64);

macro_rules! implement_array_getter {
    ($t:ty, $getter:ident, $code:expr, $expected:expr, $read_fun:ident) => (
        impl ArrayProperty {
            /// Decodes the payload, inflating it first when it is compressed.
            pub fn $getter(&self) -> Result<Vec<$t>> {
                self.check_code($code, $expected)?;
                self.decode_elements(|reader| reader.$read_fun::<LittleEndian>())
            }
        }
    )
}

implement_array_getter!(f32, as_f32_slice, b'f', "f32 array ('f')", read_f32);
implement_array_getter!(f64, as_f64_slice, b'd', "f64 array ('d')", read_f64);
implement_array_getter!(i32, as_i32_slice, b'i', "i32 array ('i')", read_i32);
implement_array_getter!(i64, as_i64_slice, b'l', "i64 array ('l')", read_i64);

impl ArrayProperty {
    /// Creates an uncompressed boolean array property.
    ///
    /// Elements are stored as one byte each; readers look at the lowest bit.
    pub fn new_bool_slice(values: &[bool]) -> Self {
        let data = values.iter().map(|&v| v as u8).collect::<Vec<_>>();
        ArrayProperty::from_plain_payload(b'b', values.len() as u32, data)
    }

    /// Creates a zlib-compressed boolean array property.
    pub fn new_bool_slice_compressed(values: &[bool]) -> Result<Self> {
        ArrayProperty::new_bool_slice(values).into_compressed()
    }

    /// Decodes the payload as booleans.
    pub fn as_bool_slice(&self) -> Result<Vec<bool>> {
        self.check_code(b'b', "bool array ('b')")?;
        // Don't check whether the values are 'T's and 'Y's.
        self.decode_elements(|reader| reader.read_u8().map(|b| b & 1 == 1))
    }

    /// Returns the on-disk byte size of this property, type code and array
    /// header included.
    pub fn size(&self) -> u64 {
        13 + self.data.len() as u64
    }

    /// Writes the property in on-disk form.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_u8(self.type_code)?;
        sink.write_u32::<LittleEndian>(self.array_length)?;
        sink.write_u32::<LittleEndian>(self.encoding)?;
        sink.write_u32::<LittleEndian>(self.compressed_length)?;
        sink.write_all(&self.data)?;
        Ok(())
    }

    fn from_plain_payload(type_code: u8, array_length: u32, data: Vec<u8>) -> Self {
        ArrayProperty {
            type_code: type_code,
            array_length: array_length,
            encoding: ENCODING_PLAIN,
            compressed_length: data.len() as u32,
            data: data,
        }
    }

    fn into_compressed(self) -> Result<Self> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.data)?;
        let deflated = encoder.finish()?;
        Ok(ArrayProperty {
            type_code: self.type_code,
            array_length: self.array_length,
            encoding: ENCODING_ZLIB,
            compressed_length: deflated.len() as u32,
            data: deflated,
        })
    }

    fn decode_elements<T, F>(&self, mut read_one: F) -> Result<Vec<T>>
        where F: FnMut(&mut dyn Read) -> ::std::io::Result<T>
    {
        match self.encoding {
            ENCODING_PLAIN => self.read_all_elements(&mut &self.data[..], &mut read_one),
            ENCODING_ZLIB => {
                self.read_all_elements(&mut ZlibDecoder::new(&self.data[..]), &mut read_one)
            },
            encoding => Err(Error::corrupt(0,
                                           format!("unknown array property encoding {}",
                                                   encoding))),
        }
    }

    fn read_all_elements<T, R, F>(&self, reader: &mut R, read_one: &mut F) -> Result<Vec<T>>
        where R: Read,
              F: FnMut(&mut dyn Read) -> ::std::io::Result<T>
    {
        let mut values = Vec::with_capacity(self.array_length as usize);
        for _ in 0..self.array_length {
            let v = read_one(&mut *reader).map_err(|err| {
                Error::corrupt(0,
                               format!("array property data too short for {} elements: {}",
                                       self.array_length,
                                       err))
            })?;
            values.push(v);
        }
        Ok(values)
    }

    fn check_code(&self, code: u8, expected: &'static str) -> Result<()> {
        if self.type_code == code {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: expected,
                actual: self.type_code,
            })
        }
    }
}

impl fmt::Debug for ArrayProperty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ArrayProperty")
            .field("type_code", &(self.type_code as char))
            .field("array_length", &self.array_length)
            .field("encoding", &self.encoding)
            .field("compressed_length", &self.compressed_length)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use error::Error;
    use super::*;

    #[test]
    fn i32_slice_roundtrip() {
        let data = [666, 420, 69, 2020];
        let prop = ArrayProperty::new_i32_slice(&data);
        assert_eq!(prop.type_code, b'i');
        assert_eq!(prop.array_length, 4);
        assert_eq!(prop.encoding, ENCODING_PLAIN);
        assert_eq!(prop.as_i32_slice().unwrap(), data);
    }

    #[test]
    fn f64_compressed_roundtrip() {
        let data = [6.66, 42.0, 6.9, 20.20];
        let prop = ArrayProperty::new_f64_slice_compressed(&data).unwrap();
        assert_eq!(prop.encoding, ENCODING_ZLIB);
        assert_eq!(prop.compressed_length as usize, prop.data.len());
        assert_eq!(prop.as_f64_slice().unwrap(), data);
    }

    #[test]
    fn bool_slice_roundtrip() {
        let data = [true, false, true, true];
        assert_eq!(ArrayProperty::new_bool_slice(&data).as_bool_slice().unwrap(),
                   data);
        let compressed = ArrayProperty::new_bool_slice_compressed(&data).unwrap();
        assert_eq!(compressed.as_bool_slice().unwrap(), data);
    }

    #[test]
    fn foreign_type_code_is_mismatch() {
        let prop = ArrayProperty::new_i32_slice(&[1, 2, 3]);
        match prop.as_f64_slice() {
            Err(Error::TypeMismatch { actual: b'i', .. }) => {},
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn truncated_compressed_payload_is_corrupt() {
        let mut prop = ArrayProperty::new_f64_slice_compressed(&[6.66, 42.0, 6.9, 20.20]).unwrap();
        // Drop the tail of the deflate stream.
        prop.data.truncate(prop.data.len() / 2);
        prop.compressed_length = prop.data.len() as u32;
        match prop.as_f64_slice() {
            Err(Error::Corrupt { .. }) => {},
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn unknown_encoding_is_corrupt() {
        let mut prop = ArrayProperty::new_i64_slice(&[1, 2]);
        prop.encoding = 9;
        match prop.as_i64_slice() {
            Err(Error::Corrupt { .. }) => {},
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn on_disk_size() {
        let prop = ArrayProperty::new_i32_slice(&[1, 2, 3]);
        // 1 (code) + 12 (array header) + 12 (payload).
        assert_eq!(prop.size(), 25);
        assert_eq!(prop.size(), 13 + prop.data.len() as u64);
    }
}
