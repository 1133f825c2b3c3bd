//! Contains scalar node properties.

use std::fmt;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use error::{Error, Result};


/// A scalar property attached to a node.
///
/// The payload is kept as the on-disk little-endian bytes; accessors decode
/// on demand and fail with [`Error::TypeMismatch`] when the stored type code
/// does not fit the request. The type codes are:
///
/// | Code | Type                  |
/// |:-----|:----------------------|
/// | `Y`  | `i16`                 |
/// | `C`  | `i8` / boolean        |
/// | `I`  | `i32`                 |
/// | `F`  | `f32`                 |
/// | `D`  | `f64`                 |
/// | `L`  | `i64`                 |
/// | `S`  | length-prefixed UTF-8 |
/// | `R`  | length-prefixed bytes |
#[derive(Clone, PartialEq)]
pub struct Property {
    /// One-byte type code.
    pub type_code: u8,
    /// On-disk payload, without the type code and without the `S`/`R` length
    /// prefix.
    pub data: Vec<u8>,
}

macro_rules! implement_scalar_ctor {
    ($t:ty, $ctor:ident, $code:expr, $write_fun:ident, $size:expr) => (
        impl Property {
            /// Creates a property holding the given value.
            pub fn $ctor(value: $t) -> Self {
                let mut data = vec![0_u8; $size];
                LittleEndian::$write_fun(&mut data, value);
                Property {
                    type_code: $code,
                    data: data,
                }
            }
        }
    )
}

implement_scalar_ctor!(i16, new_i16, b'Y', write_i16, 2);
implement_scalar_ctor!(i32, new_i32, b'I', write_i32, 4);
implement_scalar_ctor!(i64, new_i64, b'L', write_i64, 8);
implement_scalar_ctor!(f32, new_f32, b'F', write_f32, 4);
implement_scalar_ctor!(f64, new_f64, b'D', write_f64, 8);

macro_rules! implement_scalar_getter {
    ($t:ty, $getter:ident, $code:expr, $expected:expr, $read_fun:ident, $size:expr) => (
        impl Property {
            /// Decodes the payload, failing on a foreign type code or a short
            /// payload.
            pub fn $getter(&self) -> Result<$t> {
                self.check_code($code, $expected)?;
                if self.data.len() < $size {
                    return Err(Error::corrupt(0, format!("scalar property payload too short for {}",
                                                         $expected)));
                }
                Ok(LittleEndian::$read_fun(&self.data))
            }
        }
    )
}

implement_scalar_getter!(i16, as_i16, b'Y', "i16 ('Y')", read_i16, 2);
implement_scalar_getter!(i32, as_i32, b'I', "i32 ('I')", read_i32, 4);
implement_scalar_getter!(i64, as_i64, b'L', "i64 ('L')", read_i64, 8);
implement_scalar_getter!(f32, as_f32, b'F', "f32 ('F')", read_f32, 4);
implement_scalar_getter!(f64, as_f64, b'D', "f64 ('D')", read_f64, 8);

impl Property {
    /// Creates an `i8` property.
    pub fn new_i8(value: i8) -> Self {
        Property {
            type_code: b'C',
            data: vec![value as u8],
        }
    }

    /// Creates a boolean property.
    ///
    /// Encoded as `'Y'` for true and `'T'` for false, the values official
    /// exporters emit; readers look at the lowest bit only.
    pub fn new_bool(value: bool) -> Self {
        Property {
            type_code: b'C',
            data: vec![if value { b'Y' } else { b'T' }],
        }
    }

    /// Creates a string property.
    pub fn new_string<S: Into<String>>(value: S) -> Self {
        Property {
            type_code: b'S',
            data: value.into().into_bytes(),
        }
    }

    /// Creates a raw binary property.
    pub fn new_bytes<B: Into<Vec<u8>>>(value: B) -> Self {
        Property {
            type_code: b'R',
            data: value.into(),
        }
    }

    /// Decodes the payload as `i8`.
    pub fn as_i8(&self) -> Result<i8> {
        self.check_code(b'C', "i8 ('C')")?;
        match self.data.first() {
            Some(&b) => Ok(b as i8),
            None => Err(Error::corrupt(0, "empty 'C' property payload")),
        }
    }

    /// Decodes the payload as a boolean.
    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.as_i8()? & 1 == 1)
    }

    /// Decodes the payload as UTF-8 text.
    pub fn as_string(&self) -> Result<&str> {
        self.check_code(b'S', "string ('S')")?;
        ::std::str::from_utf8(&self.data)
            .map_err(|err| Error::corrupt(0, format!("string property is not UTF-8: {}", err)))
    }

    /// Returns the raw payload of an `R` property.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.check_code(b'R', "raw ('R')")?;
        Ok(&self.data)
    }

    /// Returns the on-disk byte size of this property, type code included.
    pub fn size(&self) -> u64 {
        let prefix = match self.type_code {
            b'S' | b'R' => 4,
            _ => 0,
        };
        1 + prefix + self.data.len() as u64
    }

    /// Writes the property in on-disk form.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_u8(self.type_code)?;
        if let b'S' | b'R' = self.type_code {
            sink.write_u32::<LittleEndian>(self.data.len() as u32)?;
        }
        sink.write_all(&self.data)?;
        Ok(())
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

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Property")
            .field("type_code", &(self.type_code as char))
            .field("data_len", &self.data.len())
            .finish()
    }
}
