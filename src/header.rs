//! Contains the FBX file header.

use std::fmt;
use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use error::{Error, Result};


/// Magic binary at the head of every binary FBX file.
pub const MAGIC: &[u8; 21] = b"Kaydara FBX Binary  \0";

/// Byte length of the file header.
pub const HEADER_LEN: u64 = 27;

/// Version used by node constructors when no source file dictates one.
pub const DEFAULT_VERSION: u32 = 7500;

/// Returns the byte length of a node record header for the given FBX version.
///
/// Versions since 7.5 use 64-bit size fields (3 * 8 + 1), older versions use
/// 32-bit fields (3 * 4 + 1). This is also the length of a null record.
pub fn node_header_len(version: u32) -> u64 {
    if version >= 7500 {
        25
    } else {
        13
    }
}

/// The 27-byte binary FBX file header, kept verbatim.
///
/// Bytes 0..21 are the magic, bytes 21..23 are reserved (all observed files
/// show `[0x1A, 0x00]`), bytes 23..27 are the little-endian version.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FbxHeader {
    data: [u8; 27],
}

impl FbxHeader {
    /// Creates a header for the given FBX version.
    pub fn new(version: u32) -> Self {
        let mut data = [0_u8; 27];
        data[0..21].copy_from_slice(MAGIC);
        data[21] = 0x1a;
        data[22] = 0x00;
        LittleEndian::write_u32(&mut data[23..27], version);
        FbxHeader { data: data }
    }

    /// Reads a header from the given stream and validates the magic.
    pub fn read_from<R: Read>(source: &mut R) -> Result<Self> {
        let mut data = [0_u8; 27];
        source
            .read_exact(&mut data)
            .map_err(|err| match err.kind() {
                ::std::io::ErrorKind::UnexpectedEof => {
                    Error::corrupt(0, "file shorter than the 27-byte header")
                },
                _ => Error::Io(err),
            })?;
        if &data[0..21] != &MAGIC[..] {
            return Err(Error::corrupt(0, "invalid magic: non-FBX or corrupted data"));
        }
        if data[21..23] != [0x1a, 0x00] {
            // Unknown but all observed files show these bytes,
            // see https://code.blender.org/2013/08/fbx-binary-file-format-specification/ .
            warn!("Expected [26, 0] right after magic binary, but got {:?}",
                  &data[21..23]);
        }
        Ok(FbxHeader { data: data })
    }

    /// Returns the FBX version of the file.
    ///
    /// For FBX x.y, the value will be _x * 1000 + y * 100_.
    pub fn version(&self) -> u32 {
        LittleEndian::read_u32(&self.data[23..27])
    }

    /// Returns the byte length of node record headers under this version.
    pub fn node_header_len(&self) -> u64 {
        node_header_len(self.version())
    }

    /// Returns the raw header bytes.
    pub fn bytes(&self) -> &[u8; 27] {
        &self.data
    }

    /// Writes the header verbatim.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&self.data)?;
        Ok(())
    }
}

impl fmt::Debug for FbxHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FbxHeader")
            .field("version", &self.version())
            .finish()
    }
}
