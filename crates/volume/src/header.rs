//! Container header codec.
//!
//! # Layout
//!
//! ```text
//! [4 bytes: magic "PRCL"]
//! [1 byte: format version]
//! [1 byte: method, 0x00 = store]
//! [2 bytes BE: name_len]
//! [name_len bytes: entry name UTF-8]
//! [8 bytes BE: payload_len]
//! [4 bytes BE: CRC-32 of payload]
//! [payload_len bytes: raw payload]
//! ```

use std::io::{Read, Write};

use crate::VolumeError;

/// Container magic bytes.
pub const MAGIC: [u8; 4] = *b"PRCL";

/// Current container format version.
pub const VERSION: u8 = 1;

/// Store method: payload bytes are copied verbatim.
pub const METHOD_STORE: u8 = 0x00;

/// Header length without the entry name.
pub const HEADER_FIXED_LEN: usize = 4 + 1 + 1 + 2 + 8 + 4;

/// Header describing the single entry held by a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Logical file name of the entry.
    pub name: String,
    /// Payload length in bytes.
    pub payload_len: u64,
    /// CRC-32 of the payload.
    pub crc32: u32,
}

impl ContainerHeader {
    /// Builds the header for `payload` stored under `name`.
    pub fn for_payload(name: &str, payload: &[u8]) -> Result<Self, VolumeError> {
        if name.len() > u16::MAX as usize {
            return Err(VolumeError::NameTooLong(name.len()));
        }
        Ok(Self {
            name: name.to_string(),
            payload_len: payload.len() as u64,
            crc32: crc32fast::hash(payload),
        })
    }

    /// Number of bytes the encoded header occupies.
    pub fn encoded_len(&self) -> usize {
        HEADER_FIXED_LEN + self.name.len()
    }

    /// Writes the encoded header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VolumeError> {
        let name = self.name.as_bytes();
        if name.len() > u16::MAX as usize {
            return Err(VolumeError::NameTooLong(name.len()));
        }

        writer.write_all(&MAGIC)?;
        writer.write_all(&[VERSION, METHOD_STORE])?;
        writer.write_all(&(name.len() as u16).to_be_bytes())?;
        writer.write_all(name)?;
        writer.write_all(&self.payload_len.to_be_bytes())?;
        writer.write_all(&self.crc32.to_be_bytes())?;
        Ok(())
    }

    /// Reads and validates an encoded header.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VolumeError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(VolumeError::Corrupt("bad magic".into()));
        }

        let mut version_method = [0u8; 2];
        reader.read_exact(&mut version_method)?;
        if version_method[0] != VERSION {
            return Err(VolumeError::Corrupt(format!(
                "unsupported version {}",
                version_method[0]
            )));
        }
        if version_method[1] != METHOD_STORE {
            return Err(VolumeError::Corrupt(format!(
                "unsupported method {:#04x}",
                version_method[1]
            )));
        }

        let mut name_len = [0u8; 2];
        reader.read_exact(&mut name_len)?;
        let mut name = vec![0u8; u16::from_be_bytes(name_len) as usize];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|e| VolumeError::Corrupt(format!("invalid UTF-8 name: {e}")))?;

        let mut payload_len = [0u8; 8];
        reader.read_exact(&mut payload_len)?;
        let mut crc32 = [0u8; 4];
        reader.read_exact(&mut crc32)?;

        Ok(Self {
            name,
            payload_len: u64::from_be_bytes(payload_len),
            crc32: u32::from_be_bytes(crc32),
        })
    }
}
