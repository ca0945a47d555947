//! The fixed 512-byte record that precedes every blob in an md1img container.
//!
//! # Layout
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0x000  | 4    | `magic1`       |
//! | 0x004  | 4    | `data_size`    |
//! | 0x008  | 32   | `name`         |
//! | 0x028  | 4    | `base`         |
//! | 0x02C  | 4    | `mode`         |
//! | 0x030  | 4    | `magic2`       |
//! | 0x034  | 4    | `data_offset`  |
//! | 0x038  | 4    | `hdr_version`  |
//! | 0x03C  | 4    | `img_type`     |
//! | 0x040  | 4    | `img_list_end` |
//! | 0x044  | 4    | `align_size`   |
//! | 0x048  | 4    | `dsize_extend` |
//! | 0x04C  | 4    | `maddr_extend` |
//! | 0x050  | 432  | `reserved`     |
//!
//! Every integer is little-endian.  The record is decoded field by field
//! from the offsets below, never by casting the buffer.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{Md1Error, Result};

pub const MD1IMG_MAGIC1: u32 = 0x5888_1688;
pub const MD1IMG_MAGIC2: u32 = 0x5889_1689;

pub const HEADER_SIZE:   usize = 512;
pub const NAME_LEN:      usize = 32;
pub const RESERVED_LEN:  usize = 432;

const OFF_MAGIC1:       usize = 0x000;
const OFF_DATA_SIZE:    usize = 0x004;
const OFF_NAME:         usize = 0x008;
const OFF_BASE:         usize = 0x028;
const OFF_MODE:         usize = 0x02C;
const OFF_MAGIC2:       usize = 0x030;
const OFF_DATA_OFFSET:  usize = 0x034;
const OFF_HDR_VERSION:  usize = 0x038;
const OFF_IMG_TYPE:     usize = 0x03C;
const OFF_IMG_LIST_END: usize = 0x040;
const OFF_ALIGN_SIZE:   usize = 0x044;
const OFF_DSIZE_EXTEND: usize = 0x048;
const OFF_MADDR_EXTEND: usize = 0x04C;
const OFF_RESERVED:     usize = 0x050;

const _: () = assert!(OFF_RESERVED + RESERVED_LEN == HEADER_SIZE);

#[derive(Clone, PartialEq, Eq)]
pub struct Md1Header {
    pub magic1:       u32,
    pub data_size:    u32,
    pub name:         [u8; NAME_LEN],
    pub base:         u32,
    pub mode:         u32,
    pub magic2:       u32,
    pub data_offset:  u32,
    pub hdr_version:  u32,
    pub img_type:     u32,
    pub img_list_end: u32,
    pub align_size:   u32,
    pub dsize_extend: u32,
    pub maddr_extend: u32,
    pub reserved:     [u8; RESERVED_LEN],
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    LittleEndian::read_u32(&buf[off..off + 4])
}

fn write_u32(buf: &mut [u8], off: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[off..off + 4], value);
}

impl Md1Header {
    /// Build a header for a new blob: both magics set, payload directly
    /// after the header, extension fields zeroed, reserved area 0xFF.
    ///
    /// Names longer than 31 bytes are truncated so the field always keeps a
    /// terminating NUL.
    pub fn create(name: &str, data_size: u32, base: u32) -> Self {
        let mut name_field = [0u8; NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LEN - 1);
        name_field[..len].copy_from_slice(&bytes[..len]);

        Self {
            magic1:       MD1IMG_MAGIC1,
            data_size,
            name:         name_field,
            base,
            mode:         0,
            magic2:       MD1IMG_MAGIC2,
            data_offset:  HEADER_SIZE as u32,
            hdr_version:  0,
            img_type:     0,
            img_list_end: 0,
            align_size:   0,
            dsize_extend: 0,
            maddr_extend: 0,
            reserved:     [0xFF; RESERVED_LEN],
        }
    }

    /// Decode a header from the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Md1Error::HeaderInvalid(format!(
                "Header data too small: {} bytes", buf.len()
            )));
        }
        let buf = &buf[..HEADER_SIZE];

        let magic1 = read_u32(buf, OFF_MAGIC1);
        let magic2 = read_u32(buf, OFF_MAGIC2);
        if magic1 != MD1IMG_MAGIC1 || magic2 != MD1IMG_MAGIC2 {
            return Err(Md1Error::HeaderInvalid(format!(
                "Invalid magic numbers in header: {magic1:#010x}/{magic2:#010x}"
            )));
        }

        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&buf[OFF_NAME..OFF_NAME + NAME_LEN]);
        let mut reserved = [0u8; RESERVED_LEN];
        reserved.copy_from_slice(&buf[OFF_RESERVED..]);

        Ok(Self {
            magic1,
            data_size:    read_u32(buf, OFF_DATA_SIZE),
            name,
            base:         read_u32(buf, OFF_BASE),
            mode:         read_u32(buf, OFF_MODE),
            magic2,
            data_offset:  read_u32(buf, OFF_DATA_OFFSET),
            hdr_version:  read_u32(buf, OFF_HDR_VERSION),
            img_type:     read_u32(buf, OFF_IMG_TYPE),
            img_list_end: read_u32(buf, OFF_IMG_LIST_END),
            align_size:   read_u32(buf, OFF_ALIGN_SIZE),
            dsize_extend: read_u32(buf, OFF_DSIZE_EXTEND),
            maddr_extend: read_u32(buf, OFF_MADDR_EXTEND),
            reserved,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        write_u32(&mut buf, OFF_MAGIC1, self.magic1);
        write_u32(&mut buf, OFF_DATA_SIZE, self.data_size);
        buf[OFF_NAME..OFF_NAME + NAME_LEN].copy_from_slice(&self.name);
        write_u32(&mut buf, OFF_BASE, self.base);
        write_u32(&mut buf, OFF_MODE, self.mode);
        write_u32(&mut buf, OFF_MAGIC2, self.magic2);
        write_u32(&mut buf, OFF_DATA_OFFSET, self.data_offset);
        write_u32(&mut buf, OFF_HDR_VERSION, self.hdr_version);
        write_u32(&mut buf, OFF_IMG_TYPE, self.img_type);
        write_u32(&mut buf, OFF_IMG_LIST_END, self.img_list_end);
        write_u32(&mut buf, OFF_ALIGN_SIZE, self.align_size);
        write_u32(&mut buf, OFF_DSIZE_EXTEND, self.dsize_extend);
        write_u32(&mut buf, OFF_MADDR_EXTEND, self.maddr_extend);
        buf[OFF_RESERVED..].copy_from_slice(&self.reserved);
        buf
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| {
            Md1Error::HeaderInvalid(format!("Header data too small: {e}"))
        })?;
        Self::from_bytes(&buf)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// The `name` field up to the first NUL, with invalid UTF-8 dropped.
    pub fn display_name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&self.name[..end])
            .chars()
            .filter(|&c| c != char::REPLACEMENT_CHARACTER)
            .collect()
    }

    /// Every field except `name`, in on-disk order, rendered the way the
    /// `meta_info` sidecar stores them: `0x%08x`, except `data_size` which
    /// stays decimal.
    pub fn meta_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("magic1",       hex32(self.magic1)),
            ("data_size",    self.data_size.to_string()),
            ("base",         hex32(self.base)),
            ("mode",         hex32(self.mode)),
            ("magic2",       hex32(self.magic2)),
            ("data_offset",  hex32(self.data_offset)),
            ("hdr_version",  hex32(self.hdr_version)),
            ("img_type",     hex32(self.img_type)),
            ("img_list_end", hex32(self.img_list_end)),
            ("align_size",   hex32(self.align_size)),
            ("dsize_extend", hex32(self.dsize_extend)),
            ("maddr_extend", hex32(self.maddr_extend)),
        ]
    }

    pub fn field_mut(&mut self, field: HeaderField) -> &mut u32 {
        match field {
            HeaderField::Base        => &mut self.base,
            HeaderField::Mode        => &mut self.mode,
            HeaderField::HdrVersion  => &mut self.hdr_version,
            HeaderField::ImgType     => &mut self.img_type,
            HeaderField::ImgListEnd  => &mut self.img_list_end,
            HeaderField::AlignSize   => &mut self.align_size,
            HeaderField::DsizeExtend => &mut self.dsize_extend,
            HeaderField::MaddrExtend => &mut self.maddr_extend,
        }
    }
}

fn hex32(v: u32) -> String {
    format!("0x{v:08x}")
}

impl fmt::Debug for Md1Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Md1Header")
            .field("name", &self.display_name())
            .field("data_size", &self.data_size)
            .field("base", &format_args!("{:#010x}", self.base))
            .field("mode", &format_args!("{:#010x}", self.mode))
            .field("data_offset", &self.data_offset)
            .field("hdr_version", &self.hdr_version)
            .field("img_type", &self.img_type)
            .field("img_list_end", &self.img_list_end)
            .field("align_size", &self.align_size)
            .field("dsize_extend", &self.dsize_extend)
            .field("maddr_extend", &self.maddr_extend)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Md1Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = self.meta_fields();
        fields.insert(2, ("name", self.display_name()));
        for (i, (key, value)) in fields.iter().enumerate() {
            if i > 0 { writeln!(f)?; }
            write!(f, "{key:<15}: {value}")?;
        }
        Ok(())
    }
}

// ── Overridable fields ────────────────────────────────────────────────────────

/// Header fields a `meta_info` block may override when repacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    Base,
    Mode,
    HdrVersion,
    ImgType,
    ImgListEnd,
    AlignSize,
    DsizeExtend,
    MaddrExtend,
}

impl HeaderField {
    pub const ALL: [HeaderField; 8] = [
        HeaderField::Base,
        HeaderField::Mode,
        HeaderField::HdrVersion,
        HeaderField::ImgType,
        HeaderField::ImgListEnd,
        HeaderField::AlignSize,
        HeaderField::DsizeExtend,
        HeaderField::MaddrExtend,
    ];

    pub fn key(self) -> &'static str {
        match self {
            HeaderField::Base        => "base",
            HeaderField::Mode        => "mode",
            HeaderField::HdrVersion  => "hdr_version",
            HeaderField::ImgType     => "img_type",
            HeaderField::ImgListEnd  => "img_list_end",
            HeaderField::AlignSize   => "align_size",
            HeaderField::DsizeExtend => "dsize_extend",
            HeaderField::MaddrExtend => "maddr_extend",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn create_sets_defaults() {
        let h = Md1Header::create("md1rom", 1234, 0x40);
        let raw = h.to_bytes();
        assert_eq!(raw.len(), HEADER_SIZE);
        assert_eq!(&raw[0..4], &MD1IMG_MAGIC1.to_le_bytes());
        assert_eq!(&raw[48..52], &MD1IMG_MAGIC2.to_le_bytes());
        assert_eq!(h.data_offset, 512);
        assert_eq!(h.base, 0x40);
        assert!(raw[OFF_RESERVED..].iter().all(|&b| b == 0xFF));
        assert_eq!(h.display_name(), "md1rom");
    }

    #[test]
    fn long_name_is_truncated_to_31_bytes() {
        let long = "x".repeat(40);
        let h = Md1Header::create(&long, 0, 0);
        assert_eq!(h.display_name().len(), 31);
        assert_eq!(h.name[31], 0);
    }

    #[test]
    fn corrupted_magic2_is_rejected() {
        let mut raw = Md1Header::create("a", 1, 0).to_bytes();
        raw[OFF_MAGIC2] ^= 0xFF;
        assert!(matches!(Md1Header::from_bytes(&raw), Err(Md1Error::HeaderInvalid(_))));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let raw = Md1Header::create("a", 1, 0).to_bytes();
        assert!(matches!(
            Md1Header::from_bytes(&raw[..HEADER_SIZE - 1]),
            Err(Md1Error::HeaderInvalid(_))
        ));
        assert!(matches!(Md1Header::read(&raw[..100]), Err(Md1Error::HeaderInvalid(_))));
    }

    #[test]
    fn meta_fields_use_hex_except_data_size() {
        let h = Md1Header::create("dsp", 4096, 0x1000);
        let fields = h.meta_fields();
        assert_eq!(fields[0], ("magic1", "0x58881688".to_string()));
        assert_eq!(fields[1], ("data_size", "4096".to_string()));
        assert_eq!(fields[2], ("base", "0x00001000".to_string()));
        assert!(fields.iter().all(|(k, _)| *k != "name"));
    }

    proptest! {
        #[test]
        fn decode_preserves_every_field(
            data_size in any::<u32>(),
            base in any::<u32>(),
            mode in any::<u32>(),
            ext in prop::array::uniform6(any::<u32>()),
            name in "[a-z0-9_.]{0,40}",
        ) {
            let mut h = Md1Header::create(&name, data_size, base);
            h.mode = mode;
            for (field, value) in HeaderField::ALL[2..].iter().zip(ext) {
                *h.field_mut(*field) = value;
            }
            let decoded = Md1Header::from_bytes(&h.to_bytes()).unwrap();
            prop_assert_eq!(&decoded, &h);
            prop_assert!(name.starts_with(&decoded.display_name()));
        }
    }
}
