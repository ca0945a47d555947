pub mod error;
pub mod header;
pub mod codec;
pub mod mapping;
pub mod image;
pub mod unpack;
pub mod pack;
pub mod config;
pub mod backup;

pub use error::{Md1Error, Result};
pub use header::{Md1Header, HeaderField, HEADER_SIZE};
pub use codec::{CompressionFormat, get_codec};
pub use mapping::{FileMapping, MetaInfo};
pub use image::{Md1File, Md1Image};
pub use unpack::{FileInfo, Md1Unpacker};
pub use pack::Md1Packer;
pub use config::{LogLevel, Md1ImgConfig};
