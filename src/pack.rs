//! Build an md1img container from a directory of numbered files.
//!
//! The directory is normally the output of an unpack: `{n}_{name}` payload
//! files plus the optional `meta_info` and `md1_file_map` sidecars.  Files
//! are packed in numeric-prefix order.  For every file:
//!
//! 1. `{n}_` is stripped and the rest looked up in the mapping to find the
//!    internal header name;
//! 2. a `.gz` / `.xz` suffix on the matched mapping key recompresses the
//!    payload (files without a mapping entry use the configured default);
//! 3. a `meta_info` block for the internal name restores the original header
//!    fields, otherwise `base` is assigned sequentially.
//!
//! A non-empty mapping is appended as the final `md1_file_map` entry.

use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::codec::{get_codec, CompressionFormat};
use crate::config::Md1ImgConfig;
use crate::error::{Md1Error, Result};
use crate::header::Md1Header;
use crate::image::{align16, Md1Image, MAP_BLOCK_SIZE, FILE_MAP_MARKER};
use crate::mapping::{FileMapping, MetaInfo, FILE_MAP_NAME, META_INFO_NAME};

/// Leading decimal digits of `name`, or 0 when there are none.
pub fn extract_number(name: &str) -> u64 {
    let digits = name.bytes().take_while(u8::is_ascii_digit).count();
    name[..digits].parse().unwrap_or(0)
}

/// `name` without a leading `{digits}_` prefix.  The remainder must be
/// non-empty for the prefix to be stripped.
pub fn strip_number(name: &str) -> &str {
    let digits = name.bytes().take_while(u8::is_ascii_digit).count();
    match name[digits..].strip_prefix('_') {
        Some(rest) if digits > 0 && !rest.is_empty() => rest,
        _ => name,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

pub struct Md1Packer {
    config:       Md1ImgConfig,
    files:        Vec<PathBuf>,
    file_mapping: FileMapping,
    meta_info:    MetaInfo,
}

impl Md1Packer {
    pub fn new(config: Md1ImgConfig) -> Self {
        info!("Initialized MD1 packer");
        Self {
            config,
            files:        Vec::new(),
            file_mapping: FileMapping::new(),
            meta_info:    MetaInfo::default(),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file_mapping(&self) -> &FileMapping {
        &self.file_mapping
    }

    pub fn meta_info(&self) -> &MetaInfo {
        &self.meta_info
    }

    /// Queue every regular file of `dir` and load its sidecars.
    pub fn add_directory<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Md1Error::IoAccess {
                path:   dir.to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "Not a valid directory"),
            });
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(Md1Error::io_at(dir))? {
            let path = entry.map_err(Md1Error::io_at(dir))?.path();
            if path.is_file() {
                entries.push(path);
            }
        }
        entries.sort();

        for path in &entries {
            let name = file_name_of(path);
            if name.contains(FILE_MAP_NAME) {
                match fs::read_to_string(path) {
                    Ok(text) => {
                        self.file_mapping = FileMapping::parse(&text);
                        info!("Loaded file mapping from {}", path.display());
                    }
                    Err(e) => warn!("Failed to read file mapping: {e}"),
                }
            } else if name == META_INFO_NAME {
                match fs::read_to_string(path) {
                    Ok(text) => {
                        self.meta_info = MetaInfo::parse(&text);
                        info!("Loaded meta_info from {}", path.display());
                    }
                    Err(e) => warn!("Failed to read meta_info: {e}"),
                }
            }
        }

        let before = self.files.len();
        self.files.extend(entries.into_iter().filter(|p| file_name_of(p) != META_INFO_NAME));
        self.files.sort_by_key(|p| extract_number(&file_name_of(p)));

        info!("Added {} files from {}", self.files.len() - before, dir.display());
        Ok(())
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Md1Error::IoAccess {
                path:   path.to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "Not a valid file"),
            });
        }
        self.files.push(path.to_owned());
        info!("Added file: {}", path.display());
        Ok(())
    }

    /// Compression a queued file gets when packed.
    ///
    /// A mapping key matching the file decides (by its `.gz`/`.xz` suffix);
    /// an internal name that some key maps onto decides next; files unknown
    /// to the mapping get the configured default.
    pub fn find_compression_type(&self, file_name: &str) -> Option<CompressionFormat> {
        let stripped = strip_number(file_name);
        let key = match self.file_mapping.resolve(stripped) {
            Some((key, _)) => Some(key),
            None => self.file_mapping.external_for(stripped),
        };
        match key {
            Some(key) => FileMapping::compression_for_key(key),
            None => match self.config.compression_format {
                CompressionFormat::None => None,
                format => Some(format),
            },
        }
    }

    /// Assemble the image in memory without writing it.
    pub fn build_image(&self) -> Result<Md1Image> {
        if self.files.is_empty() {
            return Err(Md1Error::NothingToPack);
        }

        let mut image = Md1Image::new();
        image.file_mapping = self.file_mapping.clone();
        let mut base_address: u64 = 0;

        for path in &self.files {
            let file_name = file_name_of(path);
            if file_name.contains(FILE_MAP_NAME) || file_name == META_INFO_NAME {
                continue;
            }

            let stripped = strip_number(&file_name);
            let mapped_name = self
                .file_mapping
                .resolve(stripped)
                .map_or(stripped, |(_, internal)| internal)
                .to_owned();

            let mut data = fs::read(path).map_err(Md1Error::io_at(path))?;

            if let Some(format) = self.find_compression_type(&file_name) {
                match get_codec(format).compress(&data) {
                    Ok(packed) => {
                        info!("Compressed {file_name} using {format}");
                        data = packed;
                    }
                    Err(e) => warn!("Failed to compress {file_name} with {format}: {e}"),
                }
            }

            let header = if self.meta_info.contains(&mapped_name) {
                let mut header = Md1Header::create(&mapped_name, data.len() as u32, 0);
                self.meta_info.apply(&mapped_name, &mut header);
                header
            } else {
                Md1Header::create(&mapped_name, data.len() as u32, base_address as u32)
            };

            base_address += align16(u64::from(header.data_offset) + data.len() as u64);
            info!("Packed {file_name} as {mapped_name} (size: {} bytes)", data.len());
            image.add_file_with_header(header, data);
        }

        if !self.file_mapping.is_empty() {
            let mut map_data = vec![0u8; MAP_BLOCK_SIZE];
            map_data[..FILE_MAP_MARKER.len()].copy_from_slice(FILE_MAP_MARKER);
            map_data.extend_from_slice(self.file_mapping.to_text().as_bytes());
            image.add_file(FILE_MAP_NAME, map_data, base_address as u32);
            info!("Added file mapping to image");
        }

        Ok(image)
    }

    /// Build the image and write it to `output`.
    pub fn pack<P: AsRef<Path>>(&self, output: P) -> Result<PathBuf> {
        let output = output.as_ref();
        let image = self.build_image()?;
        image.save(output)?;
        info!("Successfully saved MD1 image to {}", output.display());
        Ok(output.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_prefix_helpers() {
        assert_eq!(extract_number("12_md1rom"), 12);
        assert_eq!(extract_number("md1rom"), 0);
        assert_eq!(extract_number("007"), 7);
        assert_eq!(strip_number("3_md1dsp.img"), "md1dsp.img");
        assert_eq!(strip_number("3_"), "3_");
        assert_eq!(strip_number("_x"), "_x");
        assert_eq!(strip_number("md1rom"), "md1rom");
        assert_eq!(strip_number("10_2_a"), "2_a");
    }

    #[test]
    fn empty_packer_refuses() {
        let packer = Md1Packer::new(Md1ImgConfig::default());
        assert!(matches!(packer.build_image(), Err(Md1Error::NothingToPack)));
    }

    #[test]
    fn directory_is_sorted_by_number() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10_c", "2_b", "1_a", "meta_info", "readme"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let mut packer = Md1Packer::new(Md1ImgConfig::default());
        packer.add_directory(dir.path()).unwrap();
        let names: Vec<String> = packer.files().iter().map(|p| file_name_of(p)).collect();
        assert_eq!(names, vec!["readme", "1_a", "2_b", "10_c"]);
    }

    #[test]
    fn sidecars_are_loaded_not_queued() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("md1_file_map"), "md1rom.img.gz=md1rom\n").unwrap();
        fs::write(dir.path().join("meta_info"), "name=md1rom\nbase=0x2000\n").unwrap();
        fs::write(dir.path().join("1_md1rom.img.gz"), b"rom").unwrap();

        let mut packer = Md1Packer::new(Md1ImgConfig::default());
        packer.add_directory(dir.path()).unwrap();

        assert_eq!(packer.files().len(), 1);
        assert_eq!(packer.file_mapping().get("md1rom.img.gz"), Some("md1rom"));
        assert_eq!(packer.file_mapping().len(), 1);
        assert!(packer.meta_info().contains("md1rom"));
        assert_eq!(packer.meta_info().get("md1rom").unwrap()["base"], "0x2000");
    }

    #[test]
    fn compression_policy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("md1_file_map"), "md1rom.img.gz=md1rom\nmd1dsp.img=md1dsp\n").unwrap();
        let config = Md1ImgConfig { compression_format: CompressionFormat::Xz, ..Default::default() };
        let mut packer = Md1Packer::new(config);
        packer.add_directory(dir.path()).unwrap();

        assert_eq!(packer.find_compression_type("1_md1rom.img"), Some(CompressionFormat::Gzip));
        assert_eq!(packer.find_compression_type("1_MD1ROM.IMG.gz"), Some(CompressionFormat::Gzip));
        assert_eq!(packer.find_compression_type("2_md1dsp.img"), None);
        assert_eq!(packer.find_compression_type("3_md1rom"), Some(CompressionFormat::Gzip));
        assert_eq!(packer.find_compression_type("4_cert1"), Some(CompressionFormat::Xz));
    }

    #[test]
    fn bases_accumulate_and_mapping_entry_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_a"), vec![1u8; 100]).unwrap();
        fs::write(dir.path().join("2_b"), vec![2u8; 600]).unwrap();
        fs::write(dir.path().join("md1_file_map"), "b.bin=b\n").unwrap();

        let mut packer = Md1Packer::new(Md1ImgConfig::default());
        packer.add_directory(dir.path()).unwrap();
        let image = packer.build_image().unwrap();

        assert_eq!(image.file_names(), vec!["a", "b", "md1_file_map"]);
        assert_eq!(image.files[0].header.base, 0);
        assert_eq!(image.files[1].header.base, 624);
        assert_eq!(image.files[2].header.base, 624 + 1120);

        let map = &image.files[2].data;
        assert_eq!(&map[..12], b"md1_file_map");
        assert!(map[12..MAP_BLOCK_SIZE].iter().all(|&b| b == 0));
        assert_eq!(&map[MAP_BLOCK_SIZE..], b"b.bin=b\n");
    }
}
