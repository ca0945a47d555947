//! Extract an md1img container into a directory.
//!
//! Output layout for an image with mapping `md1rom.img=md1rom`:
//!
//! ```text
//! out/meta_info          header fields of every real entry
//! out/1_md1rom.img       payload (decompressed when gzip/xz)
//! out/2_md1dsp           unmapped entry, internal name kept
//! out/md1_file_map       external=internal lines
//! ```
//!
//! Entry ordinals are positional: the mapping entry is not written but still
//! consumes its number.

use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::{get_codec, CompressionFormat};
use crate::error::{Md1Error, Result};
use crate::image::{Md1File, Md1Image};
use crate::mapping::{format_meta_block, FILE_MAP_NAME, META_INFO_NAME};

/// One row of [`Md1Unpacker::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub index:       usize,
    pub name:        String,
    pub mapped_name: Option<String>,
    pub size:        usize,
    pub base:        u32,
    pub offset:      u64,
    pub compression: CompressionFormat,
}

pub struct Md1Unpacker {
    image: Md1Image,
}

impl Md1Unpacker {
    pub fn new(image: Md1Image) -> Self {
        info!("Initialized unpacker for image with {} files", image.files.len());
        Self { image }
    }

    pub fn open<P: AsRef<Path>>(path: P, strict: bool) -> Result<Self> {
        Ok(Self::new(Md1Image::open_with(path, strict)?))
    }

    pub fn image(&self) -> &Md1Image {
        &self.image
    }

    /// Write every entry plus the `meta_info` and mapping sidecars into
    /// `output_dir`, returning the paths written.
    ///
    /// Sidecar write failures abort the unpack.  A failure on a single entry
    /// is logged and that entry is left out of the result.
    pub fn unpack<P: AsRef<Path>>(&self, output_dir: P) -> Result<Vec<PathBuf>> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir).map_err(Md1Error::io_at(output_dir))?;

        let mut extracted = Vec::new();

        let meta_path = output_dir.join(META_INFO_NAME);
        let meta_text: String = self
            .image
            .entries()
            .map(|f| format_meta_block(&f.name, &f.header))
            .collect();
        fs::write(&meta_path, meta_text).map_err(Md1Error::io_at(&meta_path))?;
        info!("Created meta_info file: {}", meta_path.display());
        extracted.push(meta_path);

        for (i, file) in self.image.files.iter().enumerate() {
            if file.is_file_map() {
                continue;
            }
            let ordinal = i + 1;
            match self.extract_entry(file, ordinal, output_dir) {
                Ok(path) => extracted.push(path),
                Err(e)   => error!("Failed to extract {ordinal}_{}: {e}", file.name),
            }
        }

        if !self.image.file_mapping.is_empty() {
            let map_path = output_dir.join(FILE_MAP_NAME);
            fs::write(&map_path, self.image.file_mapping.to_text())
                .map_err(Md1Error::io_at(&map_path))?;
            info!("Created file mapping: {}", map_path.display());
            extracted.push(map_path);
        }

        Ok(extracted)
    }

    fn extract_entry(&self, file: &Md1File, ordinal: usize, output_dir: &Path) -> Result<PathBuf> {
        let mapped = self.image.file_mapping.external_for(&file.name);
        let output_name = format!("{ordinal}_{}", mapped.unwrap_or(&file.name));
        let mut output_path = output_dir.join(&output_name);

        let format = CompressionFormat::detect(&file.data);
        let data = match format {
            CompressionFormat::None => file.data.clone(),
            _ => {
                let data = get_codec(format).decompress(&file.data)?;
                info!("Decompressed {output_name} ({format})");
                if mapped.is_none() && has_extension(&output_path, format) {
                    output_path.set_extension("");
                }
                data
            }
        };

        fs::write(&output_path, &data).map_err(Md1Error::io_at(&output_path))?;
        info!("{output_name} written to {}", output_path.display());
        Ok(output_path)
    }

    /// Extract one entry by internal name.
    ///
    /// Without an explicit `output` the file is written to the entry's mapped
    /// external name, or its internal name, relative to the working
    /// directory.  Returns `Ok(None)` when no entry has that name.
    pub fn extract_file(
        &self,
        name:       &str,
        output:     Option<&Path>,
        decompress: bool,
    ) -> Result<Option<PathBuf>> {
        let Some(file) = self.image.get_file_by_name(name) else {
            warn!("File not found: {name}");
            return Ok(None);
        };

        let output_path = match output {
            Some(p) => p.to_owned(),
            None    => PathBuf::from(self.image.file_mapping.external_for(name).unwrap_or(name)),
        };

        let format = if decompress {
            CompressionFormat::detect(&file.data)
        } else {
            CompressionFormat::None
        };
        let data = get_codec(format).decompress(&file.data).map_err(|e| Md1Error::IoAccess {
            path:   output_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        if format != CompressionFormat::None {
            info!("Decompressed {name} ({format})");
        }

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(Md1Error::io_at(parent))?;
        }
        fs::write(&output_path, data).map_err(Md1Error::io_at(&output_path))?;
        info!("{name} written to {}", output_path.display());
        Ok(Some(output_path))
    }

    /// Every entry, mapping record included, numbered from 1.
    pub fn list_files(&self) -> Vec<FileInfo> {
        self.image
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| FileInfo {
                index:       i + 1,
                name:        f.name.clone(),
                mapped_name: self.image.file_mapping.external_for(&f.name).map(str::to_owned),
                size:        f.size(),
                base:        f.header.base,
                offset:      f.offset,
                compression: CompressionFormat::detect(&f.data),
            })
            .collect()
    }
}

fn has_extension(path: &Path, format: CompressionFormat) -> bool {
    match (path.extension(), format.extension()) {
        (Some(ext), Some(want)) => ext.eq_ignore_ascii_case(want),
        _ => false,
    }
}
