//! In-memory model of a whole md1img container.
//!
//! A container is a flat run of records:
//!
//! ```text
//! [ header (512 B) | payload (data_size B) | 0x00 pad to 16 ] ...
//! ```
//!
//! The last record is normally the synthetic `md1_file_map` entry whose
//! payload carries the external→internal name mapping as text.
//!
//! Loading reads the whole file once and then makes two independent passes
//! over the buffer: a backward search for the mapping marker and a forward
//! walk over the record chain.

use log::{debug, info, warn};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Md1Error, Result};
use crate::header::{Md1Header, HEADER_SIZE};
use crate::mapping::{FileMapping, FILE_MAP_NAME};

/// Records start on 16-byte boundaries.
pub const ALIGNMENT: u64 = 16;
/// Window size of the backward mapping-marker search.
pub const SCAN_CHUNK_SIZE: usize = 16 * 1024;
/// Size of the marker block that opens a packed `md1_file_map` payload.
pub const MAP_BLOCK_SIZE: usize = 504;

pub const FILE_MAP_MARKER: &[u8] = FILE_MAP_NAME.as_bytes();

#[inline]
pub const fn align16(n: u64) -> u64 {
    (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

// ── Md1File ───────────────────────────────────────────────────────────────────

/// One blob inside the container.
#[derive(Debug, Clone)]
pub struct Md1File {
    /// Internal name, taken from the header.
    pub name:   String,
    pub header: Md1Header,
    pub data:   Vec<u8>,
    /// Where this entry's header starts in the container.
    pub offset: u64,
}

impl Md1File {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Length of header plus payload, rounded up to the record alignment.
    pub fn record_len(&self) -> u64 {
        align16(u64::from(self.header.data_offset) + self.data.len() as u64)
    }

    pub fn is_file_map(&self) -> bool {
        self.name == FILE_MAP_NAME
    }
}

impl fmt::Display for Md1File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MD1File: {} (size: {} bytes, offset: 0x{:08x})", self.name, self.size(), self.offset)?;
        write!(f, "{}", self.header)
    }
}

// ── Md1Image ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Md1Image {
    path:             Option<PathBuf>,
    /// Entries in physical order, including the mapping entry.
    pub files:        Vec<Md1File>,
    pub file_mapping: FileMapping,
}

impl Md1Image {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a container.  A missing mapping marker is logged and tolerated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Load a container, failing with [`Md1Error::MappingNotFound`] when it
    /// carries no mapping table.
    pub fn open_strict<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, true)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, strict: bool) -> Result<Self> {
        let path = path.as_ref();
        let buf = fs::read(path).map_err(Md1Error::io_at(path))?;
        let mut image = Self::parse(&buf, strict, &path.display().to_string())?;
        image.path = Some(path.to_owned());
        Ok(image)
    }

    pub fn from_bytes(buf: &[u8], strict: bool) -> Result<Self> {
        Self::parse(buf, strict, "<memory>")
    }

    fn parse(buf: &[u8], strict: bool, label: &str) -> Result<Self> {
        let file_mapping = match find_file_mapping(buf) {
            Some(mapping) => mapping,
            None if strict => return Err(Md1Error::MappingNotFound(label.to_owned())),
            None => {
                warn!("No file mapping found in image");
                FileMapping::new()
            }
        };
        let files = scan_entries(buf);
        Ok(Self { path: None, files, file_mapping })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ── Save ──────────────────────────────────────────────────────────────────

    pub fn save<P: AsRef<Path>>(&self, output: P) -> Result<()> {
        let output = output.as_ref();
        let file = File::create(output).map_err(Md1Error::io_at(output))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(Md1Error::io_at(output))?;
        info!("Saved MD1 image to {}", output.display());
        Ok(())
    }

    /// Serialize every entry: header, payload, then zero padding that brings
    /// the payload (not the whole record) to a multiple of 16.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        const ZEROS: [u8; ALIGNMENT as usize] = [0; ALIGNMENT as usize];
        for file in &self.files {
            file.header.write(&mut writer)?;
            writer.write_all(&file.data)?;
            let pad = align16(file.data.len() as u64) as usize - file.data.len();
            writer.write_all(&ZEROS[..pad])?;
        }
        Ok(())
    }

    // ── Entries ───────────────────────────────────────────────────────────────

    /// Real entries, without the synthetic mapping record.
    pub fn entries(&self) -> impl Iterator<Item = &Md1File> {
        self.files.iter().filter(|f| !f.is_file_map())
    }

    pub fn get_file_by_name(&self, name: &str) -> Option<&Md1File> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    /// Append a blob with a freshly created header.
    pub fn add_file(&mut self, name: &str, data: Vec<u8>, base: u32) -> &Md1File {
        let header = Md1Header::create(name, data.len() as u32, base);
        self.add_file_with_header(header, data)
    }

    /// Append a blob with a caller-built header.  The entry is placed right
    /// after the current last entry; call in serialization order.
    pub fn add_file_with_header(&mut self, header: Md1Header, data: Vec<u8>) -> &Md1File {
        let offset = self.files.last().map_or(0, |last| {
            align16(last.offset + u64::from(last.header.data_offset) + last.data.len() as u64)
        });
        let name = header.display_name();
        self.files.push(Md1File { name, header, data, offset });
        &self.files[self.files.len() - 1]
    }

    /// Remove the first entry called `name`.  Offsets of the remaining
    /// entries are left as they were.
    pub fn remove_file(&mut self, name: &str) -> bool {
        match self.files.iter().position(|f| f.name == name) {
            Some(i) => {
                self.files.remove(i);
                true
            }
            None => false,
        }
    }

    /// Estimated container length: aligned header+payload per entry.
    pub fn size(&self) -> u64 {
        self.files.iter().map(Md1File::record_len).sum()
    }
}

impl fmt::Display for Md1Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.as_ref().map_or_else(|| "New image".to_owned(), |p| p.display().to_string());
        writeln!(f, "MD1 Image: {path} (size: {} bytes)", self.size())?;
        write!(f, "Files: {}", self.files.len())?;
        for (i, file) in self.files.iter().enumerate() {
            let mapped = self.file_mapping.external_for(&file.name).unwrap_or("Unknown");
            write!(f, "\n{}. {} -> {} (size: {} bytes)", i + 1, file.name, mapped, file.size())?;
        }
        Ok(())
    }
}

// ── Load passes ───────────────────────────────────────────────────────────────

/// Offset of the last occurrence of the mapping marker, searching backward
/// from the end in [`SCAN_CHUNK_SIZE`] windows.  Each window overlaps the
/// previously searched tail by `marker.len() - 1` bytes so a marker split
/// across a window boundary is still seen.
pub fn find_marker(buf: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() || buf.len() < marker.len() {
        return None;
    }
    let overlap = marker.len() - 1;
    let mut end = buf.len();
    loop {
        let start = end.saturating_sub(SCAN_CHUNK_SIZE);
        let window_end = (end + overlap).min(buf.len());
        if let Some(pos) = buf[start..window_end].windows(marker.len()).rposition(|w| w == marker) {
            return Some(start + pos);
        }
        if start == 0 {
            return None;
        }
        end = start;
    }
}

fn find_file_mapping(buf: &[u8]) -> Option<FileMapping> {
    let marker_at = find_marker(buf, FILE_MAP_MARKER)?;
    debug!("File mapping marker at 0x{marker_at:08x}");
    let text_start = mapping_text_offset(buf, marker_at).min(buf.len());
    let text = String::from_utf8_lossy(&buf[text_start..]);
    Some(FileMapping::parse(&text))
}

/// Where the mapping text begins for a marker found at `marker_at`.
///
/// The text sits `len(marker) + 504` bytes past the marker, except when the
/// marker opens the payload of an `md1_file_map` record: there the marker
/// is the first 12 bytes of the 504-byte block and the text follows it.
fn mapping_text_offset(buf: &[u8], marker_at: usize) -> usize {
    let opens_map_record = marker_at
        .checked_sub(HEADER_SIZE)
        .and_then(|start| Md1Header::from_bytes(&buf[start..marker_at]).ok())
        .is_some_and(|h| {
            h.display_name() == FILE_MAP_NAME && h.data_offset as usize == HEADER_SIZE
        });
    if opens_map_record {
        marker_at + MAP_BLOCK_SIZE
    } else {
        marker_at + FILE_MAP_MARKER.len() + MAP_BLOCK_SIZE
    }
}

/// Walk the record chain from offset 0.  Stops quietly at the first
/// position that does not hold a full, valid header.
fn scan_entries(buf: &[u8]) -> Vec<Md1File> {
    let file_size = buf.len() as u64;
    let mut files = Vec::new();
    let mut offset: u64 = 0;

    while offset < file_size {
        let start = offset as usize;
        let Some(raw) = buf.get(start..start + HEADER_SIZE) else { break };
        let header = match Md1Header::from_bytes(raw) {
            Ok(h)  => h,
            Err(e) => {
                debug!("Entry scan stopped at 0x{offset:08x}: {e}");
                break;
            }
        };
        let name = header.display_name();
        debug!("Found file: {name} (size: {} bytes, offset: 0x{offset:08x})", header.data_size);

        let data_start = offset.saturating_add(u64::from(header.data_offset)).min(file_size);
        let data_end = data_start.saturating_add(u64::from(header.data_size)).min(file_size);
        let data = buf[data_start as usize..data_end as usize].to_vec();
        if data.len() as u64 != u64::from(header.data_size) {
            warn!(
                "Truncated data for {name}: expected {}, got {} bytes",
                header.data_size,
                data.len()
            );
        }

        let next = align16(offset + u64::from(header.data_offset) + u64::from(header.data_size));
        files.push(Md1File { name, header, data, offset });
        if next <= offset {
            break;
        }
        offset = next;
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Keeps warnings so tests can check what the loader reported.
    struct CaptureLogger {
        records: Mutex<Vec<String>>,
    }

    impl Log for CaptureLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Warn
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                self.records.lock().unwrap().push(format!("[{}] {}", record.level(), record.args()));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: CaptureLogger = CaptureLogger { records: Mutex::new(Vec::new()) };

    fn capture_warnings() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Warn);
    }

    fn warned(needle: &str) -> bool {
        CAPTURE.records.lock().unwrap().iter().any(|r| r.starts_with("[WARN]") && r.contains(needle))
    }

    fn record(name: &str, data: &[u8]) -> Vec<u8> {
        let mut out = Md1Header::create(name, data.len() as u32, 0).to_bytes().to_vec();
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn truncated_payload_is_kept_short() {
        capture_warnings();
        let mut buf = Md1Header::create("short", 100, 0).to_bytes().to_vec();
        buf.extend_from_slice(&[0xAB; 60]);
        let image = Md1Image::from_bytes(&buf, false).unwrap();
        assert_eq!(image.files.len(), 1);
        assert_eq!(image.files[0].size(), 60);
        assert_eq!(image.files[0].header.data_size, 100);
        assert!(warned("Truncated data for short: expected 100, got 60 bytes"));
    }

    #[test]
    fn garbage_tail_ends_the_scan() {
        let mut buf = record("a", &[1; 16]);
        buf.extend_from_slice(&[0x55; 700]);
        let image = Md1Image::from_bytes(&buf, false).unwrap();
        assert_eq!(image.file_names(), vec!["a"]);
    }

    #[test]
    fn short_tail_ends_the_scan() {
        let mut buf = record("a", &[1; 16]);
        buf.extend_from_slice(&Md1Header::create("b", 4, 0).to_bytes()[..200]);
        let image = Md1Image::from_bytes(&buf, false).unwrap();
        assert_eq!(image.files.len(), 1);
    }

    #[test]
    fn strict_load_requires_mapping() {
        let buf = record("a", b"payload");
        assert!(Md1Image::from_bytes(&buf, false).unwrap().file_mapping.is_empty());
        assert!(matches!(Md1Image::from_bytes(&buf, true), Err(Md1Error::MappingNotFound(_))));
    }

    #[test]
    fn marker_found_across_chunk_boundary() {
        let mut buf = vec![0u8; SCAN_CHUNK_SIZE * 2];
        let at = buf.len() - SCAN_CHUNK_SIZE - 5;
        buf[at..at + FILE_MAP_MARKER.len()].copy_from_slice(FILE_MAP_MARKER);
        assert_eq!(find_marker(&buf, FILE_MAP_MARKER), Some(at));
    }

    #[test]
    fn marker_search_returns_last_occurrence() {
        let mut buf = vec![0u8; 40_000];
        buf[10..22].copy_from_slice(FILE_MAP_MARKER);
        buf[30_000..30_012].copy_from_slice(FILE_MAP_MARKER);
        assert_eq!(find_marker(&buf, FILE_MAP_MARKER), Some(30_000));
        assert_eq!(find_marker(&buf[..100], FILE_MAP_MARKER), Some(10));
        assert_eq!(find_marker(&buf[..5], FILE_MAP_MARKER), None);
    }

    #[test]
    fn mapping_text_follows_marker_block() {
        let mut payload = vec![0u8; MAP_BLOCK_SIZE];
        payload[..FILE_MAP_MARKER.len()].copy_from_slice(FILE_MAP_MARKER);
        payload.extend_from_slice(b"md1rom.img=md1rom\nmd1dsp.img.xz=md1dsp\n");

        let mut image = Md1Image::new();
        image.add_file("md1rom", vec![7; 33], 0);
        image.add_file(FILE_MAP_NAME, payload, 0);
        let mut buf = Vec::new();
        image.write_to(&mut buf).unwrap();

        let loaded = Md1Image::from_bytes(&buf, true).unwrap();
        assert_eq!(loaded.file_mapping.get("md1rom.img"), Some("md1rom"));
        assert_eq!(loaded.file_mapping.get("md1dsp.img.xz"), Some("md1dsp"));
        assert_eq!(loaded.entries().count(), 1);
        assert_eq!(loaded.files.len(), 2);
    }

    #[test]
    fn bare_marker_skips_its_own_length() {
        let mut buf = vec![0u8; MAP_BLOCK_SIZE];
        buf[..FILE_MAP_MARKER.len()].copy_from_slice(FILE_MAP_MARKER);
        buf.extend_from_slice(b"PREFIXBYTES!");
        buf.extend_from_slice(b"a.bin=a\n");

        let mapping = find_file_mapping(&buf).unwrap();
        assert_eq!(mapping.get("a.bin"), Some("a"));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn marker_only_in_header_name() {
        let mut payload = b"PREFIXBYTES!".to_vec();
        payload.extend_from_slice(b"md1rom.img=md1rom\n");
        let buf = record(FILE_MAP_NAME, &payload);
        assert_eq!(find_marker(&buf, FILE_MAP_MARKER), Some(8));

        let loaded = Md1Image::from_bytes(&buf, true).unwrap();
        assert_eq!(loaded.file_mapping.get("md1rom.img"), Some("md1rom"));
        assert_eq!(loaded.file_mapping.len(), 1);
    }

    #[test]
    fn add_file_places_entries_contiguously() {
        let mut image = Md1Image::new();
        image.add_file("a", vec![0; 5], 0);
        image.add_file("b", vec![0; 32], 0);
        image.add_file("c", vec![], 0);
        let offsets: Vec<u64> = image.files.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 528, 1072]);
        assert_eq!(image.size(), 528 + 544 + 512);

        assert!(image.remove_file("b"));
        assert!(!image.remove_file("b"));
        assert_eq!(image.file_names(), vec!["a", "c"]);
        assert_eq!(image.files[1].offset, 1072);
    }

    #[test]
    fn loaded_offsets_match_layout() {
        let mut image = Md1Image::new();
        for (i, len) in [3usize, 16, 17, 0, 511].into_iter().enumerate() {
            image.add_file(&format!("f{i}"), vec![i as u8; len], 0);
        }
        let mut buf = Vec::new();
        image.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, image.size());

        let loaded = Md1Image::from_bytes(&buf, false).unwrap();
        assert_eq!(loaded.files.len(), 5);
        for (a, b) in image.files.iter().zip(&loaded.files) {
            assert_eq!(a.offset, b.offset);
            assert_eq!(a.data, b.data);
            assert_eq!(a.header, b.header);
        }
    }

    proptest! {
        #[test]
        fn every_record_starts_aligned(lens in prop::collection::vec(0usize..2000, 1..8)) {
            let mut image = Md1Image::new();
            for (i, len) in lens.iter().enumerate() {
                image.add_file(&format!("blob{i}"), vec![0xC3; *len], 0);
            }
            let mut buf = Vec::new();
            image.write_to(&mut buf).unwrap();
            let loaded = Md1Image::from_bytes(&buf, false).unwrap();
            prop_assert_eq!(loaded.files.len(), lens.len());
            for file in &loaded.files {
                prop_assert_eq!(file.offset % ALIGNMENT, 0);
            }
        }
    }
}
