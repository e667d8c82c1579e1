//! Memory-mapped PTU/PT3 file readers.

use crate::header::{parse_header, FileHeader};
use crate::{Error, Result};
use flimpix_core::{AcquisitionConfig, Calibration, CancelToken, LoadOptions};
use flimpix_tttr::{iter_records, reconstruct, FlimOutput};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without loading the
/// entire file into memory; the two decode passes re-iterate the mapping.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Returns the path the reader was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Mmap is not Debug, so summarize the mapping instead.
impl fmt::Debug for MappedFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFileReader")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .finish()
    }
}

/// An opened PTU or PT3 file: parsed header plus the mapped record section.
pub struct TttrFile {
    reader: MappedFileReader,
    header: FileHeader,
}

impl fmt::Debug for TttrFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TttrFile")
            .field("path", &self.reader.path())
            .field("config", &self.header.config)
            .finish()
    }
}

impl TttrFile {
    /// Opens a PTU or PT3 file, sniffing the container from its magic
    /// identifier and parsing the full header.
    ///
    /// # Errors
    /// Header errors per [`parse_header`], plus a misaligned-records error
    /// when the data section is not a whole number of 32-bit records.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        let header = parse_header(reader.as_bytes())?;

        let section_len = reader.len() - header.data_offset;
        if section_len % 4 != 0 {
            return Err(flimpix_tttr::Error::MisalignedRecords(section_len).into());
        }

        let available = section_len / 4;
        if header.config.record_count > available {
            log::warn!(
                "header promises {} records but the file holds {available} ({})",
                header.config.record_count,
                reader.path().display()
            );
        }

        Ok(Self { reader, header })
    }

    /// Configuration parsed from the header.
    #[must_use]
    pub fn config(&self) -> &AcquisitionConfig {
        &self.header.config
    }

    /// Textual rendering of the acquisition metadata.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.header.info
    }

    /// Physical calibration, when the header carried a pixel size.
    #[must_use]
    pub fn calibration(&self) -> Option<Calibration> {
        self.header.config.calibration()
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Number of records [`records`](Self::records) will yield: the header's
    /// record count, capped by what the data section actually holds.
    #[must_use]
    pub fn record_count(&self) -> usize {
        let available = self.data_section().len() / 4;
        match self.header.config.record_count {
            0 => available,
            count => count.min(available),
        }
    }

    fn data_section(&self) -> &[u8] {
        &self.reader.as_bytes()[self.header.data_offset..]
    }

    /// Iterates the 32-bit records of the data section. The header's record
    /// count caps the iteration when the file holds trailing bytes beyond it.
    pub fn records(&self) -> impl Iterator<Item = u32> + '_ {
        let count = self.header.config.record_count;
        let take = if count > 0 { count } else { usize::MAX };
        iter_records(self.data_section()).take(take)
    }

    /// Runs the full two-pass reconstruction over this file's records.
    ///
    /// # Errors
    /// See [`flimpix_tttr::reconstruct`].
    pub fn reconstruct(
        &self,
        options: &LoadOptions,
        cancel: &CancelToken,
    ) -> Result<FlimOutput> {
        reconstruct(|| self.records(), &self.header.config, options, cancel)
            .map_err(Error::Record)
    }
}
