//! Raw sample file source
//!
//! Files are flat arrays of little-endian `f32`:
//! - real: one value per sample
//! - complex: interleaved I/Q pairs
//!
//! A trailing partial sample is never emitted. With looping enabled the file
//! is re-read from offset 0 at end of data, so downstream stages see one
//! continuous stream.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::dsp::{ComplexSample, Sample};

/// Source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} holds no complete sample")]
    Empty(PathBuf),
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
}

/// How the raw file is framed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// One `f32` per sample
    Real,
    /// Interleaved `f32` I/Q pairs
    Complex,
}

impl SampleFormat {
    /// Bytes per sample in the file
    pub fn item_size(&self) -> u64 {
        match self {
            Self::Real => 4,
            Self::Complex => 8,
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "real f32"),
            Self::Complex => write!(f, "complex f32"),
        }
    }
}

/// One block of source samples, tagged by type
#[derive(Clone, Debug, PartialEq)]
pub enum SampleBuf {
    Real(Vec<Sample>),
    Complex(Vec<ComplexSample>),
}

impl SampleBuf {
    pub fn new(format: SampleFormat) -> Self {
        match format {
            SampleFormat::Real => Self::Real(Vec::new()),
            SampleFormat::Complex => Self::Complex(Vec::new()),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            Self::Real(_) => SampleFormat::Real,
            Self::Complex(_) => SampleFormat::Complex,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Real(v) => v.len(),
            Self::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match self {
            Self::Real(v) => v.clear(),
            Self::Complex(v) => v.clear(),
        }
    }
}

/// Producer at the head of the transmit graph.
pub trait SampleSource: Send {
    fn format(&self) -> SampleFormat;

    /// Replace `buf` with up to `max` new samples.
    ///
    /// Returns the number of samples produced; 0 means the source is exhausted.
    fn read(&mut self, buf: &mut SampleBuf, max: usize) -> Result<usize, SourceError>;

    /// How many times the source restarted from the beginning
    fn restarts(&self) -> u64 {
        0
    }
}

/// Reads a raw sample file, optionally looping forever.
pub struct FileSource {
    path: PathBuf,
    reader: BufReader<File>,
    format: SampleFormat,
    loop_source: bool,
    /// Whole samples in the file
    total_items: u64,
    /// Samples left before end of data in the current pass
    items_remaining: u64,
    restarts: u64,
    /// Interleaved floats for complex reads
    scratch: Vec<f32>,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(
        path: P,
        format: SampleFormat,
        loop_source: bool,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| SourceError::Open {
                path: path.clone(),
                source,
            })?
            .len();

        let total_items = len / format.item_size();
        if total_items == 0 {
            return Err(SourceError::Empty(path));
        }
        if len % format.item_size() != 0 {
            log::warn!(
                "{}: {} trailing bytes do not form a whole {} sample and are ignored",
                path.display(),
                len % format.item_size(),
                format
            );
        }

        log::info!(
            "Source: {} | {} | {} samples{}",
            path.display(),
            format,
            total_items,
            if loop_source { " | looping" } else { "" }
        );

        Ok(Self {
            path,
            reader: BufReader::new(file),
            format,
            loop_source,
            total_items,
            items_remaining: total_items,
            restarts: 0,
            scratch: Vec::new(),
        })
    }

    /// Whole samples in the file
    pub fn len(&self) -> u64 {
        self.total_items
    }

    pub fn is_empty(&self) -> bool {
        self.total_items == 0
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.items_remaining = self.total_items;
        self.restarts += 1;
        log::debug!("{}: restart #{}", self.path.display(), self.restarts);
        Ok(())
    }
}

impl SampleSource for FileSource {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn read(&mut self, buf: &mut SampleBuf, max: usize) -> Result<usize, SourceError> {
        if self.items_remaining == 0 {
            if !self.loop_source {
                buf.clear();
                return Ok(0);
            }
            self.rewind()?;
        }

        let count = (max as u64).min(self.items_remaining) as usize;
        if buf.format() != self.format {
            *buf = SampleBuf::new(self.format);
        }

        match buf {
            SampleBuf::Real(samples) => {
                samples.resize(count, 0.0);
                self.reader.read_f32_into::<LittleEndian>(samples)?;
            }
            SampleBuf::Complex(samples) => {
                self.scratch.resize(count * 2, 0.0);
                self.reader
                    .read_f32_into::<LittleEndian>(&mut self.scratch)?;
                samples.clear();
                samples.extend(
                    self.scratch
                        .chunks_exact(2)
                        .map(|iq| ComplexSample::new(iq[0], iq[1])),
                );
            }
        }

        self.items_remaining -= count as u64;
        Ok(count)
    }

    fn restarts(&self) -> u64 {
        self.restarts
    }
}
