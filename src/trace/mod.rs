use crate::{
    config::{ClockOptions, OpenMode},
    error::Error,
    parser::PacketSource,
    types::{decl::TraceDescription, ByteOrder},
};
use itertools::Itertools;
use std::{
    ffi::OsString,
    fs::{self, File},
    io::{Read, Seek},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;
use uuid::Uuid;

pub use metadata::MetadataInterpreter;
pub use stream::{FileStream, PacketSeek, StreamState};

pub mod metadata;
pub mod stream;

/// Bytes of one stream, supplied by the caller instead of a file on
/// disk.
#[derive(Debug)]
pub enum StreamData {
    /// An existing read-only memory mapping.
    Mapped(memmap2::Mmap),
    /// An in-memory copy of the stream.
    Owned(Vec<u8>),
}

impl AsRef<[u8]> for StreamData {
    fn as_ref(&self) -> &[u8] {
        match self {
            StreamData::Mapped(m) => m,
            StreamData::Owned(v) => v,
        }
    }
}

/// An open CTF trace: the interpreted metadata plus one [`FileStream`]
/// per stream file.
///
/// The description is immutable once the trace is open and shared
/// read-only between streams; each stream owns its own cursor and
/// decoded state, so streams may be moved to separate tasks with
/// [`Trace::into_streams`].
#[derive(Debug)]
pub struct Trace {
    path: Option<PathBuf>,
    desc: Arc<TraceDescription>,
    clock_options: ClockOptions,
    streams: Vec<FileStream>,
}

impl Trace {
    /// Open the trace directory at `path`: load and interpret the
    /// `metadata` file, then open and index every stream file.
    ///
    /// Hidden files and `metadata` itself are skipped; stream files are
    /// opened in name order.
    pub fn open<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        interpreter: &dyn MetadataInterpreter,
        clock_options: ClockOptions,
    ) -> Result<Self, Error> {
        if mode == OpenMode::ReadWrite {
            return Err(Error::UnsupportedWriteMode);
        }
        let path = path.as_ref();

        let mut metadata_file = File::open(path.join("metadata"))?;
        let desc = Arc::new(Self::interpret(&mut metadata_file, interpreter)?);

        let mut stream_paths = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let skip = name.to_string_lossy().starts_with('.') || name == "metadata";
            if skip || !entry.file_type()?.is_file() {
                continue;
            }
            stream_paths.push((name, entry.path()));
        }

        let mut streams = Vec::new();
        for (_, stream_path) in stream_paths
            .into_iter()
            .sorted_by_key(|(name, _)| -> OsString { name.clone() })
        {
            debug!(path = %stream_path.display(), "Opening stream file");
            let file = File::open(&stream_path)?;
            streams.push(FileStream::open(
                Arc::clone(&desc),
                PacketSource::File(file),
            )?);
        }

        Ok(Self {
            path: Some(path.to_owned()),
            desc,
            clock_options,
            streams,
        })
    }

    /// Open a trace from caller-supplied stream bytes and a metadata
    /// handle, for callers that already mapped their streams. Each
    /// region is indexed exactly like an on-disk stream file.
    pub fn open_mapped<R: Read + Seek>(
        stream_data: Vec<StreamData>,
        metadata: &mut R,
        interpreter: &dyn MetadataInterpreter,
        clock_options: ClockOptions,
    ) -> Result<Self, Error> {
        let desc = Arc::new(Self::interpret(metadata, interpreter)?);

        let mut streams = Vec::new();
        for data in stream_data {
            streams.push(FileStream::open(
                Arc::clone(&desc),
                PacketSource::Region(Arc::new(data)),
            )?);
        }

        Ok(Self {
            path: None,
            desc,
            clock_options,
            streams,
        })
    }

    fn interpret<R: Read + Seek>(
        metadata: &mut R,
        interpreter: &dyn MetadataInterpreter,
    ) -> Result<TraceDescription, Error> {
        let loaded = metadata::load_metadata(metadata)?;
        let mut desc = interpreter.interpret(&loaded.text)?;

        // Reconcile the framing with the interpreted description.
        if let Some(found) = loaded.uuid {
            match desc.uuid {
                Some(expected) if expected != found => {
                    return Err(Error::UuidMismatch { expected, found });
                }
                _ => desc.uuid = Some(found),
            }
        }
        desc.major = desc.major.or(loaded.major);
        desc.minor = desc.minor.or(loaded.minor);
        Ok(desc)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn description(&self) -> &TraceDescription {
        &self.desc
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.desc.byte_order
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.desc.uuid
    }

    pub fn clock_options(&self) -> &ClockOptions {
        &self.clock_options
    }

    pub fn streams(&self) -> &[FileStream] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [FileStream] {
        &mut self.streams
    }

    /// Take the streams out of the trace, e.g. to drive each from its
    /// own task.
    pub fn into_streams(self) -> Vec<FileStream> {
        self.streams
    }

    /// Close the trace, releasing every file handle and mapping.
    pub fn close(self) {}
}
