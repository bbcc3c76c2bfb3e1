use crate::{
    error::Error,
    types::{decl::TraceDescription, ByteOrder, TSDL_MAGIC_NUMBER},
};
use byteordered::ByteOrdered;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, warn};
use uuid::Uuid;

/// The external TSDL interpreter: scans the metadata text and produces
/// the trace's declaration tree.
pub trait MetadataInterpreter {
    fn interpret(&self, tsdl: &str) -> Result<TraceDescription, Error>;
}

/// Fixed header framing each binary metadata packet; 37 bytes on the wire.
#[derive(Clone, Eq, PartialEq, Debug)]
pub(crate) struct MetadataPacketHeader {
    pub magic: u32,
    pub uuid: [u8; 16],
    pub checksum: u32,
    pub content_size_bits: u32,
    pub packet_size_bits: u32,
    pub compression_scheme: u8,
    pub encryption_scheme: u8,
    pub checksum_scheme: u8,
    pub major: u8,
    pub minor: u8,
}

impl MetadataPacketHeader {
    pub const WIRE_SIZE: u32 = 37;
}

/// Metadata after de-framing, ready for the interpreter.
#[derive(Clone, Eq, PartialEq, Debug)]
pub(crate) struct LoadedMetadata {
    pub text: String,
    /// Byte order of the framing, when the metadata was binary-framed.
    pub byte_order: Option<ByteOrder>,
    /// UUID adopted from the framed packet headers.
    pub uuid: Option<Uuid>,
    pub major: Option<u32>,
    pub minor: Option<u32>,
}

/// Detect binary-framed vs text-only metadata and concatenate the TSDL
/// text.
pub(crate) fn load_metadata<R: Read + Seek>(r: &mut R) -> Result<LoadedMetadata, Error> {
    let mut magic_bytes = [0_u8; 4];
    let peeked = read_up_to(r, &mut magic_bytes)?;
    r.seek(SeekFrom::Start(0))?;

    let byte_order = if peeked == 4 {
        let native = u32::from_ne_bytes(magic_bytes);
        if native == TSDL_MAGIC_NUMBER {
            Some(ByteOrder::native())
        } else if native.swap_bytes() == TSDL_MAGIC_NUMBER {
            Some(ByteOrder::native().opposite())
        } else {
            None
        }
    } else {
        None
    };

    match byte_order {
        Some(byte_order) => load_framed(r, byte_order),
        None => load_text(r),
    }
}

fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut total = 0;
    while total < buf.len() {
        let n = r.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn load_framed<R: Read>(r: &mut R, byte_order: ByteOrder) -> Result<LoadedMetadata, Error> {
    let mut rdr = ByteOrdered::runtime(r, byteordered::Endianness::from(byte_order));
    let mut text = Vec::new();
    let mut uuid: Option<Uuid> = None;
    let mut version = None;

    loop {
        let magic = match rdr.read_u32() {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let mut header = MetadataPacketHeader {
            magic,
            uuid: [0; 16],
            checksum: 0,
            content_size_bits: 0,
            packet_size_bits: 0,
            compression_scheme: 0,
            encryption_scheme: 0,
            checksum_scheme: 0,
            major: 0,
            minor: 0,
        };
        for b in header.uuid.iter_mut() {
            *b = rdr.read_u8()?;
        }
        header.checksum = rdr.read_u32()?;
        header.content_size_bits = rdr.read_u32()?;
        header.packet_size_bits = rdr.read_u32()?;
        header.compression_scheme = rdr.read_u8()?;
        header.encryption_scheme = rdr.read_u8()?;
        header.checksum_scheme = rdr.read_u8()?;
        header.major = rdr.read_u8()?;
        header.minor = rdr.read_u8()?;

        if header.magic != TSDL_MAGIC_NUMBER {
            return Err(Error::Metadata(format!(
                "invalid metadata packet magic number 0x{:X}",
                header.magic
            )));
        }
        if header.checksum != 0 {
            warn!("Metadata packet checksum verification is not supported");
        }
        if header.compression_scheme != 0 {
            return Err(Error::UnsupportedCompression(header.compression_scheme));
        }
        if header.encryption_scheme != 0 {
            return Err(Error::UnsupportedEncryption(header.encryption_scheme));
        }
        if header.checksum_scheme != 0 {
            return Err(Error::UnsupportedChecksum(header.checksum_scheme));
        }
        check_version(header.major.into(), header.minor.into());
        version = Some((u32::from(header.major), u32::from(header.minor)));

        let packet_uuid = Uuid::from_bytes(header.uuid);
        match uuid {
            None => uuid = Some(packet_uuid),
            Some(expected) if expected != packet_uuid => {
                return Err(Error::UuidMismatch {
                    expected,
                    found: packet_uuid,
                });
            }
            Some(_) => (),
        }

        if header.content_size_bits > header.packet_size_bits {
            return Err(Error::ContentSizeExceedsPacketSize {
                content_size: header.content_size_bits.into(),
                packet_size: header.packet_size_bits.into(),
            });
        }
        let content_bytes = header.content_size_bits / 8;
        if content_bytes < MetadataPacketHeader::WIRE_SIZE {
            return Err(Error::Metadata(format!(
                "metadata packet content ({} bits) is shorter than its header",
                header.content_size_bits
            )));
        }

        let payload_len = content_bytes - MetadataPacketHeader::WIRE_SIZE;
        for _ in 0..payload_len {
            text.push(rdr.read_u8()?);
        }
        debug!(
            payload_len,
            packet_size = header.packet_size_bits,
            "Read metadata packet"
        );

        let padding = (header.packet_size_bits - header.content_size_bits) / 8;
        let mut missing_padding = false;
        for _ in 0..padding {
            if rdr.read_u8().is_err() {
                warn!("Missing padding at end of metadata file");
                missing_padding = true;
                break;
            }
        }
        if missing_padding {
            break;
        }
    }

    Ok(LoadedMetadata {
        text: String::from_utf8_lossy(&text).to_string(),
        byte_order: Some(byte_order),
        uuid,
        major: version.map(|(m, _)| m),
        minor: version.map(|(_, m)| m),
    })
}

fn load_text<R: Read>(r: &mut R) -> Result<LoadedMetadata, Error> {
    let mut raw = Vec::new();
    r.read_to_end(&mut raw)?;
    let text = String::from_utf8_lossy(&raw).to_string();

    let version = parse_text_version(&text);
    match version {
        Some((major, minor)) => check_version(major, minor),
        None => {
            warn!("Ill-shapen or missing \"/* CTF x.y\" header for text-only metadata");
        }
    }

    Ok(LoadedMetadata {
        text,
        byte_order: None,
        uuid: None,
        major: version.map(|(m, _)| m),
        minor: version.map(|(_, m)| m),
    })
}

/// Parse the leading `/* CTF <major>.<minor>` comment of text-only
/// metadata.
fn parse_text_version(text: &str) -> Option<(u32, u32)> {
    let rest = text.trim_start().strip_prefix("/* CTF ")?;
    let end = rest.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (major, minor) = rest[..end].split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Versions other than 1.8 are tolerated with a warning.
fn check_version(major: u32, minor: u32) {
    if (major, minor) != (1, 8) {
        warn!("Unsupported CTF specification version {major}.{minor}. Trying anyway");
    }
}
