use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::DateTime;
use log::{debug, error, info, warn};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError};

use crate::data_capture::types::CapturedRecord;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordSink;

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
/// Largest frame stored per record; longer frames keep only this prefix.
pub const PCAP_SNAPLEN: u32 = 65_535;
const LINKTYPE_ETHERNET: u32 = 1;
const PCAP_READ_BUFFER: usize = 65_536;
// Bounds buffer growth on records with a corrupt caplen.
const PCAP_READ_BUFFER_MAX: usize = 16 * 1024 * 1024;

/// Picks a file name in `directory` that does not exist yet.
///
/// `base.ext` is tried first, then `base1.ext`, `base2.ext`, and so on; the
/// first free candidate is returned. Nothing is created.
pub fn resolve(directory: &Path, base_name: &str, extension: &str) -> Result<PathBuf, StorageError> {
    first_free(|suffix| directory.join(format!("{}{}.{}", base_name, suffix, extension)))
}

/// Same policy as [`resolve`], for a directory name inside `parent`.
pub fn resolve_dir(parent: &Path, name: &str) -> Result<PathBuf, StorageError> {
    first_free(|suffix| parent.join(format!("{}{}", name, suffix)))
}

fn first_free<F>(candidate: F) -> Result<PathBuf, StorageError>
where
    F: Fn(&str) -> PathBuf,
{
    let mut index: u64 = 0;
    loop {
        let suffix = if index == 0 {
            String::new()
        } else {
            index.to_string()
        };
        let path = candidate(&suffix);
        let taken = path.try_exists().map_err(|e| {
            error!("Failed to probe {}: {}", path.display(), e);
            StorageError::ResolveFailed(e)
        })?;
        if !taken {
            debug!("Resolved free path {}", path.display());
            return Ok(path);
        }
        index += 1;
    }
}

/// Append-only classic pcap file.
///
/// The file is created with `create_new`, so an existing capture can never be
/// truncated. Every record is encoded in memory and handed to the kernel with
/// a single write followed by `sync_data`; if either fails the file is cut back
/// to its previous length.
pub struct PcapFileSink {
    path: PathBuf,
    file: File,
    len: u64,
}

impl PcapFileSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create capture dir {}: {}", parent.display(), e);
                    StorageError::CreateFailed(e)
                })?;
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                error!("Failed to create capture file {}: {}", path.display(), e);
                StorageError::CreateFailed(e)
            })?;

        let mut sink = Self { path, file, len: 0 };
        sink.write_durably(&global_header())?;
        info!("Capture file created at {}", sink.path.display());
        Ok(sink)
    }

    fn write_durably(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        let written = self
            .file
            .write_all(buf)
            .and_then(|_| self.file.sync_data());
        if let Err(e) = written {
            error!("Write failed {}: {}", self.path.display(), e);
            if let Err(rollback) = self.file.set_len(self.len) {
                error!(
                    "Unable to roll {} back to {} byte(s): {}",
                    self.path.display(),
                    self.len,
                    rollback
                );
            }
            return Err(StorageError::WriteFailed(e));
        }
        self.len += buf.len() as u64;
        Ok(())
    }
}

impl RecordSink for PcapFileSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: &CapturedRecord) -> Result<(), StorageError> {
        let encoded = encode_record(record).map_err(|e| {
            error!("Refusing record for {}: {}", self.path.display(), e);
            StorageError::WriteFailed(e)
        })?;
        self.write_durably(&encoded)?;
        debug!(
            "Appended {} byte(s) to {}",
            encoded.len(),
            self.path.display()
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.file.sync_all().map_err(|e| {
            error!("Flush failed {}: {}", self.path.display(), e);
            StorageError::WriteFailed(e)
        })
    }
}

fn global_header() -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    // Writes into a Vec cannot fail.
    let _ = buf.write_u32::<LittleEndian>(PCAP_MAGIC);
    let _ = buf.write_u16::<LittleEndian>(PCAP_VERSION_MAJOR);
    let _ = buf.write_u16::<LittleEndian>(PCAP_VERSION_MINOR);
    let _ = buf.write_i32::<LittleEndian>(0);
    let _ = buf.write_u32::<LittleEndian>(0);
    let _ = buf.write_u32::<LittleEndian>(PCAP_SNAPLEN);
    let _ = buf.write_u32::<LittleEndian>(LINKTYPE_ETHERNET);
    buf
}

fn encode_record(record: &CapturedRecord) -> io::Result<Vec<u8>> {
    let caplen = record.data.len().min(PCAP_SNAPLEN as usize);
    let ts_sec = u32::try_from(record.timestamp.timestamp()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("timestamp {} outside the pcap time range", record.timestamp),
        )
    })?;
    let ts_usec = record.timestamp.timestamp_subsec_micros().min(999_999);
    let orig_len = record.original_len.max(caplen as u32);

    let mut buf = Vec::with_capacity(16 + caplen);
    let _ = buf.write_u32::<LittleEndian>(ts_sec);
    let _ = buf.write_u32::<LittleEndian>(ts_usec);
    let _ = buf.write_u32::<LittleEndian>(caplen as u32);
    let _ = buf.write_u32::<LittleEndian>(orig_len);
    buf.extend_from_slice(&record.data[..caplen]);
    Ok(buf)
}

/// Reads every record of a classic pcap file, in file order.
pub fn read_capture<P: AsRef<Path>>(path: P) -> Result<Vec<CapturedRecord>, StorageError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        error!("Read failed {}: {}", path.display(), e);
        StorageError::ReadFailed(format!("{}: {}", path.display(), e))
    })?;
    let mut reader = LegacyPcapReader::new(PCAP_READ_BUFFER, file).map_err(|e| {
        error!("Not a pcap file {}: {:?}", path.display(), e);
        StorageError::ReadFailed(format!("{}: {:?}", path.display(), e))
    })?;

    let mut records = Vec::new();
    let mut capacity = PCAP_READ_BUFFER;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::Legacy(packet) => {
                        let timestamp = DateTime::from_timestamp(
                            i64::from(packet.ts_sec),
                            packet.ts_usec.saturating_mul(1_000),
                        )
                        .unwrap_or_default();
                        records.push(CapturedRecord {
                            timestamp,
                            original_len: packet.origlen,
                            data: packet.data.to_vec(),
                        });
                    }
                    PcapBlockOwned::LegacyHeader(header) => {
                        if header.network != Linktype::ETHERNET {
                            warn!(
                                "{} uses link type {:?}, records will not decode as ethernet",
                                path.display(),
                                header.network
                            );
                        }
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::UnexpectedEof) => {
                warn!(
                    "{} ends with a truncated record, keeping {} complete record(s)",
                    path.display(),
                    records.len()
                );
                break;
            }
            Err(PcapError::BufferTooSmall) if capacity < PCAP_READ_BUFFER_MAX => {
                capacity *= 2;
                debug!("Growing read buffer for {} to {} byte(s)", path.display(), capacity);
                reader.grow(capacity);
            }
            Err(PcapError::Incomplete(_)) => {
                reader.refill().map_err(|e| {
                    error!("Read failed {}: {:?}", path.display(), e);
                    StorageError::ReadFailed(format!("{}: {:?}", path.display(), e))
                })?;
            }
            Err(e) => {
                error!("Corrupt capture {}: {:?}", path.display(), e);
                return Err(StorageError::ReadFailed(format!(
                    "{}: {:?}",
                    path.display(),
                    e
                )));
            }
        }
    }

    debug!("Read {} record(s) from {}", records.len(), path.display());
    Ok(records)
}
