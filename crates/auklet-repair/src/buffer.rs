use std::fs::File;
use std::io::{Read, Seek, Write};

/// Holding area for the reconstructed segment between the download and
/// upload phases.
///
/// The file variant spills decoded bytes to a temporary file so decode-side
/// backpressure cannot stall the upload against storage-node quiescence
/// timeouts; the two phases see independent deadlines either way.
pub enum RepairBuffer {
    Memory(Vec<u8>),
    File(File),
}

impl RepairBuffer {
    pub fn new(in_memory: bool) -> std::io::Result<Self> {
        if in_memory {
            Ok(RepairBuffer::Memory(Vec::new()))
        } else {
            Ok(RepairBuffer::File(tempfile::tempfile()?))
        }
    }

    pub fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            RepairBuffer::Memory(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            RepairBuffer::File(file) => file.write_all(data),
        }
    }

    pub fn len(&mut self) -> std::io::Result<u64> {
        match self {
            RepairBuffer::Memory(buf) => Ok(buf.len() as u64),
            RepairBuffer::File(file) => Ok(file.metadata()?.len()),
        }
    }

    pub fn is_empty(&mut self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read back the full decoded segment for the upload phase.
    pub fn contents(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            RepairBuffer::Memory(buf) => Ok(buf.clone()),
            RepairBuffer::File(file) => {
                file.rewind()?;
                let mut out = Vec::new();
                file.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip() {
        let mut buf = RepairBuffer::new(true).unwrap();
        buf.write_all(b"hello ").unwrap();
        buf.write_all(b"world").unwrap();
        assert_eq!(buf.len().unwrap(), 11);
        assert_eq!(buf.contents().unwrap(), b"hello world");
    }

    #[test]
    fn file_round_trip() {
        let mut buf = RepairBuffer::new(false).unwrap();
        buf.write_all(b"spilled ").unwrap();
        buf.write_all(b"bytes").unwrap();
        assert_eq!(buf.len().unwrap(), 13);
        assert_eq!(buf.contents().unwrap(), b"spilled bytes");
        // readable twice
        assert_eq!(buf.contents().unwrap(), b"spilled bytes");
    }

    #[test]
    fn empty_buffer() {
        let mut buf = RepairBuffer::new(true).unwrap();
        assert!(buf.is_empty().unwrap());
    }
}
