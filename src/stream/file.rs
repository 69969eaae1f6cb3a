//! Read-only file-backed byte stream.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::warn;

use crate::error::{AudioError, AudioResult};
use crate::stream::{clamp_position, ByteStream, SeekOrigin};

pub struct FileStream {
    file: File,
    length: u32,
    position: u32,
}

impl FileStream {
    /// Opens a file for streaming. Files larger than 4 GiB are rejected.
    pub fn open<P: AsRef<Path>>(path: P) -> AudioResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|_| AudioError::NotFound(path.display().to_string()))?;
        let meta = file.metadata()?;
        let length = u32::try_from(meta.len()).map_err(|_| {
            AudioError::Unsupported(format!("{}: over 4 GiB", path.display()))
        })?;
        Ok(Self {
            file,
            length,
            position: 0,
        })
    }
}

impl ByteStream for FileStream {
    fn length(&self) -> u32 {
        self.length
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> u32 {
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => self.position,
            SeekOrigin::End => self.length,
        };
        let target = clamp_position(base, offset, self.length);
        match self.file.seek(SeekFrom::Start(target as u64)) {
            Ok(_) => self.position = target,
            Err(e) => warn!("file stream seek failed: {e}"),
        }
        self.position
    }

    fn read_next(&mut self, buf: &mut [u8]) -> u32 {
        let left = (self.length - self.position) as usize;
        let want = buf.len().min(left);
        let mut done = 0usize;
        while done < want {
            match self.file.read(&mut buf[done..want]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("file stream read failed: {e}");
                    break;
                }
            }
        }
        self.position += done as u32;
        done as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(data: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn open_missing_file_is_not_found() {
        assert!(matches!(
            FileStream::open("/no/such/clipstream-fixture.ogg"),
            Err(AudioError::NotFound(_))
        ));
    }

    #[test]
    fn reads_and_reports_length() {
        let f = temp_with(&[10, 20, 30, 40, 50]);
        let mut s = FileStream::open(f.path()).unwrap();
        assert_eq!(s.length(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(s.read_next(&mut buf), 3);
        assert_eq!(buf, [10, 20, 30]);
        assert_eq!(s.tell(), 3);

        // Short read at the tail, then zero.
        let mut buf = [0u8; 8];
        assert_eq!(s.read_next(&mut buf), 2);
        assert_eq!(&buf[..2], &[40, 50]);
        assert_eq!(s.read_next(&mut buf), 0);
    }

    #[test]
    fn seeks_clamp_to_bounds() {
        let f = temp_with(&[0u8; 100]);
        let mut s = FileStream::open(f.path()).unwrap();
        assert_eq!(s.seek(-10, SeekOrigin::Begin), 0);
        assert_eq!(s.seek(40, SeekOrigin::Begin), 40);
        assert_eq!(s.seek(30, SeekOrigin::Current), 70);
        assert_eq!(s.seek(500, SeekOrigin::Current), 100);
        assert_eq!(s.seek(-1, SeekOrigin::End), 99);
    }
}
