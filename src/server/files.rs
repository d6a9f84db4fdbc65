//! Shared file storage for in-band uploads and downloads

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::info;

use crate::error::{RelayError, Result};
use crate::protocol::frame::FrameReader;

/// Upload chunk size while streaming a payload to disk.
const CHUNK_SIZE: usize = 8 * 1024;

/// Flat directory of uploaded files, keyed by filename. A re-upload of the
/// same name overwrites the previous copy.
pub struct FileRelay {
    dir: PathBuf,
}

impl FileRelay {
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Strip any client-supplied path, keeping only the final component.
    fn storage_path(&self, name: &str) -> PathBuf {
        let base = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.dir.join(base)
    }

    /// Stream `len` payload bytes from the connection into storage.
    ///
    /// The reader is positioned right after the upload announcement, so the
    /// next `len` bytes on the wire are the raw file body. A short read is a
    /// transfer error; the partial file is removed.
    pub async fn save<R: AsyncRead + Unpin>(
        &self,
        name: &str,
        len: u64,
        reader: &mut FrameReader<R>,
    ) -> Result<()> {
        let path = self.storage_path(name);
        let mut file = tokio::fs::File::create(&path).await?;

        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let chunk = reader.read_chunk(want).await?;
            if chunk.is_empty() {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(RelayError::transfer(format!(
                    "upload of {} truncated with {} bytes missing",
                    name, remaining
                )));
            }
            file.write_all(&chunk).await?;
            remaining -= chunk.len() as u64;
        }
        file.flush().await?;
        info!("Stored file {} ({} bytes)", path.display(), len);
        Ok(())
    }

    /// Load a stored file in full. Returns `None` if no such file exists.
    pub async fn load(&self, name: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.storage_path(name)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
