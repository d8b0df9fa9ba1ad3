use crate::error::{Result, SwarmError};
use crate::piece::PieceLayout;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Where piece bytes live. The engine only ever reads and writes whole pieces.
pub trait PieceStore: Send + Sync + 'static {
    fn read_piece(&self, index: usize) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn write_piece(&self, index: usize, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

/// Stores the shared file as one file on disk
pub struct FileStore {
    path: PathBuf,
    layout: PieceLayout,
}

impl FileStore {
    /// Open the file backing the store.
    ///
    /// Without the file, a zero-filled file of the full size is created so
    /// pieces can be written at their offsets in any order.
    pub async fn open<P: AsRef<Path>>(path: P, layout: PieceLayout, has_file: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if has_file {
            let metadata = fs::metadata(&path).await.map_err(|e| {
                SwarmError::StorageError(format!("Cannot open {}: {}", path.display(), e))
            })?;
            if metadata.len() != layout.file_size {
                return Err(SwarmError::StorageError(format!(
                    "{} is {} bytes, expected {}",
                    path.display(),
                    metadata.len(),
                    layout.file_size
                )));
            }
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&path)
                .await?;
            file.set_len(layout.file_size).await?;
        }

        info!(
            "Storage initialized at {}: {} pieces, {} bytes total",
            path.display(),
            layout.num_pieces(),
            layout.file_size
        );

        Ok(Self { path, layout })
    }

    fn piece_len(&self, index: usize) -> Result<u64> {
        self.layout.piece_len(index).ok_or_else(|| {
            SwarmError::StorageError(format!("Invalid piece index {}", index))
        })
    }
}

impl PieceStore for FileStore {
    async fn read_piece(&self, index: usize) -> Result<Vec<u8>> {
        let length = self.piece_len(index)?;

        let mut file = File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(self.layout.offset(index))).await?;

        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer).await?;

        debug!("Read piece {} ({} bytes)", index, length);
        Ok(buffer)
    }

    async fn write_piece(&self, index: usize, data: &[u8]) -> Result<()> {
        let length = self.piece_len(index)?;
        if data.len() as u64 != length {
            return Err(SwarmError::StorageError(format!(
                "Piece {} has {} bytes, expected {}",
                index,
                data.len(),
                length
            )));
        }

        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(self.layout.offset(index))).await?;
        file.write_all(data).await?;
        file.flush().await?;

        debug!("Wrote piece {} ({} bytes)", index, length);
        Ok(())
    }
}

/// Keeps pieces in memory; used to drive the engine in tests
#[cfg(test)]
pub struct MemoryStore {
    layout: PieceLayout,
    pieces: tokio::sync::Mutex<Vec<Option<Vec<u8>>>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn empty(layout: PieceLayout) -> Self {
        Self {
            layout,
            pieces: tokio::sync::Mutex::new(vec![None; layout.num_pieces()]),
        }
    }

    /// Every piece filled with its own index as the byte value
    pub fn seeded(layout: PieceLayout) -> Self {
        let pieces = (0..layout.num_pieces())
            .map(|index| Some(vec![index as u8; layout.piece_len(index).unwrap_or(0) as usize]))
            .collect();
        Self {
            layout,
            pieces: tokio::sync::Mutex::new(pieces),
        }
    }

    pub async fn get(&self, index: usize) -> Option<Vec<u8>> {
        self.pieces.lock().await.get(index).cloned().flatten()
    }
}

#[cfg(test)]
impl PieceStore for MemoryStore {
    async fn read_piece(&self, index: usize) -> Result<Vec<u8>> {
        self.get(index)
            .await
            .ok_or_else(|| SwarmError::StorageError(format!("Piece {} not stored", index)))
    }

    async fn write_piece(&self, index: usize, data: &[u8]) -> Result<()> {
        if self.layout.piece_len(index) != Some(data.len() as u64) {
            return Err(SwarmError::StorageError(format!("Bad write to piece {}", index)));
        }
        self.pieces.lock().await[index] = Some(data.to_vec());
        Ok(())
    }
}
