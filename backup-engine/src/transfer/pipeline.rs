//! Per-file seal/open transforms.
//!
//! Seal: plaintext -> gzip (optional) -> AES-256-CBC (optional) -> artifact.
//! Open is the exact inverse. When encryption is on, the artifact starts with
//! the 16-byte IV. Both directions stream in fixed-size chunks and write to a
//! temporary sibling that is renamed into place only on success, so a failed
//! transform never leaves a partial destination behind.

use super::cipher::{BlockDecryptor, BlockEncryptor, IV_LEN};
use super::hash::HashingReader;
use crate::keys::EncryptionKey;
use crate::utils::errors::{EngineError, Result};
use async_compression::tokio::bufread::GzipEncoder;
use async_compression::tokio::write::GzipDecoder;
use async_compression::Level;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    pub compress: bool,
    pub encrypt: bool,
}

/// What a seal produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealSummary {
    /// Hex SHA-256 of the plaintext as read
    pub plaintext_hash: String,
    pub plaintext_bytes: u64,
    /// Artifact size including the IV
    pub sealed_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    chunk_size: usize,
}

impl Pipeline {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(IV_LEN),
        }
    }

    /// Seal `source` into `dest`, hashing the plaintext in the same pass.
    pub async fn seal(
        &self,
        source: &Path,
        dest: &Path,
        options: TransformOptions,
        key: Option<&EncryptionKey>,
    ) -> Result<SealSummary> {
        let key = require_key(options.encrypt, key)?;
        let staging = staging_path(dest).await?;

        let result = self.seal_to(source, &staging, options.compress, key).await;
        finalize(&staging, dest, result).await
    }

    async fn seal_to(
        &self,
        source: &Path,
        staging: &Path,
        compress: bool,
        key: Option<&EncryptionKey>,
    ) -> Result<SealSummary> {
        let hashing = HashingReader::new(File::open(source).await?);
        let reader = BufReader::with_capacity(self.chunk_size, hashing);
        let mut out = BufWriter::with_capacity(self.chunk_size, File::create(staging).await?);

        let (written, hashing) = if compress {
            let mut encoder = GzipEncoder::with_quality(reader, Level::Default);
            let written = self.encrypt_stream(&mut encoder, &mut out, key).await;
            (written, encoder.into_inner().into_inner())
        } else {
            let mut reader = reader;
            let written = self.encrypt_stream(&mut reader, &mut out, key).await;
            (written, reader.into_inner())
        };
        let sealed_bytes = written.map_err(|e| transform_error(source, e))?;
        out.shutdown().await.map_err(|e| transform_error(source, e))?;

        let plaintext_bytes = hashing.bytes_read();
        debug!(
            "Sealed {} ({} -> {} bytes)",
            source.display(),
            plaintext_bytes,
            sealed_bytes
        );
        Ok(SealSummary {
            plaintext_hash: hashing.finalize(),
            plaintext_bytes,
            sealed_bytes,
        })
    }

    async fn encrypt_stream<R>(
        &self,
        reader: &mut R,
        out: &mut BufWriter<File>,
        key: Option<&EncryptionKey>,
    ) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut encryptor = match key {
            Some(key) => {
                let iv = fresh_iv();
                out.write_all(&iv).await?;
                Some(BlockEncryptor::new(key, &iv))
            }
            None => None,
        };
        let mut written = if encryptor.is_some() { IV_LEN as u64 } else { 0 };
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let sealed;
            let chunk: &[u8] = match encryptor.as_mut() {
                Some(enc) => {
                    sealed = enc.update(&buf[..n]);
                    &sealed
                }
                None => &buf[..n],
            };
            out.write_all(chunk).await?;
            written += chunk.len() as u64;
        }

        if let Some(enc) = encryptor {
            let tail = enc.finish();
            out.write_all(&tail).await?;
            written += tail.len() as u64;
        }
        Ok(written)
    }

    /// Open the artifact `source` into the file `dest`.
    pub async fn open(
        &self,
        source: &Path,
        dest: &Path,
        options: TransformOptions,
        key: Option<&EncryptionKey>,
    ) -> Result<()> {
        let key = require_key(options.encrypt, key)?;
        let staging = staging_path(dest).await?;

        let result: Result<()> = async {
            let out = BufWriter::with_capacity(self.chunk_size, File::create(&staging).await?);
            self.open_into(source, out, options, key).await?;
            Ok(())
        }
        .await;
        finalize(&staging, dest, result).await
    }

    /// Stream the plaintext of `source` into `writer`, which is shut down and
    /// handed back on success.
    pub async fn open_into<W>(
        &self,
        source: &Path,
        writer: W,
        options: TransformOptions,
        key: Option<&EncryptionKey>,
    ) -> Result<W>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let key = require_key(options.encrypt, key)?;
        let mut reader = BufReader::with_capacity(self.chunk_size, File::open(source).await?);

        let decryptor = match key {
            Some(key) => {
                let iv = read_iv(&mut reader, source).await?;
                Some(BlockDecryptor::new(key, &iv))
            }
            None => None,
        };

        if options.compress {
            let mut decoder = GzipDecoder::new(writer);
            self.decrypt_stream(&mut reader, &mut decoder, decryptor, source).await?;
            decoder.shutdown().await.map_err(|e| transform_error(source, e))?;
            Ok(decoder.into_inner())
        } else {
            let mut writer = writer;
            self.decrypt_stream(&mut reader, &mut writer, decryptor, source).await?;
            writer.shutdown().await.map_err(|e| transform_error(source, e))?;
            Ok(writer)
        }
    }

    async fn decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        mut decryptor: Option<BlockDecryptor>,
        source: &Path,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| transform_error(source, e))?;
            if n == 0 {
                break;
            }
            let plain;
            let chunk: &[u8] = match decryptor.as_mut() {
                Some(dec) => {
                    plain = dec.update(&buf[..n]);
                    &plain
                }
                None => &buf[..n],
            };
            writer.write_all(chunk).await.map_err(|e| transform_error(source, e))?;
        }

        if let Some(dec) = decryptor {
            let tail = dec.finish().map_err(|e| match e {
                EngineError::TransformFailed(msg) => {
                    EngineError::TransformFailed(format!("{}: {}", source.display(), msg))
                }
                other => other,
            })?;
            writer.write_all(&tail).await.map_err(|e| transform_error(source, e))?;
        }
        Ok(())
    }
}

fn require_key(encrypt: bool, key: Option<&EncryptionKey>) -> Result<Option<&EncryptionKey>> {
    match (encrypt, key) {
        (false, _) => Ok(None),
        (true, Some(key)) => Ok(Some(key)),
        (true, None) => Err(EngineError::TransformFailed(
            "encryption requested without a key".to_string(),
        )),
    }
}

fn fresh_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);
    iv
}

async fn read_iv<R: AsyncRead + Unpin>(reader: &mut R, source: &Path) -> Result<[u8; IV_LEN]> {
    let mut iv = [0u8; IV_LEN];
    match reader.read_exact(&mut iv).await {
        Ok(_) => Ok(iv),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(EngineError::CorruptArtifact(
            format!("{}: missing initialization vector", source.display()),
        )),
        Err(e) => Err(e.into()),
    }
}

fn transform_error(source: &Path, e: std::io::Error) -> EngineError {
    EngineError::TransformFailed(format!("{}: {}", source.display(), e))
}

/// Create the destination's parent and pick a hidden sibling to write into
async fn staging_path(dest: &Path) -> Result<PathBuf> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(dest.with_file_name(format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple())))
}

async fn finalize<T>(staging: &Path, dest: &Path, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(e) = tokio::fs::rename(staging, dest).await {
                let _ = tokio::fs::remove_file(staging).await;
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(staging).await;
            Err(e)
        }
    }
}
