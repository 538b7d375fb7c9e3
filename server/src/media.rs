//! Image hosting for message attachments.
//!
//! Clients upload images inline as base64 data URLs. [`LocalImageHost`]
//! decodes them into `data_dir/images` and serves them back from
//! `GET /images/{name}`.

use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("image must be a base64 data URL")]
    InvalidDataUrl,
    #[error("image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("image store I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// `uploadImage(data) -> URL`
pub trait ImageHost: Send + Sync {
    fn upload(&self, data_url: &str) -> Result<String, MediaError>;
}

pub struct LocalImageHost {
    dir: PathBuf,
    max_bytes: usize,
}

impl LocalImageHost {
    pub fn new(data_dir: &str, max_bytes: usize) -> Result<Self, MediaError> {
        let dir = FsPath::new(data_dir).join("images");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &FsPath {
        &self.dir
    }
}

impl ImageHost for LocalImageHost {
    fn upload(&self, data_url: &str) -> Result<String, MediaError> {
        let (mime, payload) = split_data_url(data_url).ok_or(MediaError::InvalidDataUrl)?;

        // base64 inflates by 4/3; reject before decoding anything huge
        if payload.len() / 4 * 3 > self.max_bytes + 3 {
            return Err(MediaError::TooLarge {
                size: payload.len() / 4 * 3,
                limit: self.max_bytes,
            });
        }
        let bytes = STANDARD.decode(payload)?;
        if bytes.len() > self.max_bytes {
            return Err(MediaError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let name = format!("{}.{}", uuid::Uuid::now_v7(), extension_for(mime));
        std::fs::write(self.dir.join(&name), &bytes)?;
        tracing::debug!(name = %name, bytes = bytes.len(), "Image stored");
        Ok(format!("/images/{name}"))
    }
}

/// `data:image/png;base64,AAAA` → ("image/png", "AAAA")
fn split_data_url(data_url: &str) -> Option<(&str, &str)> {
    let rest = data_url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    if !mime.starts_with("image/") {
        return None;
    }
    Some((mime, payload))
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// GET /images/{name} -- Serve a stored image. Public.
pub async fn get_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Names are generated server-side; anything with a separator is not ours
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ApiError::NotFound);
    }

    let bytes = tokio::fs::read(state.image_dir.join(&name))
        .await
        .map_err(|_| ApiError::NotFound)?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&name))], bytes))
}
