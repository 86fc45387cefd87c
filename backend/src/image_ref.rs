use crate::inference::InferenceError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::time::Instant;
use url::Url;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ImageRefError {
    #[error("No image data provided")]
    Empty,
    #[error("Unsupported image reference")]
    Unsupported,
    #[error("Image payload is not valid base64")]
    InvalidBase64,
    #[error("Payload is not a recognized image format")]
    UnknownFormat,
    #[error("Image exceeds the {0} byte limit")]
    TooLarge(usize),
}

/// An image submitted for scanning: either carried inline or hosted elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    Inline { mime_type: String, data: String },
    Remote(Url),
}

impl ImageRef {
    /// Accepts a `data:image/...;base64,` URI, an http(s) URL, or a bare base64 payload.
    pub fn parse(text: &str) -> Result<Self, ImageRefError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ImageRefError::Empty);
        }

        if let Some(rest) = text.strip_prefix("data:") {
            let (meta, payload) = rest.split_once(',').ok_or(ImageRefError::Unsupported)?;
            let mime_type = meta
                .strip_suffix(";base64")
                .filter(|mime| mime.starts_with("image/"))
                .ok_or(ImageRefError::Unsupported)?;
            let bytes = STANDARD
                .decode(payload)
                .map_err(|_| ImageRefError::InvalidBase64)?;
            if bytes.is_empty() {
                return Err(ImageRefError::Empty);
            }
            check_size(&bytes)?;
            image::guess_format(&bytes).map_err(|_| ImageRefError::UnknownFormat)?;
            return Ok(ImageRef::Inline {
                mime_type: mime_type.to_string(),
                data: payload.to_string(),
            });
        }

        if text.starts_with("http://") || text.starts_with("https://") {
            let url = Url::parse(text).map_err(|_| ImageRefError::Unsupported)?;
            return Ok(ImageRef::Remote(url));
        }

        let bytes = STANDARD
            .decode(text)
            .map_err(|_| ImageRefError::InvalidBase64)?;
        Self::from_bytes(&bytes)
    }

    /// Builds an inline reference from raw upload bytes, sniffing the format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageRefError> {
        if bytes.is_empty() {
            return Err(ImageRefError::Empty);
        }
        check_size(bytes)?;
        let format = image::guess_format(bytes).map_err(|_| ImageRefError::UnknownFormat)?;
        Ok(ImageRef::Inline {
            mime_type: format.to_mime_type().to_string(),
            data: STANDARD.encode(bytes),
        })
    }

    /// SHA-256 of the reference, used in logs and history instead of the image itself.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            ImageRef::Inline { data, .. } => hasher.update(data.as_bytes()),
            ImageRef::Remote(url) => hasher.update(url.as_str().as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    pub fn short_digest(&self) -> String {
        let mut digest = self.digest();
        digest.truncate(12);
        digest
    }

    /// The `image_url` value the model server accepts. Remote images are fetched
    /// and inlined since the server only reads data URIs.
    pub async fn to_model_url(&self, http: &reqwest::Client) -> Result<String, InferenceError> {
        match self {
            ImageRef::Inline { mime_type, data } => Ok(format!("data:{};base64,{}", mime_type, data)),
            ImageRef::Remote(url) => {
                let started = Instant::now();
                let host = url.host_str().unwrap_or("unknown host").to_string();
                let fetch_failed = |reason: String| InferenceError::Invocation {
                    reason,
                    elapsed: started.elapsed(),
                };

                let response = http
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| fetch_failed(format!("failed to fetch image from {}: {}", host, e)))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| fetch_failed(format!("failed to read image from {}: {}", host, e)))?;

                match ImageRef::from_bytes(&bytes) {
                    Ok(ImageRef::Inline { mime_type, data }) => {
                        Ok(format!("data:{};base64,{}", mime_type, data))
                    }
                    Ok(ImageRef::Remote(_)) => Err(fetch_failed(format!(
                        "image from {} could not be inlined",
                        host
                    ))),
                    Err(e) => Err(fetch_failed(format!("image from {} rejected: {}", host, e))),
                }
            }
        }
    }
}

fn check_size(bytes: &[u8]) -> Result<(), ImageRefError> {
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ImageRefError::TooLarge(MAX_IMAGE_BYTES));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest valid PNG header run; enough for format sniffing.
    pub(crate) const PNG_BYTES: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R',
    ];

    pub(crate) fn png_data_uri() -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(PNG_BYTES))
    }

    #[test]
    fn data_uri_is_inline() {
        let image = ImageRef::parse(&png_data_uri()).unwrap();
        match image {
            ImageRef::Inline { mime_type, data } => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(STANDARD.decode(data).unwrap(), PNG_BYTES);
            }
            other => panic!("expected inline image, got {:?}", other),
        }
    }

    #[test]
    fn bare_base64_is_sniffed() {
        let image = ImageRef::parse(&STANDARD.encode(PNG_BYTES)).unwrap();
        assert!(matches!(image, ImageRef::Inline { ref mime_type, .. } if mime_type == "image/png"));
    }

    #[test]
    fn url_is_remote() {
        let image = ImageRef::parse("https://cdn.example.edu/scans/chair.jpg").unwrap();
        assert!(matches!(image, ImageRef::Remote(_)));
    }

    #[test]
    fn rejects_bad_references() {
        assert!(matches!(ImageRef::parse("   "), Err(ImageRefError::Empty)));
        assert!(matches!(
            ImageRef::parse("data:text/plain;base64,aGVsbG8="),
            Err(ImageRefError::Unsupported)
        ));
        assert!(matches!(
            ImageRef::parse("not base64 at all!"),
            Err(ImageRefError::InvalidBase64)
        ));
        assert!(matches!(
            ImageRef::parse(&STANDARD.encode(b"plain text, not an image")),
            Err(ImageRefError::UnknownFormat)
        ));
        assert!(matches!(
            ImageRef::parse("data:image/png;base64,"),
            Err(ImageRefError::Empty)
        ));
        assert!(matches!(
            ImageRef::parse("data:image/png;base64,aGVsbG8="),
            Err(ImageRefError::UnknownFormat)
        ));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let mut bytes = PNG_BYTES.to_vec();
        bytes.resize(MAX_IMAGE_BYTES + 1, 0);
        assert!(matches!(
            ImageRef::from_bytes(&bytes),
            Err(ImageRefError::TooLarge(_))
        ));
    }

    #[test]
    fn digest_is_stable_and_hides_payload() {
        let first = ImageRef::parse(&png_data_uri()).unwrap();
        let second = ImageRef::from_bytes(PNG_BYTES).unwrap();
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.digest().len(), 64);
        assert_eq!(first.short_digest().len(), 12);
    }

    #[actix_web::test]
    async fn inline_image_becomes_data_uri() {
        let image = ImageRef::from_bytes(PNG_BYTES).unwrap();
        let url = image.to_model_url(&reqwest::Client::new()).await.unwrap();
        assert_eq!(url, png_data_uri());
    }
}
