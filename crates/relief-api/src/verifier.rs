//! Image verification for field reports.
//!
//! Enum dispatch over the backends, as async methods are not
//! dyn-compatible. The HTTP backend forwards to an external
//! verification service; the mock backend is deterministic and used
//! whenever no service URL is configured.

use relief_types::{ImageVerification, VerificationStatus};
use serde::Deserialize;

use crate::error::ApiError;

/// Markers in an image URL that the mock backend flags as suspicious.
const SUSPICIOUS_MARKERS: &[&str] = &["fake", "edited", "manipulated", "stock"];

/// An image verification backend.
pub enum ImageVerifier {
    /// External HTTP verification service.
    Http(HttpVerifier),
    /// Deterministic offline verifier.
    Mock,
}

impl ImageVerifier {
    /// Build the verifier for an optional service URL.
    pub fn from_service_url(url: Option<&str>) -> Self {
        url.map_or(Self::Mock, |url| Self::Http(HttpVerifier::new(url)))
    }

    /// Verify the image at `image_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Rejected`] if the URL is not `http(s)`, and
    /// [`ApiError::Upstream`] if the external service fails.
    pub async fn verify(&self, image_url: &str) -> Result<ImageVerification, ApiError> {
        let image_url = image_url.trim();
        if !(image_url.starts_with("http://") || image_url.starts_with("https://")) {
            return Err(ApiError::Rejected(format!(
                "image_url must be an http(s) URL (got `{image_url}`)"
            )));
        }
        match self {
            Self::Http(backend) => backend.verify(image_url).await,
            Self::Mock => Ok(mock_verdict(image_url)),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Http(_) => "http",
            Self::Mock => "mock",
        }
    }
}

fn mock_verdict(image_url: &str) -> ImageVerification {
    let lower = image_url.to_ascii_lowercase();
    let marker = SUSPICIOUS_MARKERS.iter().find(|m| lower.contains(**m));
    let (status, details) = marker.map_or_else(
        || {
            (
                VerificationStatus::Verified,
                String::from("No signs of manipulation detected"),
            )
        },
        |m| {
            (
                VerificationStatus::Suspicious,
                format!("Image URL carries manipulation marker `{m}`"),
            )
        },
    );
    ImageVerification {
        image_url: image_url.to_owned(),
        status,
        details,
    }
}

/// Client for an external verification service.
///
/// Sends `POST {url}` with `{"image_url": ...}` and expects
/// `{"status": "...", "details": "..."}` back.
pub struct HttpVerifier {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct ServiceVerdict {
    status: VerificationStatus,
    #[serde(default)]
    details: String,
}

impl HttpVerifier {
    /// Create a client for the service at `url`.
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_owned(),
        }
    }

    async fn verify(&self, image_url: &str) -> Result<ImageVerification, ApiError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "image_url": image_url }))
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("verification request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ApiError::Upstream(format!(
                "verification service returned {status}: {error_body}"
            )));
        }

        let verdict: ServiceVerdict = response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("verification response parse failed: {e}")))?;

        Ok(ImageVerification {
            image_url: image_url.to_owned(),
            status: verdict.status,
            details: verdict.details,
        })
    }
}
