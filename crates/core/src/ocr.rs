use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Optical character recognition over a PNG-encoded raster.
pub trait OcrEngine {
    fn recognize(&self, png: &[u8]) -> Result<String, IngestError>;
}

/// Skips recognition; every image keeps an empty OCR text.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize(&self, _png: &[u8]) -> Result<String, IngestError> {
        Ok(String::new())
    }
}

/// Runs the `tesseract` binary with the image on stdin and text on stdout.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: PathBuf,
    pub language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, png: &[u8]) -> Result<String, IngestError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", self.language.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                IngestError::OcrFailed(format!("cannot run {}: {error}", self.binary.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(error) = stdin.write_all(png) {
                drop(stdin);
                let _ = child.kill();
                let status = child.wait()?;
                return Err(IngestError::OcrFailed(format!(
                    "writing image to tesseract failed ({status}): {error}"
                )));
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, Serialize)]
struct HttpOcrRequest<'a> {
    image_base64: String,
    media_type: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpOcrResponse {
    #[serde(default)]
    text: Option<String>,
}

/// Posts the image to a remote OCR service (`{"image_base64", "media_type"}`)
/// and reads `{"text"}` back.
pub struct HttpOcr {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcr {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, IngestError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)
            .map_err(|error| IngestError::InvalidArgument(format!("ocr endpoint {endpoint}: {error}")))?;

        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            endpoint,
            api_key,
        })
    }
}

impl OcrEngine for HttpOcr {
    fn recognize(&self, png: &[u8]) -> Result<String, IngestError> {
        let payload = HttpOcrRequest {
            image_base64: STANDARD.encode(png),
            media_type: "image/png",
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: HttpOcrResponse = response.json()?;
        Ok(payload.text.unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrBackend {
    Tesseract,
    Http,
    None,
}

impl std::str::FromStr for OcrBackend {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Ok(OcrBackend::Tesseract),
            "http" => Ok(OcrBackend::Http),
            "none" | "off" => Ok(OcrBackend::None),
            other => Err(IngestError::InvalidArgument(format!(
                "unknown OCR backend '{other}', expected tesseract, http or none"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub backend: OcrBackend,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub tesseract: TesseractOcr,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackend::Tesseract,
            endpoint: None,
            api_key: None,
            tesseract: TesseractOcr::default(),
        }
    }
}

impl OcrConfig {
    pub fn build(&self) -> Result<Box<dyn OcrEngine + Send + Sync>, IngestError> {
        match self.backend {
            OcrBackend::None => Ok(Box::new(NoOcr)),
            OcrBackend::Tesseract => Ok(Box::new(self.tesseract.clone())),
            OcrBackend::Http => {
                let endpoint = self
                    .endpoint
                    .as_deref()
                    .map(str::trim)
                    .filter(|endpoint| !endpoint.is_empty())
                    .ok_or_else(|| {
                        IngestError::InvalidArgument("http OCR requires an endpoint".to_string())
                    })?;
                Ok(Box::new(HttpOcr::new(endpoint, non_empty(self.api_key.clone()))?))
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}
