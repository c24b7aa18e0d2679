use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod matte;
pub mod solver;

pub use solver::find_quality_for_target;

/// Decoded RGBA pixel grid: row-major, top-left origin, four bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CoreError> {
        let expected = (width as usize) * (height as usize) * 4;
        if data.len() != expected {
            return Err(CoreError::BufferShape {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Buffer filled with a single RGBA value.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            other => Err(CoreError::UnknownFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    /// File extension by convention (`jpeg` downloads as `.jpg`).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    /// PNG is lossless; quality only means something for the other two.
    pub fn is_lossy(&self) -> bool {
        !matches!(self, Self::Png)
    }
}

/// Encoded output bytes plus the format tag they were produced with.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Quality the encoder actually used; `None` for lossless output.
    pub quality: Option<u8>,
}

impl EncodedImage {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of the size-targeting quality search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityResult {
    pub quality: u8,
    pub actual_size: u64,
    pub is_exact: bool,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("resize target must be at least 1x1 (got {width}x{height})")]
    InvalidDimension { width: u32, height: u32 },
    #[error("pixel buffer length {actual} does not match expected {expected}")]
    BufferShape { expected: usize, actual: usize },
    #[error("unknown output format '{0}'; expected one of: png, jpeg, webp")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    DecodeError,
    EncodeError,
    InvalidDimension,
    BufferShape,
    UnknownFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn as_error_info(&self) -> ErrorInfo {
        let code = match self {
            Self::Decode(_) => ErrorCode::DecodeError,
            Self::Encode(_) => ErrorCode::EncodeError,
            Self::InvalidDimension { .. } => ErrorCode::InvalidDimension,
            Self::BufferShape { .. } => ErrorCode::BufferShape,
            Self::UnknownFormat(_) => ErrorCode::UnknownFormat,
        };
        ErrorInfo {
            code,
            message: self.to_string(),
        }
    }
}

/// Decode, encode, and host-interpolation resize. Implemented by the
/// platform-backed codec crate; the core only orchestrates through it.
pub trait Codec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer, CoreError>;
    fn encode(
        &self,
        buffer: &PixelBuffer,
        format: OutputFormat,
        quality: Option<u8>,
    ) -> Result<EncodedImage, CoreError>;
    fn resize(
        &self,
        buffer: &PixelBuffer,
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer, CoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEventType {
    ProcessStart,
    ProcessSuccess,
    ProcessError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Surface {
    Cli,
    Library,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub operation: String,
    pub surface: Surface,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// One user-requested pixel transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transform {
    RemoveBackground {
        threshold: u8,
    },
    Resize {
        width: u32,
        height: u32,
        format: OutputFormat,
        quality: Option<u8>,
    },
    Convert {
        format: OutputFormat,
        quality: Option<u8>,
    },
    CompressToSize {
        target_bytes: u64,
        format: OutputFormat,
    },
}

impl Transform {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RemoveBackground { .. } => "remove-bg",
            Self::Resize { .. } => "resize",
            Self::Convert { .. } => "convert",
            Self::CompressToSize { .. } => "compress",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub source_bytes: Vec<u8>,
    pub transform: Transform,
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub image: EncodedImage,
    pub width: u32,
    pub height: u32,
    /// Present only for size-targeted compression.
    pub quality: Option<QualityResult>,
}

/// Run one transform as a sequential decode -> transform -> encode pipeline.
/// Every operation works on a fresh buffer; the request is never mutated.
pub fn process(codec: &dyn Codec, request: &ProcessRequest) -> Result<ProcessResult, CoreError> {
    let source = codec.decode(&request.source_bytes)?;
    match request.transform {
        Transform::RemoveBackground { threshold } => {
            let matted = matte::remove_background(&source, threshold);
            // Alpha transparency requires a lossless format with alpha support,
            // so the matte result is always encoded as PNG.
            let image = codec.encode(&matted, OutputFormat::Png, None)?;
            Ok(ProcessResult {
                width: matted.width(),
                height: matted.height(),
                image,
                quality: None,
            })
        }
        Transform::Resize {
            width,
            height,
            format,
            quality,
        } => {
            let resized = codec.resize(&source, width, height)?;
            let image = codec.encode(&resized, format, quality)?;
            Ok(ProcessResult {
                width: resized.width(),
                height: resized.height(),
                image,
                quality: None,
            })
        }
        Transform::Convert { format, quality } => {
            let image = codec.encode(&source, format, quality)?;
            Ok(ProcessResult {
                width: source.width(),
                height: source.height(),
                image,
                quality: None,
            })
        }
        Transform::CompressToSize {
            target_bytes,
            format,
        } => {
            let found = solver::find_quality_for_target(codec, &source, format, target_bytes)?;
            let image = codec.encode(&source, format, Some(found.quality))?;
            Ok(ProcessResult {
                width: source.width(),
                height: source.height(),
                image,
                quality: Some(found),
            })
        }
    }
}

pub fn process_with_telemetry(
    codec: &dyn Codec,
    request: &ProcessRequest,
    surface: Surface,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<ProcessResult, CoreError> {
    let start = Instant::now();
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type: TelemetryEventType::ProcessStart,
            operation: request.transform.label().to_string(),
            surface,
            duration_ms: None,
            detail: None,
        });
    }
    match process(codec, request) {
        Ok(result) => {
            if let Some(sink) = telemetry {
                let detail = match result.quality {
                    Some(found) => format!(
                        "format={},size={},quality={},exact={}",
                        result.image.format.as_str(),
                        result.image.len(),
                        found.quality,
                        found.is_exact
                    ),
                    None => format!(
                        "format={},size={}",
                        result.image.format.as_str(),
                        result.image.len()
                    ),
                };
                sink.emit(TelemetryEvent {
                    event_type: TelemetryEventType::ProcessSuccess,
                    operation: request.transform.label().to_string(),
                    surface,
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    detail: Some(detail),
                });
            }
            Ok(result)
        }
        Err(err) => {
            if let Some(sink) = telemetry {
                sink.emit(TelemetryEvent {
                    event_type: TelemetryEventType::ProcessError,
                    operation: request.transform.label().to_string(),
                    surface,
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    detail: Some(err.to_string()),
                });
            }
            Err(err)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::stub::StubCodec;
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn buffer_shape_is_enforced() {
        let err = PixelBuffer::new(2, 2, vec![0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::BufferShape {
                expected: 16,
                actual: 15
            }
        ));
        assert!(PixelBuffer::new(2, 2, vec![0u8; 16]).is_ok());
    }

    #[test]
    fn format_parsing_accepts_jpg_alias() {
        assert_eq!(OutputFormat::parse("JPG").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse("jpeg").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse("png").unwrap(), OutputFormat::Png);
        assert_eq!(OutputFormat::parse("WebP").unwrap(), OutputFormat::Webp);
        assert!(OutputFormat::parse("gif").is_err());
    }

    #[test]
    fn jpeg_extension_is_jpg() {
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert_eq!(OutputFormat::Png.extension(), "png");
    }

    #[test]
    fn remove_background_always_encodes_png() {
        let codec = StubCodec::new(1_000, 100);
        let request = ProcessRequest {
            source_bytes: vec![1, 2, 3],
            transform: Transform::RemoveBackground {
                threshold: matte::DEFAULT_THRESHOLD,
            },
        };
        let result = process(&codec, &request).expect("matte pipeline should succeed");
        assert_eq!(result.image.format, OutputFormat::Png);
        assert_eq!(result.image.quality, None);
    }

    #[test]
    fn resize_pipeline_reports_target_dimensions() {
        let codec = StubCodec::new(1_000, 100);
        let request = ProcessRequest {
            source_bytes: vec![1],
            transform: Transform::Resize {
                width: 3,
                height: 5,
                format: OutputFormat::Png,
                quality: None,
            },
        };
        let result = process(&codec, &request).expect("resize pipeline should succeed");
        assert_eq!((result.width, result.height), (3, 5));
    }

    #[test]
    fn compress_pipeline_carries_quality_result() {
        let codec = StubCodec::new(1_000, 100);
        let request = ProcessRequest {
            source_bytes: vec![1],
            transform: Transform::CompressToSize {
                target_bytes: 6_000,
                format: OutputFormat::Jpeg,
            },
        };
        let result = process(&codec, &request).expect("compress pipeline should succeed");
        let found = result.quality.expect("compress result includes quality");
        assert_eq!(found.quality, 50);
        assert!(found.is_exact);
        assert_eq!(result.image.format, OutputFormat::Jpeg);
    }

    #[test]
    fn decode_failure_is_terminal_and_reported() {
        struct CollectingSink(Mutex<Vec<TelemetryEvent>>);
        impl TelemetrySink for CollectingSink {
            fn emit(&self, event: TelemetryEvent) {
                self.0.lock().unwrap().push(event);
            }
        }

        let codec = StubCodec::new(1_000, 100);
        let sink = CollectingSink(Mutex::new(Vec::new()));
        let request = ProcessRequest {
            source_bytes: Vec::new(),
            transform: Transform::Convert {
                format: OutputFormat::Png,
                quality: None,
            },
        };
        let err = process_with_telemetry(&codec, &request, Surface::Cli, Some(&sink)).unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event_type, TelemetryEventType::ProcessStart));
        assert!(matches!(events[1].event_type, TelemetryEventType::ProcessError));
    }
}
