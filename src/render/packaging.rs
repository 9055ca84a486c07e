use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::ImageReader;
use serde::Serialize;

use crate::render::jobs::JobHandle;
use crate::render::outputs::ContainerFormat;
use crate::render::patching::PipelineParams;
use crate::render::MediaClass;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub media_kind: &'static str,
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub mime_type: String,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: String,
    pub data: String,
    #[serde(flatten)]
    pub metadata: ResultMetadata,
}

/// The artifact as a host-side binary attachment. `bytes` is the raw payload;
/// `data` mirrors it as base64.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryAttachment {
    pub mime_type: String,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: String,
    pub data: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutput {
    pub json: ResultRecord,
    pub binary: BinaryAttachment,
}

/// Kilobytes with one decimal, e.g. `12.3 KB`.
pub fn size_label(byte_len: usize) -> String {
    format!("{:.1} KB", byte_len as f64 / 1024.0)
}

fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn derive_metadata(
    bytes: &[u8],
    format: &ContainerFormat,
    params: &PipelineParams,
    job: &JobHandle,
) -> ResultMetadata {
    let mut metadata = ResultMetadata {
        duration_seconds: None,
        frame_count: None,
        frame_rate: None,
        width: None,
        height: None,
        media_kind: format.kind.as_str(),
        job_id: job.job_id.clone(),
    };
    match format.kind {
        MediaClass::Image => {
            if let Some((width, height)) = image_dimensions(bytes) {
                metadata.width = Some(width);
                metadata.height = Some(height);
            }
        }
        MediaClass::Video => {
            metadata.frame_count = params.frame_count;
            metadata.frame_rate = params.frame_rate.filter(|fps| *fps > 0.0);
            metadata.width = params.width;
            metadata.height = params.height;
            metadata.duration_seconds = match (metadata.frame_count, metadata.frame_rate) {
                (Some(frames), Some(fps)) => Some(f64::from(frames) / fps),
                _ => None,
            };
        }
        MediaClass::Audio => {
            metadata.duration_seconds = params.duration_seconds.filter(|secs| *secs > 0.0);
        }
    }
    metadata
}

pub fn package_result(
    bytes: Vec<u8>,
    file_name: &str,
    format: &ContainerFormat,
    params: &PipelineParams,
    job: &JobHandle,
) -> RenderOutput {
    let metadata = derive_metadata(bytes.as_slice(), format, params, job);
    let data = BASE64_STANDARD.encode(bytes.as_slice());
    let file_size = size_label(bytes.len());
    RenderOutput {
        json: ResultRecord {
            mime_type: format.mime_type.to_string(),
            file_name: file_name.to_string(),
            file_extension: format.extension.to_string(),
            file_size: file_size.clone(),
            data: data.clone(),
            metadata,
        },
        binary: BinaryAttachment {
            mime_type: format.mime_type.to_string(),
            file_name: file_name.to_string(),
            file_extension: format.extension.to_string(),
            file_size,
            data,
            bytes,
        },
    }
}
