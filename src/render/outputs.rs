use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::render::client::RenderClient;
use crate::render::MediaClass;

pub const ACCEPTED_CONTAINER_CLASSES: &[&str] = &["output", "temp"];

/// Suffixes that mark an `images` bucket entry as an animation or video.
pub const ANIMATED_IMAGE_SUFFIXES: &[&str] = &[".gif", ".mp4", ".webm", ".mov"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub filename: String,
    pub subfolder: String,
    pub container_class: String,
    pub kind: String,
}

impl OutputArtifact {
    fn has_suffix(&self, suffixes: &[&str]) -> bool {
        let lower = self.filename.to_ascii_lowercase();
        suffixes.iter().any(|suffix| lower.ends_with(suffix))
    }
}

/// Artifacts per output node, in the order the server listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBundle {
    nodes: Vec<(String, Vec<OutputArtifact>)>,
}

impl OutputBundle {
    /// Builds a bundle from a history entry's `outputs` object. Buckets that
    /// do not hold file records (text, flags) are skipped.
    pub fn from_outputs(outputs: &Value) -> Self {
        let Some(nodes) = outputs.as_object() else {
            return Self::default();
        };
        let nodes = nodes
            .iter()
            .map(|(node_id, buckets)| {
                let artifacts = buckets
                    .as_object()
                    .into_iter()
                    .flatten()
                    .flat_map(|(bucket, items)| {
                        items
                            .as_array()
                            .into_iter()
                            .flatten()
                            .filter_map(move |item| parse_artifact(bucket.as_str(), item))
                    })
                    .collect::<Vec<_>>();
                (node_id.clone(), artifacts)
            })
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[(String, Vec<OutputArtifact>)] {
        self.nodes.as_slice()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &OutputArtifact> {
        self.nodes.iter().flat_map(|(_, artifacts)| artifacts.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts().next().is_none()
    }
}

fn parse_artifact(bucket: &str, item: &Value) -> Option<OutputArtifact> {
    let filename = item.get("filename").and_then(Value::as_str)?;
    let text = |key: &str, default: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    Some(OutputArtifact {
        filename: filename.to_string(),
        subfolder: text("subfolder", ""),
        container_class: text("type", "output"),
        kind: bucket.to_string(),
    })
}

pub fn bucket_matches(media: MediaClass, artifact: &OutputArtifact) -> bool {
    match (media, artifact.kind.as_str()) {
        (MediaClass::Image, "images") => true,
        (MediaClass::Video, "videos" | "gifs") => true,
        (MediaClass::Video, "images") => artifact.has_suffix(ANIMATED_IMAGE_SUFFIXES),
        (MediaClass::Audio, "audio" | "audios") => true,
        _ => false,
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("completed job produced no {media} output")]
    NoMatch { media: &'static str },
    #[error("output '{filename}' was not found on the render server")]
    NotFound { filename: String },
    #[error("failed to download output: {0}")]
    FetchFailed(String),
}

pub fn select_artifact(
    bundle: &OutputBundle,
    media: MediaClass,
) -> Result<&OutputArtifact, OutputError> {
    bundle
        .artifacts()
        .filter(|artifact| bucket_matches(media, artifact))
        .find(|artifact| ACCEPTED_CONTAINER_CLASSES.contains(&artifact.container_class.as_str()))
        .ok_or(OutputError::NoMatch {
            media: media.as_str(),
        })
}

pub fn fetch_artifact(
    client: &RenderClient,
    artifact: &OutputArtifact,
) -> Result<Vec<u8>, OutputError> {
    let url = client.view_url(
        artifact.filename.as_str(),
        artifact.subfolder.as_str(),
        artifact.container_class.as_str(),
    );
    let resp = client
        .get_url(url.as_str())
        .map_err(|e| OutputError::FetchFailed(e.to_string()))?;
    match resp.status {
        404 => Err(OutputError::NotFound {
            filename: artifact.filename.clone(),
        }),
        _ if resp.is_success() => Ok(resp.body),
        status => Err(OutputError::FetchFailed(format!("HTTP {status}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
    pub kind: MediaClass,
}

const fn container(mime_type: &'static str, extension: &'static str, kind: MediaClass) -> ContainerFormat {
    ContainerFormat {
        mime_type,
        extension,
        kind,
    }
}

const SUFFIX_TABLE: &[ContainerFormat] = &[
    container("image/png", "png", MediaClass::Image),
    container("image/jpeg", "jpg", MediaClass::Image),
    container("image/jpeg", "jpeg", MediaClass::Image),
    container("image/webp", "webp", MediaClass::Image),
    container("image/gif", "gif", MediaClass::Image),
    container("image/bmp", "bmp", MediaClass::Image),
    container("video/mp4", "mp4", MediaClass::Video),
    container("video/webm", "webm", MediaClass::Video),
    container("video/quicktime", "mov", MediaClass::Video),
    container("video/x-matroska", "mkv", MediaClass::Video),
    container("video/x-msvideo", "avi", MediaClass::Video),
    container("audio/mpeg", "mp3", MediaClass::Audio),
    container("audio/wav", "wav", MediaClass::Audio),
    container("audio/flac", "flac", MediaClass::Audio),
    container("audio/ogg", "ogg", MediaClass::Audio),
    container("audio/mp4", "m4a", MediaClass::Audio),
    container("audio/opus", "opus", MediaClass::Audio),
];

pub fn classify_suffix(filename: &str) -> Option<ContainerFormat> {
    let (_, suffix) = filename.rsplit_once('.')?;
    let suffix = suffix.to_ascii_lowercase();
    SUFFIX_TABLE
        .iter()
        .find(|entry| entry.extension == suffix.as_str())
        .copied()
}

/// Preferred file extension for a declared mime type.
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    SUFFIX_TABLE
        .iter()
        .find(|entry| entry.mime_type.eq_ignore_ascii_case(essence))
        .map(|entry| entry.extension)
}

impl ContainerFormat {
    pub fn fallback_for(media: MediaClass) -> Self {
        match media {
            MediaClass::Image => container("image/png", "png", MediaClass::Image),
            MediaClass::Video => container("video/mp4", "mp4", MediaClass::Video),
            MediaClass::Audio => container("audio/mpeg", "mp3", MediaClass::Audio),
        }
    }

    pub fn classify(filename: &str, fallback: MediaClass) -> Self {
        classify_suffix(filename).unwrap_or_else(|| Self::fallback_for(fallback))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub artifact: OutputArtifact,
    pub bytes: Vec<u8>,
    pub format: ContainerFormat,
}

pub fn resolve_output(
    client: &RenderClient,
    bundle: &OutputBundle,
    media: MediaClass,
) -> Result<ResolvedOutput, OutputError> {
    let artifact = select_artifact(bundle, media)?;
    let bytes = fetch_artifact(client, artifact)?;
    let format = ContainerFormat::classify(artifact.filename.as_str(), media);
    info!(
        filename = artifact.filename.as_str(),
        bucket = artifact.kind.as_str(),
        mime = format.mime_type,
        bytes = bytes.len(),
        "output downloaded"
    );
    Ok(ResolvedOutput {
        artifact: artifact.clone(),
        bytes,
        format,
    })
}
