use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, info};

use crate::host::{AttachmentHost, AttachmentInfo, HostError};
use crate::render::client::RenderClient;
use crate::render::outputs::classify_suffix;
use crate::render::{InputRole, MediaClass};

/// Attachment names conventionally used for the second input of a dual
/// pipeline when the requested name is absent.
pub const SECONDARY_ALTERNATE_NAMES: &[&str] = &[
    "image2",
    "image_2",
    "second_image",
    "secondImage",
    "data2",
    "data_2",
];

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Url(String),
    Inline(String),
    Attachment(String),
}

impl InputSource {
    /// Parses `url:<u>`, `inline:<base64>` or `attach:<name>`. Bare http(s)
    /// URLs are accepted as `url:`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("url:") {
            return Some(Self::Url(rest.trim().to_string()));
        }
        if let Some(rest) = raw.strip_prefix("inline:") {
            return Some(Self::Inline(rest.trim().to_string()));
        }
        if let Some(rest) = raw.strip_prefix("attach:") {
            return Some(Self::Attachment(rest.trim().to_string()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(Self::Url(raw.to_string()));
        }
        None
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Url(_) => SourceKind::Url,
            Self::Inline(_) => SourceKind::Inline,
            Self::Attachment(_) => SourceKind::NamedAttachment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Url,
    Inline,
    NamedAttachment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub source_kind: SourceKind,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("missing {role} input")]
    Missing { role: &'static str },
    #[error("{pipeline} pipeline takes {expected} input(s), got {supplied}")]
    Surplus {
        pipeline: &'static str,
        expected: usize,
        supplied: usize,
    },
    #[error("failed to fetch input '{url}': {message}")]
    FetchFailed { url: String, message: String },
    #[error("inline input is not valid base64: {0}")]
    DecodeFailed(String),
    #[error("no attachment '{name}' (or {expected_prefix}* fallback) on input row {row}")]
    NotFound {
        name: String,
        row: usize,
        expected_prefix: &'static str,
    },
    #[error("attachment '{name}' is {mime_type}, expected {expected_prefix}*")]
    WrongMediaType {
        name: String,
        mime_type: String,
        expected_prefix: &'static str,
    },
    #[error("failed to read attachment: {0}")]
    Host(#[from] HostError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateStrategy {
    ExactName,
    ConventionalAlternate,
    MediaTypeScan,
}

impl CandidateStrategy {
    pub const ORDER: [Self; 3] = [
        Self::ExactName,
        Self::ConventionalAlternate,
        Self::MediaTypeScan,
    ];

    fn validates_media_type(self) -> bool {
        !matches!(self, Self::MediaTypeScan)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttachmentQuery<'a> {
    pub name: &'a str,
    pub role: InputRole,
    pub media: MediaClass,
    /// Attachment names on the same row already consumed by this invocation.
    pub consumed: &'a [String],
}

impl CandidateStrategy {
    fn pick<'a>(
        self,
        attachments: &'a [AttachmentInfo],
        query: &AttachmentQuery<'_>,
    ) -> Option<&'a AttachmentInfo> {
        let unconsumed = |info: &&AttachmentInfo| !query.consumed.contains(&info.name);
        match self {
            Self::ExactName => attachments.iter().find(|info| info.name == query.name),
            Self::ConventionalAlternate => {
                if query.role != InputRole::Secondary {
                    return None;
                }
                let mut candidates = attachments
                    .iter()
                    .filter(unconsumed)
                    .filter(|info| SECONDARY_ALTERNATE_NAMES.contains(&info.name.as_str()));
                match (candidates.next(), candidates.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
            Self::MediaTypeScan => attachments
                .iter()
                .filter(unconsumed)
                .find(|info| info.mime_type.starts_with(query.media.mime_prefix())),
        }
    }
}

/// Runs the candidate strategies in order and validates the winner.
pub fn select_attachment(
    attachments: &[AttachmentInfo],
    row: usize,
    query: &AttachmentQuery<'_>,
) -> Result<(AttachmentInfo, CandidateStrategy), InputError> {
    let expected_prefix = query.media.mime_prefix();
    for strategy in CandidateStrategy::ORDER {
        let Some(found) = strategy.pick(attachments, query) else {
            continue;
        };
        if strategy.validates_media_type() && !found.mime_type.starts_with(expected_prefix) {
            return Err(InputError::WrongMediaType {
                name: found.name.clone(),
                mime_type: found.mime_type.clone(),
                expected_prefix,
            });
        }
        return Ok((found.clone(), strategy));
    }
    Err(InputError::NotFound {
        name: query.name.to_string(),
        row,
        expected_prefix,
    })
}

/// Row 0 serves the primary input; the secondary input reads row 1 when the
/// host presents more than one row.
pub fn row_for_role(host: &dyn AttachmentHost, role: InputRole) -> usize {
    match role {
        InputRole::Secondary if host.row_count() > 1 => 1,
        _ => 0,
    }
}

pub struct InputResolver<'a> {
    client: &'a RenderClient,
    host: &'a dyn AttachmentHost,
    consumed: Vec<(usize, String)>,
}

impl<'a> InputResolver<'a> {
    pub fn new(client: &'a RenderClient, host: &'a dyn AttachmentHost) -> Self {
        Self {
            client,
            host,
            consumed: Vec::new(),
        }
    }

    pub fn resolve(
        &mut self,
        source: &InputSource,
        role: InputRole,
        media: MediaClass,
    ) -> Result<ResolvedInput, InputError> {
        let resolved = match source {
            InputSource::Url(url) => self.resolve_url(url.as_str())?,
            InputSource::Inline(encoded) => decode_inline(encoded.as_str())?,
            InputSource::Attachment(name) => self.resolve_attachment(name.as_str(), role, media)?,
        };
        info!(
            role = role.as_str(),
            source = ?resolved.source_kind,
            bytes = resolved.bytes.len(),
            mime = resolved.mime_type.as_str(),
            "input resolved"
        );
        Ok(resolved)
    }

    fn resolve_url(&self, url: &str) -> Result<ResolvedInput, InputError> {
        let fetch_failed = |message: String| InputError::FetchFailed {
            url: url.to_string(),
            message,
        };
        let resp = self
            .client
            .fetch_external(url)
            .map_err(|e| fetch_failed(e.to_string()))?;
        if !resp.is_success() {
            return Err(fetch_failed(format!("HTTP {}", resp.status)));
        }
        let file_name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let mime_type = resp
            .content_type
            .as_deref()
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != OCTET_STREAM)
            .map(str::to_string)
            .or_else(|| {
                file_name
                    .as_deref()
                    .and_then(classify_suffix)
                    .map(|format| format.mime_type.to_string())
            })
            .or_else(|| sniff_mime(resp.body.as_slice()))
            .unwrap_or_else(|| String::from(OCTET_STREAM));
        Ok(ResolvedInput {
            source_kind: SourceKind::Url,
            bytes: resp.body,
            mime_type,
            file_name,
        })
    }

    fn resolve_attachment(
        &mut self,
        name: &str,
        role: InputRole,
        media: MediaClass,
    ) -> Result<ResolvedInput, InputError> {
        let row = row_for_role(self.host, role);
        let consumed = self
            .consumed
            .iter()
            .filter(|(consumed_row, _)| *consumed_row == row)
            .map(|(_, consumed_name)| consumed_name.clone())
            .collect::<Vec<_>>();
        let attachments = self.host.attachments(row);
        let (found, strategy) = select_attachment(
            attachments.as_slice(),
            row,
            &AttachmentQuery {
                name,
                role,
                media,
                consumed: consumed.as_slice(),
            },
        )?;
        debug!(
            requested = name,
            selected = found.name.as_str(),
            row,
            strategy = ?strategy,
            "attachment selected"
        );
        let bytes = self.host.attachment_bytes(row, found.name.as_str())?;
        self.consumed.push((row, found.name.clone()));
        Ok(ResolvedInput {
            source_kind: SourceKind::NamedAttachment,
            bytes,
            mime_type: found.mime_type,
            file_name: found.file_name,
        })
    }
}

pub fn decode_inline(encoded: &str) -> Result<ResolvedInput, InputError> {
    let trimmed = encoded.trim();
    let (declared_mime, payload) = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                InputError::DecodeFailed(String::from("data URI has no ',' separator"))
            })?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| InputError::DecodeFailed(String::from("data URI is not base64")))?;
            (Some(mime.to_string()).filter(|m| !m.is_empty()), payload)
        }
        None => (None, trimmed),
    };
    let compact = payload
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect::<String>();
    let bytes = BASE64_STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| InputError::DecodeFailed(e.to_string()))?;
    let mime_type = declared_mime
        .or_else(|| sniff_mime(bytes.as_slice()))
        .unwrap_or_else(|| String::from(OCTET_STREAM));
    Ok(ResolvedInput {
        source_kind: SourceKind::Inline,
        bytes,
        mime_type,
        file_name: None,
    })
}

fn sniff_mime(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryAttachments;
    use crate::render::test_support::{bytes_response, status_response, FakeTransport};
    use std::sync::Arc;
    use url::Url;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn info(name: &str, mime: &str) -> AttachmentInfo {
        AttachmentInfo {
            name: name.to_string(),
            mime_type: mime.to_string(),
            file_name: None,
        }
    }

    fn query<'a>(name: &'a str, role: InputRole, consumed: &'a [String]) -> AttachmentQuery<'a> {
        AttachmentQuery {
            name,
            role,
            media: MediaClass::Image,
            consumed,
        }
    }

    fn client(fake: &FakeTransport) -> RenderClient {
        let base = Url::parse("http://render.local:8188").expect("url");
        RenderClient::new(Arc::new(fake.clone()), &base, Some(String::from("tok")))
    }

    #[test]
    fn parses_source_descriptors() {
        assert_eq!(
            InputSource::parse("url:http://a/b.png"),
            Some(InputSource::Url(String::from("http://a/b.png")))
        );
        assert_eq!(
            InputSource::parse("https://a/b.png"),
            Some(InputSource::Url(String::from("https://a/b.png")))
        );
        assert_eq!(
            InputSource::parse("attach:data"),
            Some(InputSource::Attachment(String::from("data")))
        );
        assert_eq!(
            InputSource::parse("inline:aGk="),
            Some(InputSource::Inline(String::from("aGk=")))
        );
        assert_eq!(InputSource::parse("ftp://nope"), None);
    }

    #[test]
    fn exact_name_wins_over_fallbacks() {
        let attachments = vec![info("photo", "image/jpeg"), info("data", "image/png")];
        let (found, strategy) =
            select_attachment(&attachments, 0, &query("data", InputRole::Primary, &[]))
                .expect("exact match");
        assert_eq!(found.name, "data");
        assert_eq!(strategy, CandidateStrategy::ExactName);
    }

    #[test]
    fn absent_name_falls_back_to_single_image_attachment() {
        let attachments = vec![info("notes", "text/plain"), info("photo", "image/webp")];
        let (found, strategy) =
            select_attachment(&attachments, 0, &query("data", InputRole::Primary, &[]))
                .expect("fallback match");
        assert_eq!(found.name, "photo");
        assert_eq!(strategy, CandidateStrategy::MediaTypeScan);
    }

    #[test]
    fn absent_name_without_matching_media_is_not_found() {
        let attachments = vec![info("notes", "text/plain"), info("clip", "video/mp4")];
        let err = select_attachment(&attachments, 0, &query("data", InputRole::Primary, &[]))
            .expect_err("nothing image-like");
        assert_eq!(
            err,
            InputError::NotFound {
                name: String::from("data"),
                row: 0,
                expected_prefix: "image/",
            }
        );
    }

    #[test]
    fn exact_match_with_wrong_media_type_is_rejected() {
        let attachments = vec![info("data", "application/pdf"), info("photo", "image/png")];
        let err = select_attachment(&attachments, 0, &query("data", InputRole::Primary, &[]))
            .expect_err("pdf is not an image");
        assert!(matches!(err, InputError::WrongMediaType { .. }));
    }

    #[test]
    fn secondary_role_prefers_single_conventional_alternate() {
        let consumed = vec![String::from("data")];
        let attachments = vec![
            info("data", "image/png"),
            info("reference", "image/png"),
            info("image2", "image/jpeg"),
        ];
        let (found, strategy) = select_attachment(
            &attachments,
            0,
            &query("data1", InputRole::Secondary, &consumed),
        )
        .expect("alternate match");
        assert_eq!(found.name, "image2");
        assert_eq!(strategy, CandidateStrategy::ConventionalAlternate);

        let (found, _) =
            select_attachment(&attachments, 0, &query("data1", InputRole::Primary, &[]))
                .expect("primary scans media types instead");
        assert_eq!(found.name, "data");
    }

    #[test]
    fn ambiguous_conventional_alternates_fall_through_to_scan() {
        let consumed = vec![String::from("data")];
        let attachments = vec![
            info("data", "image/png"),
            info("image_2", "image/png"),
            info("data2", "image/png"),
        ];
        let (found, strategy) = select_attachment(
            &attachments,
            0,
            &query("second", InputRole::Secondary, &consumed),
        )
        .expect("scan match");
        assert_eq!(found.name, "image_2");
        assert_eq!(strategy, CandidateStrategy::MediaTypeScan);
    }

    #[test]
    fn secondary_reads_second_row_only_when_present() {
        let single = InMemoryAttachments::new().with(0, "data", "image/png", vec![1]);
        assert_eq!(row_for_role(&single, InputRole::Secondary), 0);
        let double = single.clone().with(1, "data", "image/png", vec![2]);
        assert_eq!(row_for_role(&double, InputRole::Secondary), 1);
        assert_eq!(row_for_role(&double, InputRole::Primary), 0);
    }

    fn two_images_on_one_row() -> InMemoryAttachments {
        InMemoryAttachments::new()
            .with(0, "data", "image/png", vec![1])
            .with(0, "reference", "image/png", vec![2])
    }

    #[test]
    fn exact_name_match_is_honored_even_when_already_taken() {
        let host = two_images_on_one_row();
        let fake = FakeTransport::default();
        let client = client(&fake);
        let mut resolver = InputResolver::new(&client, &host);

        let first = resolver
            .resolve(
                &InputSource::Attachment(String::from("data")),
                InputRole::Primary,
                MediaClass::Image,
            )
            .expect("first");
        let second = resolver
            .resolve(
                &InputSource::Attachment(String::from("data")),
                InputRole::Secondary,
                MediaClass::Image,
            )
            .expect("second");
        assert_eq!(first.bytes, vec![1]);
        assert_eq!(second.bytes, vec![1]);
        assert_eq!(fake.seen_count(), 0);
    }

    #[test]
    fn media_scan_skips_the_attachment_already_taken() {
        let host = two_images_on_one_row();
        let fake = FakeTransport::default();
        let client = client(&fake);
        let mut resolver = InputResolver::new(&client, &host);

        resolver
            .resolve(
                &InputSource::Attachment(String::from("data")),
                InputRole::Primary,
                MediaClass::Image,
            )
            .expect("first");
        let second = resolver
            .resolve(
                &InputSource::Attachment(String::from("second")),
                InputRole::Secondary,
                MediaClass::Image,
            )
            .expect("second falls back to scan");
        assert_eq!(second.bytes, vec![2]);
        assert_eq!(fake.seen_count(), 0);
    }

    #[test]
    fn url_inputs_are_fetched_without_credentials() {
        let fake = FakeTransport::default().route(
            "http://cdn.example/in/a.png?sig=1",
            bytes_response("image/png; charset=binary", PNG_MAGIC),
        );
        let client = client(&fake);
        let host = InMemoryAttachments::new();
        let mut resolver = InputResolver::new(&client, &host);

        let resolved = resolver
            .resolve(
                &InputSource::Url(String::from("http://cdn.example/in/a.png?sig=1")),
                InputRole::Primary,
                MediaClass::Image,
            )
            .expect("url resolves");
        assert_eq!(resolved.source_kind, SourceKind::Url);
        assert_eq!(resolved.mime_type, "image/png");
        assert_eq!(resolved.file_name.as_deref(), Some("a.png"));
        assert_eq!(fake.take_seen()[0].bearer_token, None);
    }

    #[test]
    fn url_non_success_is_fetch_failed() {
        let fake = FakeTransport::default().route("http://cdn.example/gone.png", status_response(404));
        let client = client(&fake);
        let host = InMemoryAttachments::new();
        let mut resolver = InputResolver::new(&client, &host);
        let err = resolver
            .resolve(
                &InputSource::Url(String::from("http://cdn.example/gone.png")),
                InputRole::Primary,
                MediaClass::Image,
            )
            .expect_err("404");
        assert_eq!(
            err,
            InputError::FetchFailed {
                url: String::from("http://cdn.example/gone.png"),
                message: String::from("HTTP 404"),
            }
        );
    }

    #[test]
    fn inline_accepts_plain_and_data_uri_base64() {
        let plain = decode_inline(BASE64_STANDARD.encode(PNG_MAGIC).as_str()).expect("plain");
        assert_eq!(plain.bytes, PNG_MAGIC);
        assert_eq!(plain.mime_type, "image/png");

        let uri = format!("data:image/webp;base64,{}", BASE64_STANDARD.encode(b"abc"));
        let decoded = decode_inline(uri.as_str()).expect("data uri");
        assert_eq!(decoded.bytes, b"abc");
        assert_eq!(decoded.mime_type, "image/webp");
    }

    #[test]
    fn inline_rejects_malformed_base64() {
        assert!(matches!(
            decode_inline("***not base64***"),
            Err(InputError::DecodeFailed(_))
        ));
        assert!(matches!(
            decode_inline("data:image/png,plain"),
            Err(InputError::DecodeFailed(_))
        ));
    }
}
