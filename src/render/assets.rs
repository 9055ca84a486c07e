use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::render::client::{RenderClient, UPLOAD_IMAGE_PATH};
use crate::render::inputs::ResolvedInput;
use crate::render::outputs::{classify_suffix, extension_for_mime};
use crate::render::InputRole;
use crate::transport::{MultipartBody, MultipartFile, RequestBody};

const UPLOAD_FIELD: &str = "image";
const FALLBACK_EXTENSION: &str = "bin";

/// Server-assigned handle for an uploaded input. Opaque to this crate apart
/// from the string written into a loader node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub namespace: String,
}

impl AssetReference {
    pub fn node_value(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("failed to upload input: {0}")]
    TransportFailed(String),
    #[error("upload response is not an asset reference: {0}")]
    MalformedResponse(String),
}

/// `<role>_<uuid>.<ext>`; the extension comes from the original file name,
/// then the declared mime type.
pub fn upload_file_name(role: InputRole, input: &ResolvedInput, id: Uuid) -> String {
    let extension = input
        .file_name
        .as_deref()
        .and_then(classify_suffix)
        .map(|format| format.extension)
        .or_else(|| extension_for_mime(input.mime_type.as_str()))
        .unwrap_or(FALLBACK_EXTENSION);
    format!("{}_{}.{}", role.as_str(), id.simple(), extension)
}

pub fn upload_asset(
    client: &RenderClient,
    input: &ResolvedInput,
    role: InputRole,
) -> Result<AssetReference, UploadError> {
    let file_name = upload_file_name(role, input, Uuid::new_v4());
    let body = RequestBody::Multipart(MultipartBody {
        file: MultipartFile {
            field: UPLOAD_FIELD.to_string(),
            file_name: file_name.clone(),
            mime_type: input.mime_type.clone(),
            bytes: input.bytes.clone(),
        },
        text_fields: vec![
            (String::from("subfolder"), String::new()),
            (String::from("overwrite"), String::from("true")),
        ],
    });
    let resp = client
        .post(UPLOAD_IMAGE_PATH, body)
        .map_err(|e| UploadError::TransportFailed(e.to_string()))?;
    if !resp.is_success() {
        return Err(UploadError::TransportFailed(format!(
            "HTTP {}: {}",
            resp.status,
            resp.text_lossy().trim()
        )));
    }
    let reference = resp
        .json::<AssetReference>()
        .map_err(|e| UploadError::MalformedResponse(e.to_string()))?;
    if reference.name.trim().is_empty() {
        return Err(UploadError::MalformedResponse(String::from(
            "asset name is empty",
        )));
    }
    info!(
        role = role.as_str(),
        uploaded_as = file_name.as_str(),
        asset = reference.name.as_str(),
        "input uploaded"
    );
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::inputs::SourceKind;
    use crate::render::test_support::{json_response, status_response, FakeTransport};
    use serde_json::json;
    use std::sync::Arc;
    use url::Url;

    fn client(fake: &FakeTransport) -> RenderClient {
        let base = Url::parse("http://render.local:8188").expect("url");
        RenderClient::new(Arc::new(fake.clone()), &base, Some(String::from("tok")))
    }

    fn input(file_name: Option<&str>, mime: &str) -> ResolvedInput {
        ResolvedInput {
            source_kind: SourceKind::Inline,
            bytes: vec![1, 2, 3],
            mime_type: mime.to_string(),
            file_name: file_name.map(str::to_string),
        }
    }

    #[test]
    fn upload_names_are_role_scoped_and_keep_a_sensible_extension() {
        let id = Uuid::nil();
        assert_eq!(
            upload_file_name(InputRole::Primary, &input(Some("photo.JPEG"), "image/jpeg"), id),
            "primary_00000000000000000000000000000000.jpeg"
        );
        assert_eq!(
            upload_file_name(InputRole::Secondary, &input(None, "image/jpeg"), id),
            "secondary_00000000000000000000000000000000.jpg"
        );
        assert_eq!(
            upload_file_name(InputRole::Primary, &input(None, "application/octet-stream"), id),
            "primary_00000000000000000000000000000000.bin"
        );
    }

    #[test]
    fn upload_sends_multipart_with_overwrite_and_parses_reference() {
        let fake = FakeTransport::default().route(
            "/upload/image",
            json_response(200, json!({"name": "a.png", "subfolder": "", "type": "input"})),
        );
        let reference = upload_asset(
            &client(&fake),
            &input(Some("a.png"), "image/png"),
            InputRole::Primary,
        )
        .expect("uploaded");
        assert_eq!(
            reference,
            AssetReference {
                name: String::from("a.png"),
                subfolder: String::new(),
                namespace: String::from("input"),
            }
        );
        assert_eq!(reference.node_value(), "a.png");

        let seen = fake.take_seen();
        assert_eq!(seen[0].bearer_token.as_deref(), Some("tok"));
        let RequestBody::Multipart(form) = &seen[0].body else {
            panic!("expected multipart body");
        };
        assert_eq!(form.file.field, "image");
        assert!(form.file.file_name.starts_with("primary_"));
        assert!(form.file.file_name.ends_with(".png"));
        assert_eq!(form.file.bytes, vec![1, 2, 3]);
        assert_eq!(
            form.text_fields,
            vec![
                (String::from("subfolder"), String::new()),
                (String::from("overwrite"), String::from("true")),
            ]
        );
    }

    #[test]
    fn subfolder_is_prefixed_into_node_value() {
        let reference = AssetReference {
            name: String::from("b.png"),
            subfolder: String::from("runs"),
            namespace: String::from("input"),
        };
        assert_eq!(reference.node_value(), "runs/b.png");
    }

    #[test]
    fn upload_failures_are_classified() {
        let fake = FakeTransport::default().route("/upload/image", status_response(413));
        assert!(matches!(
            upload_asset(&client(&fake), &input(None, "image/png"), InputRole::Primary),
            Err(UploadError::TransportFailed(_))
        ));

        let fake = FakeTransport::default()
            .route("/upload/image", json_response(200, json!({"ok": true})));
        assert!(matches!(
            upload_asset(&client(&fake), &input(None, "image/png"), InputRole::Primary),
            Err(UploadError::MalformedResponse(_))
        ));
    }
}
