use serde::Serialize;
use thiserror::Error;

use crate::render::assets::UploadError;
use crate::render::client::{ClientInitError, ConnectivityError};
use crate::render::graph::GraphError;
use crate::render::inputs::InputError;
use crate::render::jobs::{PollError, SubmitError};
use crate::render::outputs::OutputError;
use crate::render::settings::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Provider,
    Infra,
}

/// What a caller sees when a render fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFailure {
    pub kind: FailureKind,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    ClientInit(#[from] ClientInitError),
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

impl RenderError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Settings(_) => "invalid_settings",
            Self::ClientInit(_) => "client_init_failed",
            Self::Connectivity(_) => "render_server_unreachable",
            Self::Input(InputError::Missing { .. }) => "input_missing",
            Self::Input(InputError::Surplus { .. }) => "input_surplus",
            Self::Input(InputError::FetchFailed { .. }) => "input_fetch_failed",
            Self::Input(InputError::DecodeFailed(_)) => "input_decode_failed",
            Self::Input(InputError::NotFound { .. }) => "input_not_found",
            Self::Input(InputError::WrongMediaType { .. }) => "input_wrong_media_type",
            Self::Input(InputError::Host(_)) => "input_not_found",
            Self::Upload(_) => "upload_failed",
            Self::Graph(GraphError::InvalidJson(_) | GraphError::NotAnObject) => "invalid_workflow",
            Self::Graph(GraphError::MalformedNode { .. }) => "malformed_node",
            Self::Graph(_) => "workflow_node_not_found",
            Self::Submit(SubmitError::NoJobId) => "no_job_id",
            Self::Submit(SubmitError::TransportFailed(_)) => "submit_failed",
            Self::Poll(PollError::JobFailed { .. }) => "job_failed",
            Self::Poll(PollError::Timeout { .. }) => "job_timeout",
            Self::Poll(PollError::TransportFailed(_)) => "poll_failed",
            Self::Output(OutputError::NoMatch { .. }) => "no_matching_output",
            Self::Output(OutputError::NotFound { .. }) => "output_not_found",
            Self::Output(OutputError::FetchFailed(_)) => "output_fetch_failed",
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Settings(_) | Self::Input(_) | Self::Graph(_) => FailureKind::Validation,
            Self::Submit(SubmitError::TransportFailed(_)) => FailureKind::Infra,
            Self::Submit(_) | Self::Poll(PollError::JobFailed { .. }) | Self::Output(_) => {
                FailureKind::Provider
            }
            Self::Poll(PollError::Timeout { .. }) => FailureKind::Provider,
            Self::ClientInit(_) | Self::Connectivity(_) | Self::Upload(_) | Self::Poll(_) => {
                FailureKind::Infra
            }
        }
    }

    /// Stage-level message plus the underlying description when one exists.
    pub fn failure(&self) -> RenderFailure {
        let description = match self {
            Self::Poll(PollError::JobFailed { reason, .. }) => Some(reason.clone()),
            Self::Connectivity(ConnectivityError::Unreachable { source, .. }) => {
                Some(source.to_string())
            }
            Self::ClientInit(source) => Some(source.to_string()),
            _ => None,
        };
        RenderFailure {
            kind: self.kind(),
            code: self.code(),
            message: self.to_string(),
            description,
        }
    }
}
