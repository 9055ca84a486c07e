use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::host::AttachmentHost;
use crate::render::assets::{upload_asset, AssetReference};
use crate::render::client::RenderClient;
use crate::render::error::RenderError;
use crate::render::graph::WorkflowGraph;
use crate::render::inputs::{InputError, InputResolver, InputSource};
use crate::render::jobs::{submit_job, JobPoller, SharedPollClock, StdPollClock};
use crate::render::outputs::resolve_output;
use crate::render::packaging::{package_result, RenderOutput};
use crate::render::patching::{locate_input_nodes, patch_workflow, NodeTargets, PipelineParams};
use crate::render::profiles::PipelineProfile;
use crate::render::settings::RenderSettings;
use crate::render::InputRole;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderRequest {
    pub workflow_json: String,
    /// One source per input slot, in slot order.
    pub inputs: Vec<InputSource>,
    pub params: PipelineParams,
    pub targets: NodeTargets,
    pub timeout_minutes: Option<u32>,
}

/// One engine for every pipeline kind; the profile carries the differences.
#[derive(Clone)]
pub struct RenderPipeline {
    client: RenderClient,
    clock: SharedPollClock,
    default_timeout_minutes: u32,
}

impl RenderPipeline {
    pub fn new(client: RenderClient, clock: SharedPollClock, default_timeout_minutes: u32) -> Self {
        Self {
            client,
            clock,
            default_timeout_minutes,
        }
    }

    pub fn from_settings(settings: &RenderSettings) -> Result<Self, RenderError> {
        let client = RenderClient::from_settings(settings)?;
        Ok(Self::new(
            client,
            Arc::new(StdPollClock),
            settings.timeout_minutes,
        ))
    }

    pub fn client(&self) -> &RenderClient {
        &self.client
    }

    pub fn run(
        &self,
        profile: &PipelineProfile,
        request: &RenderRequest,
        host: &dyn AttachmentHost,
    ) -> Result<RenderOutput, RenderError> {
        let mut graph = WorkflowGraph::parse(request.workflow_json.as_str())?;
        let input_nodes =
            locate_input_nodes(&graph, profile, request.targets.input_node_ids.as_slice())?;
        let sources = required_sources(profile, request)?;
        info!(
            pipeline = profile.kind.as_str(),
            nodes = graph.len(),
            inputs = sources.len(),
            "render started"
        );

        self.client.probe()?;

        let mut assets = Vec::with_capacity(sources.len());
        let mut resolver = InputResolver::new(&self.client, host);
        for (slot, source) in sources.iter().enumerate() {
            let role = InputRole::from_slot(slot);
            let uploaded = resolver
                .resolve(source, role, profile.input_media)
                .map_err(RenderError::from)
                .and_then(|input| upload_asset(&self.client, &input, role).map_err(RenderError::from));
            match uploaded {
                Ok(asset) => assets.push(asset),
                Err(err) => return Err(note_orphans(&assets, err)),
            }
        }

        let client_id = Uuid::new_v4().to_string();
        let job = patch_workflow(
            &mut graph,
            profile,
            input_nodes.as_slice(),
            assets.as_slice(),
            &request.params,
            &request.targets,
        )
        .map_err(RenderError::from)
        .and_then(|_| submit_job(&self.client, &graph, client_id.as_str()).map_err(RenderError::from))
        .map_err(|err| note_orphans(&assets, err))?;

        let timeout_minutes = request
            .timeout_minutes
            .unwrap_or(self.default_timeout_minutes);
        let poller = JobPoller::new(
            &self.client,
            self.clock.as_ref(),
            profile.schedule,
            timeout_minutes,
        );
        let bundle = poller.wait_for_completion(&job)?;

        let output = resolve_output(&self.client, &bundle, profile.output_media)?;
        let result = package_result(
            output.bytes,
            output.artifact.filename.as_str(),
            &output.format,
            &request.params,
            &job,
        );
        info!(
            job_id = job.job_id.as_str(),
            file = result.json.file_name.as_str(),
            size = result.json.file_size.as_str(),
            "render finished"
        );
        Ok(result)
    }
}

fn required_sources<'r>(
    profile: &PipelineProfile,
    request: &'r RenderRequest,
) -> Result<&'r [InputSource], InputError> {
    let needed = profile.input_arity.count();
    let supplied = request.inputs.len();
    if supplied < needed {
        let role = InputRole::from_slot(supplied);
        return Err(InputError::Missing {
            role: role.as_str(),
        });
    }
    if supplied > needed {
        return Err(InputError::Surplus {
            pipeline: profile.kind.as_str(),
            expected: needed,
            supplied,
        });
    }
    Ok(request.inputs.as_slice())
}

/// Uploaded assets are not removed when a later stage fails.
fn note_orphans(assets: &[AssetReference], err: RenderError) -> RenderError {
    if !assets.is_empty() {
        let names = assets.iter().map(|a| a.name.as_str()).collect::<Vec<_>>();
        warn!(assets = ?names, code = err.code(), "uploaded inputs left unreferenced on render server");
    }
    err
}
