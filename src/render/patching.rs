//! Rewrites a parsed workflow for one invocation: loader nodes get the
//! uploaded asset names, prompt encoders get the prompt text, and known
//! sampler/latent/video/audio parameters are swept across recognized nodes.

use tracing::{debug, info};

use crate::render::assets::AssetReference;
use crate::render::graph::{GraphError, InputValue, WorkflowGraph};
use crate::render::profiles::{InputArity, PipelineProfile};

/// Sampler kinds whose `positive` / `negative` links identify prompt nodes.
const SAMPLER_KINDS: &[&str] = &["KSampler", "KSamplerAdvanced"];

const SAMPLING_KINDS: &[&str] = &[
    "KSampler",
    "KSamplerAdvanced",
    "SamplerCustom",
    "SamplerCustomAdvanced",
    "RandomNoise",
    "KSamplerSelect",
    "BasicScheduler",
    "CFGGuider",
];

const LATENT_SIZE_KINDS: &[&str] = &[
    "EmptyLatentImage",
    "EmptySD3LatentImage",
    "EmptyHunyuanLatentVideo",
    "EmptyLTXVLatentVideo",
    "EmptyMochiLatentVideo",
    "WanImageToVideo",
    "LTXVImgToVideo",
    "SVD_img2vid_Conditioning",
    "ImageScale",
];

const FRAME_COUNT_KINDS: &[&str] = &[
    "EmptyHunyuanLatentVideo",
    "EmptyLTXVLatentVideo",
    "EmptyMochiLatentVideo",
    "WanImageToVideo",
    "LTXVImgToVideo",
    "SVD_img2vid_Conditioning",
    "HunyuanImageToVideo",
];

const FRAME_RATE_KINDS: &[&str] = &[
    "VHS_VideoCombine",
    "CreateVideo",
    "SaveAnimatedWEBP",
    "SaveAnimatedPNG",
    "LTXVConditioning",
    "SVD_img2vid_Conditioning",
];

const AUDIO_LENGTH_KINDS: &[&str] = &[
    "EmptyAceStepLatentAudio",
    "EmptyLatentAudio",
    "EmptyStableAudioLatent",
];

/// Which node kinds a parameter is swept across, and the field names it may
/// appear under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasSweep {
    pub kinds: &'static [&'static str],
    pub aliases: &'static [&'static str],
}

pub const SEED_SWEEP: AliasSweep = AliasSweep {
    kinds: SAMPLING_KINDS,
    aliases: &["seed", "noise_seed"],
};
pub const STEPS_SWEEP: AliasSweep = AliasSweep {
    kinds: SAMPLING_KINDS,
    aliases: &["steps"],
};
pub const CFG_SWEEP: AliasSweep = AliasSweep {
    kinds: SAMPLING_KINDS,
    aliases: &["cfg"],
};
pub const SAMPLER_NAME_SWEEP: AliasSweep = AliasSweep {
    kinds: SAMPLING_KINDS,
    aliases: &["sampler_name"],
};
pub const SCHEDULER_SWEEP: AliasSweep = AliasSweep {
    kinds: SAMPLING_KINDS,
    aliases: &["scheduler"],
};
pub const DENOISE_SWEEP: AliasSweep = AliasSweep {
    kinds: SAMPLING_KINDS,
    aliases: &["denoise"],
};
pub const WIDTH_SWEEP: AliasSweep = AliasSweep {
    kinds: LATENT_SIZE_KINDS,
    aliases: &["width"],
};
pub const HEIGHT_SWEEP: AliasSweep = AliasSweep {
    kinds: LATENT_SIZE_KINDS,
    aliases: &["height"],
};
pub const FRAME_COUNT_SWEEP: AliasSweep = AliasSweep {
    kinds: FRAME_COUNT_KINDS,
    aliases: &["frame_count", "frames", "video_frames", "length"],
};
pub const FRAME_RATE_SWEEP: AliasSweep = AliasSweep {
    kinds: FRAME_RATE_KINDS,
    aliases: &["frame_rate", "fps"],
};
pub const AUDIO_LENGTH_SWEEP: AliasSweep = AliasSweep {
    kinds: AUDIO_LENGTH_KINDS,
    aliases: &["seconds", "duration"],
};

/// Caller-supplied generation parameters. Unset fields leave the workflow's
/// own values in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineParams {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<i64>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_count: Option<u32>,
    pub frame_rate: Option<f64>,
    pub duration_seconds: Option<f64>,
}

impl PipelineParams {
    fn sweep_values(&self) -> Vec<(AliasSweep, InputValue)> {
        let mut out = Vec::new();
        let mut push = |sweep: AliasSweep, value: Option<InputValue>| {
            if let Some(value) = value {
                out.push((sweep, value));
            }
        };
        push(SEED_SWEEP, self.seed.map(InputValue::integer));
        push(STEPS_SWEEP, self.steps.map(|v| InputValue::integer(i64::from(v))));
        push(CFG_SWEEP, self.cfg.and_then(InputValue::float));
        push(SAMPLER_NAME_SWEEP, self.sampler_name.clone().map(InputValue::Text));
        push(SCHEDULER_SWEEP, self.scheduler.clone().map(InputValue::Text));
        push(DENOISE_SWEEP, self.denoise.and_then(InputValue::float));
        push(WIDTH_SWEEP, self.width.map(|v| InputValue::integer(i64::from(v))));
        push(HEIGHT_SWEEP, self.height.map(|v| InputValue::integer(i64::from(v))));
        push(
            FRAME_COUNT_SWEEP,
            self.frame_count.map(|v| InputValue::integer(i64::from(v))),
        );
        push(FRAME_RATE_SWEEP, self.frame_rate.and_then(number_value));
        push(AUDIO_LENGTH_SWEEP, self.duration_seconds.and_then(number_value));
        out
    }
}

/// Whole values are written as integers so integer-typed widgets accept them.
fn number_value(value: f64) -> Option<InputValue> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(InputValue::integer(value as i64))
    } else {
        InputValue::float(value)
    }
}

/// Explicit node ids supplied by the caller. Empty means "locate by kind".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTargets {
    pub input_node_ids: Vec<String>,
    pub prompt_node_id: Option<String>,
    pub negative_prompt_node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub input_nodes: Vec<String>,
    pub prompt_node: Option<String>,
    pub negative_prompt_node: Option<String>,
    pub swept_fields: usize,
}

/// Picks the loader node for each input slot. Runs before any upload so that
/// a graph without the expected loaders fails without touching the server.
pub fn locate_input_nodes(
    graph: &WorkflowGraph,
    profile: &PipelineProfile,
    explicit_ids: &[String],
) -> Result<Vec<String>, GraphError> {
    let kind = profile.input_node_kind;
    let slots = profile.input_arity.count();
    let explicit = explicit_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .take(slots)
        .collect::<Vec<_>>();

    let mut chosen = Vec::with_capacity(slots);
    for id in explicit.iter() {
        graph.locate_by_id(id, kind)?;
        chosen.push(id.to_string());
    }
    if chosen.len() == slots {
        return Ok(chosen);
    }

    match profile.input_arity {
        InputArity::None => Ok(Vec::new()),
        InputArity::Single => {
            let (id, _) = graph.locate_by_kind(&[kind])?;
            Ok(vec![id.to_string()])
        }
        InputArity::Dual if chosen.is_empty() => Ok(graph.locate_pair_by_kind(kind)?.to_vec()),
        InputArity::Dual => {
            let remaining = graph
                .nodes()
                .filter(|(id, node)| node.kind == kind && !chosen.iter().any(|c| c.as_str() == *id))
                .map(|(id, _)| id.to_string())
                .next();
            match remaining {
                Some(id) => {
                    chosen.push(id);
                    Ok(chosen)
                }
                None => Err(GraphError::InsufficientMatches {
                    kind: kind.to_string(),
                    required: slots,
                    found: chosen.len(),
                }),
            }
        }
    }
}

pub fn patch_input_nodes(
    graph: &mut WorkflowGraph,
    profile: &PipelineProfile,
    node_ids: &[String],
    assets: &[AssetReference],
) -> Result<(), GraphError> {
    for (node_id, asset) in node_ids.iter().zip(assets.iter()) {
        let node = graph.node_mut(node_id)?;
        node.set_field(profile.input_field, InputValue::text(asset.node_value()));
        info!(node_id = node_id.as_str(), asset = asset.name.as_str(), "input node patched");
    }
    Ok(())
}

/// Finds the prompt node: the explicit id if given, else the node linked to a
/// sampler's `link_field`, else (for the positive prompt only) the first
/// prompt-kind node in graph order.
fn locate_prompt_node(
    graph: &WorkflowGraph,
    profile: &PipelineProfile,
    explicit_id: Option<&str>,
    link_field: &str,
    fall_back_to_kind: bool,
) -> Result<Option<String>, GraphError> {
    let kinds = profile.prompt_kinds();
    if let Some(id) = explicit_id.map(str::trim).filter(|id| !id.is_empty()) {
        graph.locate_by_id_among(id, kinds.as_slice())?;
        return Ok(Some(id.to_string()));
    }

    let linked = graph
        .nodes()
        .filter(|(_, node)| SAMPLER_KINDS.contains(&node.kind.as_str()))
        .filter_map(|(_, node)| match node.inputs.get(link_field) {
            Some(InputValue::Link(link)) => Some(link.0.as_str()),
            _ => None,
        })
        .find(|target| graph.locate_by_id_among(target, kinds.as_slice()).is_ok());
    if let Some(id) = linked {
        return Ok(Some(id.to_string()));
    }

    if fall_back_to_kind {
        let (id, _) = graph.locate_by_kind(kinds.as_slice())?;
        return Ok(Some(id.to_string()));
    }
    Ok(None)
}

fn write_prompt(
    graph: &mut WorkflowGraph,
    profile: &PipelineProfile,
    node_id: &str,
    text: &str,
) -> Result<(), GraphError> {
    let node = graph.node_mut(node_id)?;
    let field = profile
        .prompt_field_for(node.kind.as_str())
        .ok_or_else(|| GraphError::MalformedNode {
            id: node_id.to_string(),
            reason: format!("'{}' is not a prompt encoder", node.kind),
        })?;
    node.set_field(field, InputValue::text(text));
    Ok(())
}

pub fn patch_prompts(
    graph: &mut WorkflowGraph,
    profile: &PipelineProfile,
    params: &PipelineParams,
    targets: &NodeTargets,
) -> Result<(Option<String>, Option<String>), GraphError> {
    let mut prompt_node = None;
    if let Some(prompt) = params.prompt.as_deref() {
        let id = locate_prompt_node(
            graph,
            profile,
            targets.prompt_node_id.as_deref(),
            "positive",
            true,
        )?;
        if let Some(id) = id {
            write_prompt(graph, profile, id.as_str(), prompt)?;
            debug!(node_id = id.as_str(), "prompt patched");
            prompt_node = Some(id);
        }
    }

    let mut negative_node = None;
    if let Some(negative) = params.negative_prompt.as_deref() {
        let id = locate_prompt_node(
            graph,
            profile,
            targets.negative_prompt_node_id.as_deref(),
            "negative",
            false,
        )?;
        match id {
            Some(id) if prompt_node.as_deref() != Some(id.as_str()) => {
                write_prompt(graph, profile, id.as_str(), negative)?;
                debug!(node_id = id.as_str(), "negative prompt patched");
                negative_node = Some(id);
            }
            _ => debug!("no distinct negative prompt node; negative prompt ignored"),
        }
    }
    Ok((prompt_node, negative_node))
}

pub fn sweep_parameters(graph: &mut WorkflowGraph, params: &PipelineParams) -> usize {
    params
        .sweep_values()
        .into_iter()
        .map(|(sweep, value)| graph.sweep_aliases(sweep.kinds, sweep.aliases, &value))
        .sum()
}

/// Applies every patch for one invocation. `input_nodes` must come from
/// `locate_input_nodes` on the same graph.
pub fn patch_workflow(
    graph: &mut WorkflowGraph,
    profile: &PipelineProfile,
    input_nodes: &[String],
    assets: &[AssetReference],
    params: &PipelineParams,
    targets: &NodeTargets,
) -> Result<PatchReport, GraphError> {
    patch_input_nodes(graph, profile, input_nodes, assets)?;
    let (prompt_node, negative_prompt_node) = patch_prompts(graph, profile, params, targets)?;
    let swept_fields = sweep_parameters(graph, params);
    info!(
        pipeline = profile.kind.as_str(),
        inputs = input_nodes.len(),
        swept_fields,
        "workflow patched"
    );
    Ok(PatchReport {
        input_nodes: input_nodes.to_vec(),
        prompt_node,
        negative_prompt_node,
        swept_fields,
    })
}
