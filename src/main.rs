use std::path::{Path, PathBuf};

use render_bridge::host::InMemoryAttachments;
use render_bridge::render::client::RenderClient;
use render_bridge::render::inputs::InputSource;
use render_bridge::render::outputs::classify_suffix;
use render_bridge::render::patching::{NodeTargets, PipelineParams};
use render_bridge::render::settings::load_render_settings;
use render_bridge::{PipelineKind, RenderPipeline, RenderRequest};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult<()> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let rest = cli_args.iter().skip(1).cloned().collect::<Vec<_>>();
    match cli_args.first().map(String::as_str) {
        Some("probe") => run_probe_cli(rest),
        Some("run") => run_render_cli(rest),
        Some("-h" | "--help") | None => {
            print_usage();
            Ok(())
        }
        Some(unknown) => Err(std::io::Error::other(format!(
            "Unknown command: {unknown}\n\nUse --help for usage."
        ))
        .into()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct SettingsCliArgs {
    app_root: Option<PathBuf>,
    settings_path: Option<String>,
}

impl SettingsCliArgs {
    fn app_root(&self) -> CliResult<PathBuf> {
        match self.app_root.as_ref() {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttachmentArg {
    name: String,
    path: PathBuf,
    row: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct RunCliArgs {
    settings: SettingsCliArgs,
    pipeline: PipelineKind,
    workflow_path: PathBuf,
    inputs: Vec<InputSource>,
    attachments: Vec<AttachmentArg>,
    params: PipelineParams,
    targets: NodeTargets,
    timeout_minutes: Option<u32>,
    output_path: Option<PathBuf>,
}

fn parse_number<T: std::str::FromStr>(flag: &str, raw: &str) -> CliResult<T> {
    raw.trim().parse::<T>().map_err(|_| {
        std::io::Error::other(format!("Invalid numeric value for {flag}: {raw}")).into()
    })
}

/// `name=path` or `name=path@row`.
fn parse_attachment_arg(raw: &str) -> CliResult<AttachmentArg> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| std::io::Error::other(format!("Invalid --attach value: {raw}")))?;
    let (path, row) = match rest.rsplit_once('@') {
        Some((path, row)) if !row.is_empty() && row.chars().all(|c| c.is_ascii_digit()) => {
            (path, parse_number::<usize>("--attach", row)?)
        }
        _ => (rest, 0),
    };
    let name = name.trim();
    if name.is_empty() || path.trim().is_empty() {
        return Err(std::io::Error::other(format!("Invalid --attach value: {raw}")).into());
    }
    Ok(AttachmentArg {
        name: name.to_string(),
        path: PathBuf::from(path.trim()),
        row,
    })
}

fn parse_settings_flag(
    settings: &mut SettingsCliArgs,
    flag: &str,
    value: String,
) -> bool {
    match flag {
        "--app-root" => settings.app_root = Some(PathBuf::from(value)),
        "--settings" => settings.settings_path = Some(value),
        _ => return false,
    }
    true
}

fn parse_probe_cli_args(args: &[String]) -> CliResult<SettingsCliArgs> {
    let mut settings = SettingsCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let Some(value) = args.get(i + 1) else {
            return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
        };
        if !parse_settings_flag(&mut settings, flag, value.clone()) {
            return Err(std::io::Error::other(format!(
                "Unknown argument: {flag}\n\nUse --help for usage."
            ))
            .into());
        }
        i += 2;
    }
    Ok(settings)
}

fn parse_run_cli_args(args: &[String]) -> CliResult<RunCliArgs> {
    let mut settings = SettingsCliArgs::default();
    let mut pipeline = None::<PipelineKind>;
    let mut workflow_path = None::<PathBuf>;
    let mut inputs = Vec::new();
    let mut attachments = Vec::new();
    let mut params = PipelineParams::default();
    let mut targets = NodeTargets::default();
    let mut timeout_minutes = None::<u32>;
    let mut output_path = None::<PathBuf>;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let Some(value) = args.get(i + 1).cloned() else {
            return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
        };
        i += 2;
        if parse_settings_flag(&mut settings, flag, value.clone()) {
            continue;
        }

        match flag {
            "--pipeline" => {
                pipeline = Some(PipelineKind::parse(value.as_str()).ok_or_else(|| {
                    std::io::Error::other(format!(
                        "Unknown pipeline: {value} (expected image, dual-image, video, dual-image-video or audio)"
                    ))
                })?);
            }
            "--workflow" => workflow_path = Some(PathBuf::from(value)),
            "--input" => {
                let source = InputSource::parse(value.as_str()).ok_or_else(|| {
                    std::io::Error::other(format!(
                        "Invalid --input value: {value} (expected url:, inline: or attach:)"
                    ))
                })?;
                inputs.push(source);
            }
            "--attach" => attachments.push(parse_attachment_arg(value.as_str())?),
            "--prompt" => params.prompt = Some(value),
            "--negative-prompt" => params.negative_prompt = Some(value),
            "--seed" => params.seed = Some(parse_number(flag, value.as_str())?),
            "--steps" => params.steps = Some(parse_number(flag, value.as_str())?),
            "--cfg" => params.cfg = Some(parse_number(flag, value.as_str())?),
            "--sampler" => params.sampler_name = Some(value),
            "--scheduler" => params.scheduler = Some(value),
            "--denoise" => params.denoise = Some(parse_number(flag, value.as_str())?),
            "--width" => params.width = Some(parse_number(flag, value.as_str())?),
            "--height" => params.height = Some(parse_number(flag, value.as_str())?),
            "--frames" => params.frame_count = Some(parse_number(flag, value.as_str())?),
            "--fps" => params.frame_rate = Some(parse_number(flag, value.as_str())?),
            "--seconds" => params.duration_seconds = Some(parse_number(flag, value.as_str())?),
            "--input-node" => targets.input_node_ids.push(value),
            "--prompt-node" => targets.prompt_node_id = Some(value),
            "--negative-prompt-node" => targets.negative_prompt_node_id = Some(value),
            "--timeout-minutes" => {
                let minutes: u32 = parse_number(flag, value.as_str())?;
                if minutes == 0 {
                    return Err(std::io::Error::other(
                        "--timeout-minutes must be greater than zero",
                    )
                    .into());
                }
                timeout_minutes = Some(minutes);
            }
            "--output" => output_path = Some(PathBuf::from(value)),
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let pipeline =
        pipeline.ok_or_else(|| std::io::Error::other("Missing required --pipeline"))?;
    let workflow_path =
        workflow_path.ok_or_else(|| std::io::Error::other("Missing required --workflow"))?;
    Ok(RunCliArgs {
        settings,
        pipeline,
        workflow_path,
        inputs,
        attachments,
        params,
        targets,
        timeout_minutes,
        output_path,
    })
}

fn attachment_mime(path: &Path, bytes: &[u8]) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(classify_suffix)
        .map(|format| format.mime_type.to_string())
        .or_else(|| {
            image::guess_format(bytes)
                .ok()
                .map(|format| format.to_mime_type().to_string())
        })
        .unwrap_or_else(|| String::from("application/octet-stream"))
}

fn load_attachments(args: &[AttachmentArg]) -> CliResult<InMemoryAttachments> {
    let mut host = InMemoryAttachments::new();
    for arg in args {
        let bytes = std::fs::read(arg.path.as_path()).map_err(|e| {
            std::io::Error::other(format!("Failed to read {}: {e}", arg.path.display()))
        })?;
        let mime_type = attachment_mime(arg.path.as_path(), bytes.as_slice());
        let file_name = arg
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string);
        host.insert(arg.row, arg.name.clone(), mime_type, file_name, bytes);
    }
    Ok(host)
}

fn run_probe_cli(args: Vec<String>) -> CliResult<()> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }
    let parsed = parse_probe_cli_args(args.as_slice())?;
    let app_root = parsed.app_root()?;
    let settings = load_render_settings(app_root.as_path(), parsed.settings_path.as_deref())?;
    let client = RenderClient::from_settings(&settings)?;
    client.probe()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "api_url": client.base_url(),
        }))?
    );
    Ok(())
}

fn run_render_cli(args: Vec<String>) -> CliResult<()> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }
    let parsed = parse_run_cli_args(args.as_slice())?;
    let app_root = parsed.settings.app_root()?;
    let settings =
        load_render_settings(app_root.as_path(), parsed.settings.settings_path.as_deref())?;
    let workflow_json = std::fs::read_to_string(parsed.workflow_path.as_path()).map_err(|e| {
        std::io::Error::other(format!(
            "Failed to read workflow {}: {e}",
            parsed.workflow_path.display()
        ))
    })?;
    let host = load_attachments(parsed.attachments.as_slice())?;

    let pipeline = RenderPipeline::from_settings(&settings)?;
    let request = RenderRequest {
        workflow_json,
        inputs: parsed.inputs,
        params: parsed.params,
        targets: parsed.targets,
        timeout_minutes: parsed.timeout_minutes,
    };
    let output = match pipeline.run(&parsed.pipeline.profile(), &request, &host) {
        Ok(output) => output,
        Err(err) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "ok": false,
                    "error": err.failure(),
                }))?
            );
            return Err(err.into());
        }
    };

    if let Some(path) = parsed.output_path.as_ref() {
        std::fs::write(path, output.binary.bytes.as_slice())?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "json": output.json,
            "written_to": parsed.output_path.as_ref().map(|p| p.display().to_string()),
        }))?
    );
    Ok(())
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  render-bridge probe [--app-root PATH] [--settings PATH]\n",
        "  render-bridge run --pipeline image|dual-image|video|dual-image-video|audio\n",
        "      --workflow PATH\n",
        "      [--input url:<url>|inline:<base64>|attach:<name>]... [--attach <name>=<path>[@row]]...\n",
        "      [--prompt TEXT] [--negative-prompt TEXT] [--seed N] [--steps N] [--cfg X]\n",
        "      [--sampler NAME] [--scheduler NAME] [--denoise X] [--width N] [--height N]\n",
        "      [--frames N] [--fps X] [--seconds X]\n",
        "      [--input-node ID]... [--prompt-node ID] [--negative-prompt-node ID]\n",
        "      [--timeout-minutes N] [--output PATH] [--app-root PATH] [--settings PATH]\n\n",
        "Defaults:\n",
        "  --app-root defaults to the current directory\n",
        "  settings: config/render-bridge.toml, then .env, then RENDER_BRIDGE_* environment\n"
    ));
}
