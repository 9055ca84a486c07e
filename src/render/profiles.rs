use std::time::Duration;

use crate::render::MediaClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub initial_grace: Duration,
    pub interval: Duration,
}

impl PollSchedule {
    pub fn for_media(media: MediaClass) -> Self {
        match media {
            MediaClass::Image => Self {
                initial_grace: Duration::from_secs(2),
                interval: Duration::from_secs(1),
            },
            MediaClass::Audio => Self {
                initial_grace: Duration::from_secs(3),
                interval: Duration::from_secs(2),
            },
            MediaClass::Video => Self {
                initial_grace: Duration::from_secs(5),
                interval: Duration::from_secs(3),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputArity {
    None,
    Single,
    Dual,
}

impl InputArity {
    pub fn count(self) -> usize {
        match self {
            Self::None => 0,
            Self::Single => 1,
            Self::Dual => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTarget {
    pub kind: &'static str,
    pub field: &'static str,
}

const TEXT_PROMPT_TARGETS: &[PromptTarget] = &[
    PromptTarget {
        kind: "CLIPTextEncode",
        field: "text",
    },
    PromptTarget {
        kind: "CLIPTextEncodeFlux",
        field: "t5xxl",
    },
    PromptTarget {
        kind: "TextEncodeQwenImageEdit",
        field: "prompt",
    },
];

const AUDIO_PROMPT_TARGETS: &[PromptTarget] = &[
    PromptTarget {
        kind: "TextEncodeAceStepAudio",
        field: "tags",
    },
    PromptTarget {
        kind: "CLIPTextEncode",
        field: "text",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Image,
    DualImage,
    Video,
    /// First and last frame in, clip out.
    DualImageVideo,
    Audio,
}

impl PipelineKind {
    pub const ALL: [Self; 5] = [
        Self::Image,
        Self::DualImage,
        Self::Video,
        Self::DualImageVideo,
        Self::Audio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::DualImage => "dual-image",
            Self::Video => "video",
            Self::DualImageVideo => "dual-image-video",
            Self::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized.as_str())
    }

    pub fn profile(self) -> PipelineProfile {
        match self {
            Self::Image => PipelineProfile {
                kind: self,
                output_media: MediaClass::Image,
                input_arity: InputArity::Single,
                input_media: MediaClass::Image,
                input_node_kind: "LoadImage",
                input_field: "image",
                prompt_targets: TEXT_PROMPT_TARGETS,
                schedule: PollSchedule::for_media(MediaClass::Image),
            },
            Self::DualImage => PipelineProfile {
                kind: self,
                output_media: MediaClass::Image,
                input_arity: InputArity::Dual,
                input_media: MediaClass::Image,
                input_node_kind: "LoadImage",
                input_field: "image",
                prompt_targets: TEXT_PROMPT_TARGETS,
                schedule: PollSchedule::for_media(MediaClass::Image),
            },
            Self::Video => PipelineProfile {
                kind: self,
                output_media: MediaClass::Video,
                input_arity: InputArity::Single,
                input_media: MediaClass::Image,
                input_node_kind: "LoadImage",
                input_field: "image",
                prompt_targets: TEXT_PROMPT_TARGETS,
                schedule: PollSchedule::for_media(MediaClass::Video),
            },
            Self::DualImageVideo => PipelineProfile {
                kind: self,
                output_media: MediaClass::Video,
                input_arity: InputArity::Dual,
                input_media: MediaClass::Image,
                input_node_kind: "LoadImage",
                input_field: "image",
                prompt_targets: TEXT_PROMPT_TARGETS,
                schedule: PollSchedule::for_media(MediaClass::Video),
            },
            Self::Audio => PipelineProfile {
                kind: self,
                output_media: MediaClass::Audio,
                input_arity: InputArity::None,
                input_media: MediaClass::Audio,
                input_node_kind: "LoadAudio",
                input_field: "audio",
                prompt_targets: AUDIO_PROMPT_TARGETS,
                schedule: PollSchedule::for_media(MediaClass::Audio),
            },
        }
    }
}

/// Everything that differs between the pipeline kinds. The engine itself is
/// shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineProfile {
    pub kind: PipelineKind,
    pub output_media: MediaClass,
    pub input_arity: InputArity,
    pub input_media: MediaClass,
    pub input_node_kind: &'static str,
    pub input_field: &'static str,
    pub prompt_targets: &'static [PromptTarget],
    pub schedule: PollSchedule,
}

impl PipelineProfile {
    pub fn prompt_kinds(&self) -> Vec<&'static str> {
        self.prompt_targets.iter().map(|target| target.kind).collect()
    }

    pub fn prompt_field_for(&self, kind: &str) -> Option<&'static str> {
        self.prompt_targets
            .iter()
            .find(|target| target.kind == kind)
            .map(|target| target.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipeline_names_loosely() {
        assert_eq!(PipelineKind::parse("video"), Some(PipelineKind::Video));
        assert_eq!(PipelineKind::parse(" Dual_Image "), Some(PipelineKind::DualImage));
        assert_eq!(
            PipelineKind::parse("Dual_Image_Video"),
            Some(PipelineKind::DualImageVideo)
        );
        assert_eq!(PipelineKind::parse("gif"), None);
    }

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in PipelineKind::ALL {
            assert_eq!(PipelineKind::parse(kind.as_str()), Some(kind));
            assert_eq!(kind.profile().kind, kind);
        }
    }

    #[test]
    fn dual_image_video_takes_two_frames_and_yields_video() {
        let profile = PipelineKind::DualImageVideo.profile();
        assert_eq!(profile.input_arity.count(), 2);
        assert_eq!(profile.input_node_kind, "LoadImage");
        assert_eq!(profile.input_media, MediaClass::Image);
        assert_eq!(profile.output_media, MediaClass::Video);
        assert_eq!(profile.schedule, PollSchedule::for_media(MediaClass::Video));
    }

    #[test]
    fn heavier_media_waits_longer() {
        let image = PollSchedule::for_media(MediaClass::Image);
        let audio = PollSchedule::for_media(MediaClass::Audio);
        let video = PollSchedule::for_media(MediaClass::Video);
        assert!(image.initial_grace < audio.initial_grace);
        assert!(audio.initial_grace < video.initial_grace);
        assert!(image.interval < video.interval);
    }

    #[test]
    fn profiles_carry_arity_and_prompt_fields() {
        let dual = PipelineKind::DualImage.profile();
        assert_eq!(dual.input_arity.count(), 2);
        assert_eq!(dual.prompt_field_for("CLIPTextEncode"), Some("text"));

        let audio = PipelineKind::Audio.profile();
        assert_eq!(audio.input_arity.count(), 0);
        assert_eq!(audio.prompt_kinds()[0], "TextEncodeAceStepAudio");
        assert_eq!(audio.prompt_field_for("TextEncodeAceStepAudio"), Some("tags"));
        assert_eq!(audio.prompt_field_for("KSampler"), None);
    }
}
