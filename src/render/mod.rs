pub mod assets;
pub mod client;
pub mod engine;
pub mod error;
pub mod graph;
pub mod inputs;
pub mod jobs;
pub mod outputs;
pub mod packaging;
pub mod patching;
pub mod profiles;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_support;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaClass {
    Image,
    Video,
    Audio,
}

impl MediaClass {
    pub const ALL: [Self; 3] = [Self::Image, Self::Video, Self::Audio];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn mime_prefix(self) -> &'static str {
        match self {
            Self::Image => "image/",
            Self::Video => "video/",
            Self::Audio => "audio/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRole {
    Primary,
    Secondary,
}

impl InputRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn from_slot(slot: usize) -> Self {
        if slot == 0 {
            Self::Primary
        } else {
            Self::Secondary
        }
    }
}
