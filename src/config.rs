use derive_getters::Getters;

use crate::constants::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    SameRuntime,
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongEncoding {
    Sli,
    LeRawBytes,
    Pvl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibleMode {
    SchemaConsistent,
    Compatible,
}

#[derive(Debug, Clone, Getters)]
pub struct Config {
    pub(crate) language: Language,
    pub(crate) track_ref: bool,
    pub(crate) ignore_basic_types_ref: bool,
    pub(crate) ignore_string_ref: bool,
    pub(crate) ignore_time_ref: bool,
    pub(crate) compress_int: bool,
    pub(crate) long_encoding: LongEncoding,
    pub(crate) compress_string: bool,
    pub(crate) compatible_mode: CompatibleMode,
    pub(crate) require_class_registration: bool,
    pub(crate) deserialize_unexistent_class: bool,
    pub(crate) share_meta_context: bool,
    pub(crate) max_depth: u32,
}

impl Config {
    // cross-language messages keep strings shareable
    pub(crate) fn string_ref_suppressed(&self) -> bool {
        self.ignore_string_ref && self.language != Language::Cross
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: Language::SameRuntime,
            track_ref: true,
            ignore_basic_types_ref: false,
            ignore_string_ref: false,
            ignore_time_ref: false,
            compress_int: true,
            long_encoding: LongEncoding::Sli,
            compress_string: true,
            compatible_mode: CompatibleMode::SchemaConsistent,
            require_class_registration: true,
            deserialize_unexistent_class: false,
            share_meta_context: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_language_forces_string_refs() {
        let mut config = Config {
            ignore_string_ref: true,
            ..Config::default()
        };
        assert!(config.string_ref_suppressed());
        config.language = Language::Cross;
        assert!(!config.string_ref_suppressed());
    }
}
