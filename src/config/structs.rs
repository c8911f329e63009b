use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

/// The subset of settings a config file may provide. Everything is optional
/// here; `resolve_config` layers files, environment variables, and command
/// line flags on top of each other and fills in the defaults.
#[derive(Deserialize, Default, Clone)]
pub struct PartialConfig {
    #[serde(deserialize_with = "deserialize_level_filter", default)]
    pub log_level: Option<log::LevelFilter>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub scratch_dir: Option<String>,
}

impl PartialConfig {
    /// Fill any unset field from `other`. Earlier sources win, so callers
    /// merge in priority order.
    pub fn merge_missing_from(&mut self, other: PartialConfig) {
        if self.log_level.is_none() {
            self.log_level = other.log_level;
        }
        if self.hostname.is_none() {
            self.hostname = other.hostname;
        }
        if self.domainname.is_none() {
            self.domainname = other.domainname;
        }
        if self.scratch_dir.is_none() {
            self.scratch_dir = other.scratch_dir;
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub log_level: log::LevelFilter,
    /// UTS names for the sandbox. When unset, the entry point name is used.
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    /// Where ephemeral overlay directories are allocated.
    pub scratch_dir: PathBuf,
}

pub(crate) fn deserialize_level_filter<'de, D>(
    deserializer: D,
) -> Result<Option<log::LevelFilter>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map_or(Ok(None), |s| {
        log::LevelFilter::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    })
}
