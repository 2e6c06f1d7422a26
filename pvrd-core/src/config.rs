use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use serde::Deserialize;

use crate::error::Error;

pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Arc<Config>, Error> {
    let config_path = config_path.as_ref();
    let reader = File::open(config_path)?;
    let config: Config = serde_yaml::from_reader(reader)?;
    config.validate();
    tracing::debug!(?config_path, "Loaded config");
    Ok(Arc::new(config))
}

// result

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub epg: EpgConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    pub fn validate(&self) {
        self.epg.validate();
        self.video.validate();
        self.channels
            .iter()
            .enumerate()
            .for_each(|(i, config)| config.validate(i));
        assert_eq!(
            self.channels.len(),
            self.channels.iter().map(|config| config.triple()).unique().count(),
            "config.channels: (nid, tsid, sid) must be unique"
        );
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EpgConfig {
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    // ISO 639-2 codes, the most preferred one first.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "EpgConfig::default_bugfix_level")]
    pub bugfix_level: u8,
    #[serde(default, with = "humantime_serde")]
    pub linger_time: Option<Duration>,
    #[serde(default)]
    pub extended_text_separator: String,
}

impl EpgConfig {
    pub const MAX_BUGFIX_LEVEL: u8 = 3;

    fn default_bugfix_level() -> u8 {
        Self::MAX_BUGFIX_LEVEL
    }

    fn validate(&self) {
        if let Some(cache_dir) = self.cache_dir.as_ref() {
            assert!(
                cache_dir.is_dir(),
                "config.epg: `cache-dir` must be a path to an existing directory"
            );
        }
        assert!(
            self.bugfix_level <= Self::MAX_BUGFIX_LEVEL,
            "config.epg: `bugfix-level` must be in 0..={}",
            Self::MAX_BUGFIX_LEVEL
        );
        for lang in self.languages.iter() {
            assert!(
                lang.len() == 3 && lang.chars().all(|c| c.is_ascii_alphabetic()),
                "config.epg: `languages` must contain ISO 639-2 codes"
            );
        }
    }
}

impl Default for EpgConfig {
    fn default() -> Self {
        EpgConfig {
            cache_dir: None,
            languages: vec![],
            bugfix_level: Self::default_bugfix_level(),
            linger_time: None,
            extended_text_separator: String::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct VideoConfig {
    #[serde(default = "VideoConfig::default_dir")]
    pub dir: PathBuf,
    #[serde(default = "VideoConfig::default_lock_wait", with = "humantime_serde")]
    pub lock_wait: Duration,
}

impl VideoConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from("/srv/video")
    }

    fn default_lock_wait() -> Duration {
        Duration::from_secs(10)
    }

    fn validate(&self) {
        assert!(
            self.dir.is_absolute(),
            "config.video: `dir` must be an absolute path"
        );
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            dir: Self::default_dir(),
            lock_wait: Self::default_lock_wait(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub name: String,
    pub nid: u16,
    pub tsid: u16,
    pub sid: u16,
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub source_id: Option<u16>,
}

impl ChannelConfig {
    fn triple(&self) -> (u16, u16, u16) {
        (self.nid, self.tsid, self.sid)
    }

    fn validate(&self, index: usize) {
        assert!(
            !self.name.is_empty(),
            "config.channels[{}]: `name` must be a non-empty string",
            index
        );
        assert!(
            self.sid != 0 && (self.nid != 0 || self.tsid != 0),
            "config.channels[{}]: `sid` and either `nid` or `tsid` must be non-zero",
            index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use test_log::test;

    #[test]
    fn test_config() {
        assert_eq!(
            serde_yaml::from_str::<Config>("{}").unwrap(),
            Default::default()
        );

        let result = serde_yaml::from_str::<Config>(
            r#"
            unknown:
              property: value
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validate() {
        let config = Config::default();
        config.validate();
    }

    #[test]
    #[should_panic]
    fn test_config_validate_channel_triples() {
        let config = serde_yaml::from_str::<Config>(
            r#"
            channels:
              - name: ch1
                nid: 1
                tsid: 2
                sid: 3
              - name: ch2
                nid: 1
                tsid: 2
                sid: 3
        "#,
        )
        .unwrap();
        config.validate();
    }

    #[test]
    fn test_epg_config() {
        assert_eq!(
            serde_yaml::from_str::<EpgConfig>("{}").unwrap(),
            Default::default()
        );

        assert_eq!(
            serde_yaml::from_str::<EpgConfig>(
                r#"
                cache-dir: /path/to/epg
                languages: [deu, eng]
                bugfix-level: 1
                linger-time: 10m
                extended-text-separator: " "
            "#
            )
            .unwrap(),
            EpgConfig {
                cache_dir: Some("/path/to/epg".into()),
                languages: vec!["deu".to_string(), "eng".to_string()],
                bugfix_level: 1,
                linger_time: Some(Duration::from_secs(600)),
                extended_text_separator: " ".to_string(),
            }
        );

        let result = serde_yaml::from_str::<EpgConfig>(
            r#"
            unknown:
              property: value
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    #[should_panic]
    fn test_epg_config_validate_bugfix_level() {
        let config = serde_yaml::from_str::<EpgConfig>("bugfix-level: 4").unwrap();
        config.validate();
    }

    #[test]
    #[should_panic]
    fn test_epg_config_validate_languages() {
        let config = serde_yaml::from_str::<EpgConfig>("languages: [german]").unwrap();
        config.validate();
    }

    #[test]
    fn test_video_config() {
        assert_eq!(
            serde_yaml::from_str::<VideoConfig>("{}").unwrap(),
            Default::default()
        );

        assert_eq!(
            serde_yaml::from_str::<VideoConfig>(
                r#"
                dir: /srv/video0
                lock-wait: 3s
            "#
            )
            .unwrap(),
            VideoConfig {
                dir: "/srv/video0".into(),
                lock_wait: Duration::from_secs(3),
            }
        );
    }

    #[test]
    #[should_panic]
    fn test_video_config_validate_relative_dir() {
        let config = serde_yaml::from_str::<VideoConfig>("dir: video0").unwrap();
        config.validate();
    }

    #[test]
    fn test_channel_config() {
        assert_eq!(
            serde_yaml::from_str::<ChannelConfig>(
                r#"
                name: test
                nid: 1
                tsid: 2
                sid: 3
            "#
            )
            .unwrap(),
            ChannelConfig {
                name: "test".to_string(),
                nid: 1,
                tsid: 2,
                sid: 3,
                frequency: 0,
                source_id: None,
            }
        );

        assert!(serde_yaml::from_str::<ChannelConfig>("name: test").is_err());
    }

    #[test]
    #[should_panic]
    fn test_channel_config_validate_invalid_triple() {
        let config = serde_yaml::from_str::<ChannelConfig>(
            r#"
            name: test
            nid: 0
            tsid: 0
            sid: 3
        "#,
        )
        .unwrap();
        config.validate(0);
    }

    #[test]
    fn test_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yml");
        std::fs::write(
            &path,
            r#"
            video:
              dir: /srv/video0
            channels:
              - name: test
                nid: 1
                tsid: 2
                sid: 3
        "#,
        )
        .unwrap();
        assert_matches!(load(&path), Ok(config) => {
            assert_eq!(config.video.dir, Path::new("/srv/video0"));
            assert_eq!(config.channels.len(), 1);
        });

        assert_matches!(load(temp_dir.path().join("missing.yml")), Err(Error::IoError(_)));

        std::fs::write(&path, "epg: [").unwrap();
        assert_matches!(load(&path), Err(Error::YamlError(_)));
    }
}
