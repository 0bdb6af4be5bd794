use anyhow::{Context, Result};
use configparser::ini::Ini;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

use crate::deck::{CanvasSpec, ScalePolicy};
use crate::error::Error;
use crate::processor::ProcessConfig;

const SECTION: &str = "lecture_deck";
const ENV_PREFIX: &str = "LECTURE_DECK_";

/// 某一来源提供的原始配置值，未出现的项为 None
///
/// 各层先合并再统一校验，非法值不会被静默替换。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    pub sample_interval: Option<String>,
    pub change_threshold: Option<String>,
    pub canvas: Option<String>,
    pub scale_policy: Option<String>,
    pub jpeg_quality: Option<String>,
    pub progress_every: Option<String>,
    pub prefetch: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigLayer {
    /// 本层优先，缺失的项取 `lower`
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            sample_interval: self.sample_interval.or(lower.sample_interval),
            change_threshold: self.change_threshold.or(lower.change_threshold),
            canvas: self.canvas.or(lower.canvas),
            scale_policy: self.scale_policy.or(lower.scale_policy),
            jpeg_quality: self.jpeg_quality.or(lower.jpeg_quality),
            progress_every: self.progress_every.or(lower.progress_every),
            prefetch: self.prefetch.or(lower.prefetch),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    /// 校验并转换为运行配置
    pub fn resolve(self) -> Result<ProcessConfig, Error> {
        let defaults = ProcessConfig::default();

        let sample_interval = match self.sample_interval {
            Some(v) => positive("sample_interval", &v)?,
            None => defaults.sample_interval,
        };

        let change_threshold = match self.change_threshold {
            Some(v) => {
                let n = integer("change_threshold", &v)?;
                u32::try_from(n).map_err(|_| {
                    Error::config(format!("change_threshold 必须是非负整数: {v}"))
                })?
            }
            None => defaults.change_threshold,
        };

        let canvas = match self.canvas {
            Some(v) => CanvasSpec::from_str(&v)?,
            None => defaults.canvas,
        };
        let policy = match self.scale_policy {
            Some(v) => ScalePolicy::from_str(&v)?,
            None => defaults.canvas.policy(),
        };

        let jpeg_quality = match self.jpeg_quality {
            Some(v) => {
                let n = integer("jpeg_quality", &v)?;
                u8::try_from(n)
                    .ok()
                    .filter(|q| (1..=100).contains(q))
                    .ok_or_else(|| Error::config(format!("jpeg_quality 必须在 1-100 之间: {v}")))?
            }
            None => defaults.jpeg_quality,
        };

        let progress_every = match self.progress_every {
            Some(v) => positive("progress_every", &v)?,
            None => defaults.progress_every,
        };

        let prefetch = match self.prefetch {
            Some(v) => boolean("prefetch", &v)?,
            None => defaults.prefetch,
        };

        let log_level = match self.log_level {
            Some(v) => Level::from_str(v.trim())
                .map_err(|_| Error::config(format!("未知的日志级别: {v}")))?,
            None => defaults.log_level,
        };

        Ok(ProcessConfig {
            sample_interval,
            change_threshold,
            canvas: canvas.with_policy(policy),
            jpeg_quality,
            progress_every,
            prefetch,
            log_level,
        })
    }
}

fn integer(name: &str, value: &str) -> Result<i64, Error> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::config(format!("{name} 不是整数: {value}")))
}

fn positive(name: &str, value: &str) -> Result<u64, Error> {
    let n = integer(name, value)?;
    if n <= 0 {
        return Err(Error::config(format!("{name} 必须是正整数: {value}")));
    }
    Ok(n as u64)
}

fn boolean(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{name} 不是布尔值: {value}"))),
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, cli: ConfigLayer) -> Result<ProcessConfig> {
        // 显式指定的配置文件必须存在；默认位置找不到则跳过
        let file_layer = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations()?.unwrap_or_default(),
        };

        let config = cli
            .or(Self::load_from_env(|key| env::var(key).ok()))
            .or(file_layer)
            .resolve()
            .context("配置无效")?;

        Ok(config)
    }

    /// 从环境变量加载配置
    pub fn load_from_env(lookup: impl Fn(&str) -> Option<String>) -> ConfigLayer {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());
        ConfigLayer {
            sample_interval: var("SAMPLE_INTERVAL"),
            change_threshold: var("CHANGE_THRESHOLD"),
            canvas: var("CANVAS"),
            scale_policy: var("SCALE_POLICY"),
            jpeg_quality: var("JPEG_QUALITY"),
            progress_every: var("PROGRESS_EVERY"),
            prefetch: var("PREFETCH"),
            log_level: var("LOG_LEVEL"),
        }
    }

    /// 从INI配置文件加载配置
    pub fn load_from_file(config_path: &Path) -> Result<ConfigLayer> {
        if !config_path.exists() {
            anyhow::bail!("配置文件不存在: {}", config_path.display());
        }

        let mut ini = Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(Self::layer_from_ini(&ini))
    }

    /// 尝试从 [lecture_deck] 节读取，没有则使用 [DEFAULT] 节
    pub fn layer_from_ini(ini: &Ini) -> ConfigLayer {
        let get = |key: &str| {
            ini.get(SECTION, key)
                .or_else(|| ini.get("DEFAULT", key))
                .filter(|v| !v.is_empty())
        };
        ConfigLayer {
            sample_interval: get("sample_interval"),
            change_threshold: get("change_threshold"),
            canvas: get("canvas"),
            scale_policy: get("scale_policy"),
            jpeg_quality: get("jpeg_quality"),
            progress_every: get("progress_every"),
            prefetch: get("prefetch"),
            log_level: ini
                .get("logging", "level")
                .or_else(|| ini.get("DEFAULT", "log_level"))
                .filter(|v| !v.is_empty()),
        }
    }

    /// 依次查找 ./lecture-deck.ini、./.lecture-deck.ini、~/.lecture-deck.ini、/etc/lecture-deck.ini
    fn load_from_default_locations() -> Result<Option<ConfigLayer>> {
        let mut candidates = vec![
            PathBuf::from("lecture-deck.ini"),
            PathBuf::from(".lecture-deck.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".lecture-deck.ini"));
        }
        candidates.push(PathBuf::from("/etc/lecture-deck.ini"));

        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::load_from_file(path).map(Some),
            None => Ok(None),
        }
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = ProcessConfig::default();
        let mut ini = Ini::new();
        ini.set(SECTION, "sample_interval", Some(defaults.sample_interval.to_string()));
        ini.set(SECTION, "change_threshold", Some(defaults.change_threshold.to_string()));
        ini.set(SECTION, "canvas", Some(defaults.canvas.to_string()));
        ini.set(SECTION, "scale_policy", Some(defaults.canvas.policy().to_string()));
        ini.set(SECTION, "jpeg_quality", Some(defaults.jpeg_quality.to_string()));
        ini.set(SECTION, "progress_every", Some(defaults.progress_every.to_string()));
        ini.set(SECTION, "prefetch", Some(defaults.prefetch.to_string()));
        ini.set("logging", "level", Some("info".to_string()));

        ini.write(config_path)
            .with_context(|| format!("写入配置文件失败: {}", config_path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ini(text: &str) -> Ini {
        let mut ini = Ini::new();
        ini.read(text.to_string()).unwrap();
        ini
    }

    fn layer(pairs: &[(&str, &str)]) -> ConfigLayer {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        ConfigLoader::load_from_env(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = ConfigLayer::default().resolve().unwrap();
        assert_eq!(config, ProcessConfig::default());
        assert_eq!(config.sample_interval, 60);
        assert_eq!(config.change_threshold, 12);
        assert_eq!(config.canvas, CanvasSpec::standard());
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.progress_every, 5);
        assert!(config.prefetch);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn test_precedence_cli_env_file() {
        let file = ConfigLoader::layer_from_ini(&ini(
            "[lecture_deck]\nsample_interval = 30\nchange_threshold = 8\ncanvas = 16:9\n\n[logging]\nlevel = debug\n",
        ));
        let env = layer(&[("CHANGE_THRESHOLD", "20"), ("SCALE_POLICY", "stretch")]);
        let cli = ConfigLayer {
            change_threshold: Some("5".into()),
            ..Default::default()
        };

        let config = cli.or(env).or(file).resolve().unwrap();
        assert_eq!(config.sample_interval, 30);
        assert_eq!(config.change_threshold, 5);
        assert_eq!(config.canvas.width_emu(), 12_192_000);
        assert_eq!(config.canvas.policy(), ScalePolicy::Stretch);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_default_section_fallback() {
        let file = ConfigLoader::layer_from_ini(&ini("[DEFAULT]\nsample_interval = 15\nlog_level = warn\n"));
        let config = file.resolve().unwrap();
        assert_eq!(config.sample_interval, 15);
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases: &[(&str, &str)] = &[
            ("SAMPLE_INTERVAL", "0"),
            ("SAMPLE_INTERVAL", "-3"),
            ("SAMPLE_INTERVAL", "abc"),
            ("CHANGE_THRESHOLD", "-1"),
            ("CANVAS", "square"),
            ("SCALE_POLICY", "fit"),
            ("JPEG_QUALITY", "0"),
            ("JPEG_QUALITY", "101"),
            ("PROGRESS_EVERY", "0"),
            ("PREFETCH", "maybe"),
            ("LOG_LEVEL", "loud"),
        ];
        for (key, value) in cases {
            let result = layer(&[(key, value)]).resolve();
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_threshold_is_allowed() {
        let config = layer(&[("CHANGE_THRESHOLD", "0"), ("PREFETCH", "off")])
            .resolve()
            .unwrap();
        assert_eq!(config.change_threshold, 0);
        assert!(!config.prefetch);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::load_from_file(&dir.path().join("nope.ini")).is_err());
    }

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lecture-deck.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap().resolve().unwrap();
        assert_eq!(config, ProcessConfig::default());
    }
}
