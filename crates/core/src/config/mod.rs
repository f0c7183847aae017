//! 配置管理
//!
//! YAML 配置文件，所有段落都有默认值。配置路径优先级：
//! 命令行 `--config` > 环境变量 `POOLCAST_CONFIG` > `~/.poolcast/config.yaml`。

use crate::cache::CacheConfig;
use crate::credential::{CooldownConfig, PoolConfig};
use crate::logger::LoggingConfig;
use crate::rate_limit::RateLimitRule;
use crate::router::ModelsConfig;
use crate::ttl::MAX_DURATION_SECS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "POOLCAST_CONFIG";

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("解析配置文件失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("配置无效: {0}")]
    Invalid(String),
    #[error("读取凭证文件失败 {path}: {source}")]
    CredentialFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 代理 API Key 列表（为空时不校验，按客户端 IP 识别调用方）
    pub api_keys: Vec<String>,
    /// 管理接口密钥（未设置时管理接口不可用）
    pub admin_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8999,
            api_keys: Vec::new(),
            admin_key: None,
        }
    }
}

/// 上游配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_version: String,
    pub connect_timeout_secs: u64,
    /// 单次上游调用超时
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_version: "v1beta".to_string(),
            connect_timeout_secs: 10,
            timeout_secs: 120,
        }
    }
}

/// 凭证来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// 直接写在配置文件中
    Static { keys: Vec<String> },
    /// 从环境变量读取（逗号或换行分隔）
    Env { var: String },
    /// 从文件读取（每行一个，`#` 开头为注释）
    File { path: PathBuf },
}

impl Default for CredentialSource {
    fn default() -> Self {
        CredentialSource::Env {
            var: "GEMINI_API_KEYS".to_string(),
        }
    }
}

impl CredentialSource {
    /// 读取密钥列表（去空白、去重，保持顺序）
    pub fn load(&self) -> Result<Vec<String>, ConfigError> {
        let raw: Vec<String> = match self {
            CredentialSource::Static { keys } => keys.clone(),
            CredentialSource::Env { var } => std::env::var(var)
                .map(|value| split_secrets(&value))
                .unwrap_or_default(),
            CredentialSource::File { path } => {
                let content = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::CredentialFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.starts_with('#'))
                    .flat_map(split_secrets)
                    .collect()
            }
        };

        let mut keys: Vec<String> = Vec::with_capacity(raw.len());
        for key in raw {
            let key = key.trim();
            if !key.is_empty() && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    pub fn describe(&self) -> String {
        match self {
            CredentialSource::Static { keys } => format!("static({} keys)", keys.len()),
            CredentialSource::Env { var } => format!("env({var})"),
            CredentialSource::File { path } => format!("file({})", path.display()),
        }
    }
}

fn split_secrets(value: &str) -> Vec<String> {
    value
        .split([',', '\n', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// 凭证配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub source: CredentialSource,
    /// 主来源为空时使用的单个备用密钥环境变量（测试环境使用）
    pub fallback_env: Option<String>,
    /// 单个凭证最大并发
    pub max_in_flight: Option<usize>,
}

impl CredentialsConfig {
    /// 加载凭证：主来源为空时尝试 `fallback_env`
    pub fn load_secrets(&self) -> Result<Vec<String>, ConfigError> {
        let keys = self.source.load()?;
        if !keys.is_empty() {
            return Ok(keys);
        }

        let Some(var) = &self.fallback_env else {
            return Ok(keys);
        };
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => {
                tracing::warn!("[BOOTSTRAP] 主凭证来源为空，使用备用环境变量: {}", var);
                Ok(vec![value.trim().to_string()])
            }
            _ => Ok(keys),
        }
    }
}

/// 限流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 每个调用方的限额（None 表示不限制）
    pub caller: Option<RateLimitRule>,
    /// 每个凭证的限额（None 表示不限制）
    pub credential: Option<RateLimitRule>,
    /// 空闲窗口保留时长（秒）
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            caller: Some(RateLimitRule::per_minute(60)),
            credential: None,
            idle_ttl_secs: 600,
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 单个请求最多尝试的凭证数（同时受池大小限制）
    pub max_attempts: usize,
    /// 整个请求的截止时间（秒）
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout_secs: 300,
        }
    }
}

/// 主配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub credentials: CredentialsConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub cooldown: CooldownConfig,
    pub models: ModelsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// 从 YAML 字符串解析并校验
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置；文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("[BOOTSTRAP] 配置文件不存在，使用默认配置: {}", path.display());
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content, path)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port 不能为 0".to_string()));
        }
        if self.models.known.is_empty() {
            return Err(ConfigError::Invalid("models.known 不能为空".to_string()));
        }
        for (alias, actual) in &self.models.aliases {
            if !self.models.known.iter().any(|m| &m.id == actual) {
                return Err(ConfigError::Invalid(format!(
                    "别名 {alias} 指向未知模型 {actual}"
                )));
            }
        }
        for (name, rule) in [
            ("rate_limit.caller", &self.rate_limit.caller),
            ("rate_limit.credential", &self.rate_limit.credential),
        ] {
            let Some(rule) = rule else { continue };
            if rule.period_secs == 0 || rule.period_secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name}.period_secs 必须在 1..={MAX_DURATION_SECS} 之间"
                )));
            }
            if self.rate_limit.idle_ttl_secs < rule.period_secs {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit.idle_ttl_secs 不能小于 {name}.period_secs ({})",
                    rule.period_secs
                )));
            }
        }
        if self.cache.default_ttl_secs > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid(format!(
                "cache.default_ttl_secs 不能超过 {MAX_DURATION_SECS}"
            )));
        }
        if self.cooldown.max_cooldown_secs > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid(format!(
                "cooldown.max_cooldown_secs 不能超过 {MAX_DURATION_SECS}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts 不能为 0".to_string()));
        }
        if self.retry.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "retry.request_timeout_secs 不能为 0".to_string(),
            ));
        }
        if self.cooldown.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "cooldown.backoff_factor 不能小于 1".to_string(),
            ));
        }
        if self.credentials.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid(
                "credentials.max_in_flight 不能为 0".to_string(),
            ));
        }
        Ok(())
    }

    /// 凭证池配置
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_in_flight: self.credentials.max_in_flight,
            cooldown: self.cooldown.clone(),
        }
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 默认配置文件路径
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".poolcast")
        .join("config.yaml")
}

/// 按优先级确定配置文件路径
pub fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}
