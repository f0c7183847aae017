//! 归一化请求模型
//!
//! OpenAI 兼容格式和原生格式的请求都会先转换为 `NormalizedRequest`，
//! 调度器只处理这一种内部表示。

use serde::{Deserialize, Serialize};

/// 客户端协议方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// OpenAI 兼容格式（/v1/chat/completions）
    #[serde(rename = "openai")]
    OpenAI,
    /// 上游原生格式（/v1beta/models/{model}:generateContent）
    Native,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::OpenAI => write!(f, "openai"),
            Dialect::Native => write!(f, "native"),
        }
    }
}

/// 消息角色（已归一化：OpenAI 的 assistant 映射为 Model）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// 从任意方言的角色名解析
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim().to_lowercase().as_str() {
            "user" | "tool" | "function" => Some(Role::User),
            "model" | "assistant" => Some(Role::Model),
            _ => None,
        }
    }
}

/// 消息片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// 文本
    Text { text: String },
    /// 内联二进制数据（base64）
    InlineData { mime_type: String, data: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::InlineData { .. } => None,
        }
    }
}

/// 单条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::text(text)],
        }
    }
}

/// 采样参数
///
/// 字段顺序固定，参与缓存指纹计算。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

impl SamplingParams {
    /// 是否为确定性采样（temperature == 0）
    pub fn is_deterministic(&self) -> bool {
        matches!(self.temperature, Some(t) if t == 0.0)
    }
}

/// 调用方身份类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerKind {
    /// 代理 API Key（已脱敏哈希）
    ProxyKey,
    /// 客户端 IP
    Ip,
}

/// 调用方身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub kind: CallerKind,
    pub id: String,
}

impl CallerIdentity {
    pub fn proxy_key(id: impl Into<String>) -> Self {
        Self {
            kind: CallerKind::ProxyKey,
            id: id.into(),
        }
    }

    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            kind: CallerKind::Ip,
            id: ip.into(),
        }
    }

    /// 限流和缓存使用的作用域 ID
    pub fn scope_id(&self) -> String {
        match self.kind {
            CallerKind::ProxyKey => format!("caller:key:{}", self.id),
            CallerKind::Ip => format!("caller:ip:{}", self.id),
        }
    }
}

/// 请求级缓存控制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// 按缓存策略处理
    #[default]
    Default,
    /// 跳过缓存（不查询也不写入）
    Bypass,
}

/// 多段系统指令之间的分隔符
pub const SYSTEM_PART_SEPARATOR: &str = "\n";

/// 归一化请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    /// 客户端请求的模型名（可能是别名）
    pub model: String,
    /// 系统指令
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// 对话消息
    pub messages: Vec<Message>,
    /// 采样参数
    #[serde(default)]
    pub sampling: SamplingParams,
    /// 调用方身份
    pub caller: CallerIdentity,
    /// 是否流式
    #[serde(default)]
    pub stream: bool,
    /// 来源方言
    pub dialect: Dialect,
    /// 缓存控制
    #[serde(default)]
    pub cache_mode: CacheMode,
}

impl NormalizedRequest {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<Message>,
        caller: CallerIdentity,
        dialect: Dialect,
    ) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            messages,
            sampling: SamplingParams::default(),
            caller,
            stream: false,
            dialect,
            cache_mode: CacheMode::Default,
        }
    }

    /// 合并多段系统指令
    ///
    /// 两种方言统一用 `SYSTEM_PART_SEPARATOR` 拼接并跳过空白段，
    /// 保证同一请求的指纹与来源方言无关。全部为空时不设置。
    pub fn with_system_parts<'a>(mut self, parts: impl IntoIterator<Item = &'a str>) -> Self {
        let joined = parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(SYSTEM_PART_SEPARATOR);
        if !joined.is_empty() {
            self.system_instruction = Some(joined);
        }
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// 消息内容总字符数（用于日志）
    pub fn content_len(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| m.parts.iter())
            .filter_map(Part::as_text)
            .map(str::len)
            .sum::<usize>()
            + self.system_instruction.as_ref().map_or(0, String::len)
    }
}
