//! 模型解析器
//!
//! 提供模型别名映射、规范化和输出上限校验

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 已知模型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnownModel {
    /// 规范模型 ID
    pub id: String,
    /// 最大输出 token 数
    pub max_output_tokens: u32,
}

impl KnownModel {
    pub fn new(id: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            id: id.into(),
            max_output_tokens,
        }
    }
}

/// 模型目录配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    /// 别名 -> 规范模型 ID
    pub aliases: IndexMap<String, String>,
    /// 已知模型列表
    pub known: Vec<KnownModel>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let known = vec![
            KnownModel::new("gemini-2.5-pro", 65_536),
            KnownModel::new("gemini-2.5-flash", 65_536),
            KnownModel::new("gemini-2.0-flash", 8_192),
            KnownModel::new("gemini-2.0-flash-lite", 8_192),
            KnownModel::new("gemini-1.5-pro", 8_192),
            KnownModel::new("gemini-1.5-flash", 8_192),
        ];
        let aliases = [
            ("gemini-pro", "gemini-2.5-pro"),
            ("gemini-flash", "gemini-2.5-flash"),
            ("gemini-pro-latest", "gemini-2.5-pro"),
            ("gemini-flash-latest", "gemini-2.5-flash"),
        ]
        .into_iter()
        .map(|(alias, actual)| (alias.to_string(), actual.to_string()))
        .collect();
        Self { aliases, known }
    }
}

/// 模型信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    /// 模型 ID
    pub id: String,
    /// 是否为别名
    pub is_alias: bool,
    /// 实际模型名（如果是别名）
    pub actual_model: Option<String>,
    /// 最大输出 token 数
    pub max_output_tokens: u32,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalModel {
    /// 规范模型 ID
    pub id: String,
    /// 最大输出 token 数
    pub max_output_tokens: u32,
}

/// 模型解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("未知模型: {0}")]
    Invalid(String),
}

/// 模型解析器 - 管理模型别名和已知模型集合
#[derive(Debug, Clone, Default)]
pub struct ModelResolver {
    /// 别名到实际模型的映射 (alias -> actual)
    aliases: IndexMap<String, String>,
    /// 规范模型 ID -> 输出上限
    known: IndexMap<String, u32>,
}

impl ModelResolver {
    /// 创建空的解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 从模型目录配置创建解析器
    pub fn from_config(config: &ModelsConfig) -> Self {
        let mut resolver = Self::new();
        for model in &config.known {
            resolver.add_model(&model.id, model.max_output_tokens);
        }
        for (alias, actual) in &config.aliases {
            resolver.add_alias(alias, actual);
        }
        resolver
    }

    /// 添加已知模型
    pub fn add_model(&mut self, id: &str, max_output_tokens: u32) {
        self.known.insert(id.to_string(), max_output_tokens);
    }

    /// 添加别名映射
    pub fn add_alias(&mut self, alias: &str, actual: &str) {
        self.aliases.insert(alias.to_string(), actual.to_string());
    }

    /// 解析模型名
    ///
    /// 去掉 `models/` 前缀后依次查别名表和已知模型集合。
    pub fn resolve(&self, requested: &str) -> Result<CanonicalModel, ResolveError> {
        let name = requested.trim();
        let name = name.strip_prefix("models/").unwrap_or(name);
        let id = self.aliases.get(name).map(String::as_str).unwrap_or(name);

        self.known
            .get_key_value(id)
            .map(|(id, max_output_tokens)| CanonicalModel {
                id: id.clone(),
                max_output_tokens: *max_output_tokens,
            })
            .ok_or_else(|| ResolveError::Invalid(requested.to_string()))
    }

    /// 获取所有可用模型（包含别名）
    pub fn available_models(&self) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = self
            .known
            .iter()
            .map(|(id, max)| ModelInfo {
                id: id.clone(),
                is_alias: false,
                actual_model: None,
                max_output_tokens: *max,
            })
            .collect();

        for (alias, actual) in &self.aliases {
            if let Some(max) = self.known.get(actual) {
                models.push(ModelInfo {
                    id: alias.clone(),
                    is_alias: true,
                    actual_model: Some(actual.clone()),
                    max_output_tokens: *max,
                });
            }
        }

        models
    }

    /// 已知模型数量
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod mapper_tests {
    use super::*;

    fn resolver() -> ModelResolver {
        let mut resolver = ModelResolver::new();
        resolver.add_model("gemini-2.0-flash", 8192);
        resolver.add_alias("flash", "gemini-2.0-flash");
        resolver
    }

    #[test]
    fn test_new_resolver() {
        let resolver = ModelResolver::new();
        assert!(resolver.is_empty());
        assert!(resolver.resolve("anything").is_err());
    }

    #[test]
    fn test_resolve_alias_and_prefix() {
        let resolver = resolver();
        let expected = CanonicalModel {
            id: "gemini-2.0-flash".to_string(),
            max_output_tokens: 8192,
        };

        assert_eq!(resolver.resolve("flash").unwrap(), expected);
        assert_eq!(resolver.resolve("gemini-2.0-flash").unwrap(), expected);
        assert_eq!(resolver.resolve("models/gemini-2.0-flash").unwrap(), expected);
        assert_eq!(resolver.resolve("models/flash").unwrap(), expected);
    }

    #[test]
    fn test_resolve_unknown() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve("gpt-4"),
            Err(ResolveError::Invalid("gpt-4".to_string()))
        );
    }

    #[test]
    fn test_alias_to_unknown_model_is_invalid() {
        let mut resolver = resolver();
        resolver.add_alias("broken", "does-not-exist");
        assert!(resolver.resolve("broken").is_err());
    }

    #[test]
    fn test_available_models() {
        let models = resolver().available_models();
        assert_eq!(models.len(), 2);

        let actual = models.iter().find(|m| !m.is_alias).unwrap();
        assert_eq!(actual.id, "gemini-2.0-flash");

        let alias = models.iter().find(|m| m.is_alias).unwrap();
        assert_eq!(alias.id, "flash");
        assert_eq!(alias.actual_model, Some("gemini-2.0-flash".to_string()));
        assert_eq!(alias.max_output_tokens, 8192);
    }

    #[test]
    fn test_default_catalog_is_consistent() {
        let config = ModelsConfig::default();
        let resolver = ModelResolver::from_config(&config);
        for alias in config.aliases.keys() {
            assert!(resolver.resolve(alias).is_ok(), "别名无法解析: {alias}");
        }
    }
}
