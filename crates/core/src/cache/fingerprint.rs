//! 请求指纹
//!
//! 对归一化请求做规范 JSON 编码后取 sha256。入参已经过方言转换和模型解析，
//! 因此 JSON 格式差异、角色拼写、`models/` 前缀和别名都不会影响指纹。

use crate::models::{Message, NormalizedRequest, SamplingParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 指纹编码版本，编码规则变化时递增
const FINGERPRINT_VERSION: u32 = 1;

/// 共享缓存作用域
pub const SHARED_SCOPE: &str = "shared";

#[derive(Serialize)]
struct FingerprintInput<'a> {
    version: u32,
    scope: &'a str,
    model: &'a str,
    system: Option<&'a str>,
    messages: &'a [Message],
    sampling: &'a SamplingParams,
}

/// 缓存指纹（64 位十六进制 sha256）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// 计算指纹
    ///
    /// `canonical_model` 必须是解析后的规范模型 ID。
    pub fn compute(scope: &str, canonical_model: &str, request: &NormalizedRequest) -> Self {
        let input = FingerprintInput {
            version: FINGERPRINT_VERSION,
            scope,
            model: canonical_model,
            system: request.system_instruction.as_deref().map(str::trim),
            messages: &request.messages,
            sampling: &request.sampling,
        };
        // 结构体字段顺序固定，序列化结果是确定的
        let encoded = serde_json::to_vec(&input).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&encoded)))
    }

    /// 解析外部传入的指纹（管理接口）
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        (value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())).then_some(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志使用的短形式
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod fingerprint_tests {
    use super::*;
    use crate::models::{CallerIdentity, Dialect, Message, Role};
    use proptest::prelude::*;

    fn request(text: &str, temperature: Option<f64>) -> NormalizedRequest {
        NormalizedRequest::new(
            "gemini-2.0-flash",
            vec![Message::text(Role::User, text)],
            CallerIdentity::ip("127.0.0.1"),
            Dialect::OpenAI,
        )
        .with_sampling(SamplingParams {
            temperature,
            ..Default::default()
        })
    }

    #[test]
    fn test_dialect_and_requested_model_do_not_matter() {
        let a = request("hi", Some(0.0));
        let mut b = a.clone();
        b.dialect = Dialect::Native;
        b.model = "models/flash".to_string();
        b.stream = true;
        assert_eq!(
            Fingerprint::compute("s", "gemini-2.0-flash", &a),
            Fingerprint::compute("s", "gemini-2.0-flash", &b)
        );
    }

    #[test]
    fn test_semantic_differences_change_fingerprint() {
        let base = Fingerprint::compute("s", "m", &request("hi", Some(0.0)));
        assert_ne!(base, Fingerprint::compute("s", "m", &request("hi", Some(0.5))));
        assert_ne!(base, Fingerprint::compute("s", "m", &request("hello", Some(0.0))));
        assert_ne!(base, Fingerprint::compute("other", "m", &request("hi", Some(0.0))));
        assert_ne!(base, Fingerprint::compute("s", "m2", &request("hi", Some(0.0))));
    }

    #[test]
    fn test_parse() {
        let fp = Fingerprint::compute("s", "m", &request("hi", None));
        assert_eq!(Fingerprint::parse(fp.as_str()), Some(fp.clone()));
        assert_eq!(
            Fingerprint::parse(&fp.as_str().to_ascii_uppercase()),
            Some(fp)
        );
        assert_eq!(Fingerprint::parse("not-a-fingerprint"), None);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_is_deterministic(text in ".{0,64}", temp in proptest::option::of(0.0f64..2.0)) {
            let a = request(&text, temp);
            let b = request(&text, temp);
            let fa = Fingerprint::compute("caller:ip:1", "m", &a);
            prop_assert_eq!(fa.as_str().len(), 64);
            prop_assert_eq!(fa, Fingerprint::compute("caller:ip:1", "m", &b));
        }
    }
}
