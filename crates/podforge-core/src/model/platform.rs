use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Subset of the Kubernetes object metadata: enough to key a resource.
///
/// Objects in this model are not necessarily Kubernetes objects, but most of
/// them live in a namespace and are addressed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

impl ObjectReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `namespace/name`
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// ビルドの実行方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStrategy {
    /// 専用のワーカー Pod でビルドする
    #[default]
    Pod,
    /// 呼び出し元プロセス内でのビルド用 (予約)。
    /// Pod エンジンでは未対応。
    Routine,
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStrategy::Pod => write!(f, "pod"),
            BuildStrategy::Routine => write!(f, "routine"),
        }
    }
}

/// イメージを公開するビルドツール
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishStrategy {
    /// Kaniko (https://github.com/GoogleContainerTools/kaniko)
    #[default]
    Kaniko,
    /// Buildah (https://buildah.io)
    Buildah,
}

impl std::fmt::Display for PublishStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishStrategy::Kaniko => write!(f, "Kaniko"),
            PublishStrategy::Buildah => write!(f, "Buildah"),
        }
    }
}

/// ビルドしたイメージの push 先レジストリ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Registry host, e.g. `quay.io` or `10.96.0.12:5000`.
    /// 未設定ならクラスタから検出する。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// レジストリ認証情報の Secret 名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// レジストリ CA バンドルの ConfigMap 名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    /// レジストリの TLS 検証を省略
    #[serde(default)]
    pub insecure: bool,
}

impl RegistrySpec {
    /// 設定済みのアドレス (空文字は未設定扱い)
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref().filter(|a| !a.is_empty())
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn ca(&self) -> Option<&str> {
        self.ca.as_deref().filter(|c| !c.is_empty())
    }
}

/// ビルドの元になるプラットフォーム定義。エンジンからは読み取り専用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformBuild {
    #[serde(flatten)]
    pub reference: ObjectReference,
    pub spec: PlatformBuildSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformBuildSpec {
    /// The strategy to adopt for building an image
    #[serde(default)]
    pub build_strategy: BuildStrategy,
    /// The strategy to adopt for publishing an image
    #[serde(default)]
    pub publish_strategy: PublishStrategy,
    /// Base image used as the first layer of every built image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
    /// The image registry used to push/pull built images
    #[serde(default)]
    pub registry: RegistrySpec,
    /// How much time to wait before timing out the build
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub publish_strategy_options: BTreeMap<String, String>,
}

impl PlatformBuildSpec {
    /// 公開ストラテジーのオプションが有効かどうか。
    /// 未設定や解釈できない値は無効扱い。
    pub fn is_option_enabled(&self, option: &str) -> bool {
        self.publish_strategy_options
            .get(option)
            .and_then(|value| value.trim().parse::<bool>().ok())
            .unwrap_or(false)
    }

    /// 設定されたタイムアウト (未設定なら 0)
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_default()
    }
}
