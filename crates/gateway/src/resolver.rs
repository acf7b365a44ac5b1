use secrecy::SecretString;

/// The §6.3 handler-resolver contract, injected at startup. The model
/// registry that decides what `resolve` returns is explicitly out of scope
/// (§1); the Dispatcher depends only on this trait.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self, model_id: &str) -> Option<ResolvedRoute>;
}

#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub base_url: String,
    pub api_path: String,
    pub bearer_token: SecretString,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub supports_images: bool,
}

/// §4.K: a minimal concrete resolver for the single-upstream-family scope of
/// this gateway. Every model id resolves to the same configured target; a
/// production deployment with a real model registry would inject its own
/// `Resolver` rather than use this one.
pub struct StaticResolver {
    base_url: String,
    api_path: String,
    bearer_token: SecretString,
}

impl StaticResolver {
    pub fn new(base_url: impl Into<String>, api_path: impl Into<String>, bearer_token: SecretString) -> Self {
        Self {
            base_url: base_url.into(),
            api_path: api_path.into(),
            bearer_token,
        }
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, _model_id: &str) -> Option<ResolvedRoute> {
        Some(ResolvedRoute {
            base_url: self.base_url.clone(),
            api_path: self.api_path.clone(),
            bearer_token: self.bearer_token.clone(),
            capabilities: Capabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_images: true,
            },
        })
    }
}
