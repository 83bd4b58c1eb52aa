pub mod anthropic;
pub mod error;
pub mod handlers;
pub mod image_sidecar;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod sse;
pub mod workflow;

pub use anthropic::AnthropicProvider;
pub use error::{AdapterError, Result};
pub use handlers::{ChatProcessHandler, ChatStopHandler};
pub use openai::OpenAiProvider;
pub use provider::Provider;
pub use registry::{InstanceGuard, InstanceRegistry};
pub use workflow::{run_workflow, ProviderSet};
