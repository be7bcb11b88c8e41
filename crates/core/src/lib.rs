pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod template;

pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use protocol::{
    BrowserInfo, HealthPayload, Notification, ResultPayload, RunRequest, ServerMessage, TabMessage,
};
pub use template::{ConfigTemplates, TemplateResolver};
