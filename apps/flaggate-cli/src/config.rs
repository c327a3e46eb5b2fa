use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use flaggate::GateConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `FLAGGATE__REGISTRY__ENDPOINT`
pub const ENV_PREFIX: &str = "FLAGGATE__";

/// Effective CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub gate: GateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset and no `-v` is given
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "warn".to_owned()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Values given on the command line; they win over every other layer
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub endpoint: Option<String>,
    pub flags_file: Option<PathBuf>,
}

impl AppConfig {
    /// Layered load: serde defaults, then the YAML file (if any), then `FLAGGATE__*` env.
    ///
    /// Defaults come from the serde attributes rather than a serialized layer, so
    /// camelCase aliases in the file never collide with snake_case default keys.
    ///
    /// # Errors
    /// Returns the figment error if a layer cannot be read or does not fit the schema.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// A source given on the command line replaces the configured one
    pub fn apply_cli_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(path) = &overrides.flags_file {
            self.gate.registry.file = Some(path.clone());
            self.gate.registry.endpoint = None;
        }
        if let Some(endpoint) = &overrides.endpoint {
            self.gate.registry.endpoint = Some(endpoint.clone());
        }
    }
}
