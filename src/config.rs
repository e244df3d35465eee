//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::{Error, Result};

/// OAuth scope granting access to Vertex AI
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Default upstream host pattern; `{location}` is replaced by the region
pub const DEFAULT_API_HOST_FORMAT: &str = "{location}-aiplatform.googleapis.com";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Vertex AI upstream configuration
    pub vertex: VertexConfig,
    /// Credential configuration
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Sources, later ones winning: built-in defaults, the YAML file at `path`,
    /// `VERTEX_PROXY_*` variables (`__` separates nested keys), and the
    /// `VERTEXAI_PROJECT` / `VERTEXAI_LOCATION` / `VERTEXAI_AVAILABLE_MODELS`
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::prefixed("VERTEX_PROXY_").split("__"))
            .merge(
                Env::raw()
                    .only(&[
                        "VERTEXAI_PROJECT",
                        "VERTEXAI_LOCATION",
                        "VERTEXAI_AVAILABLE_MODELS",
                    ])
                    .map(|key| {
                        key.as_str()
                            .to_ascii_lowercase()
                            .replacen("vertexai_", "vertex.", 1)
                            .into()
                    }),
            );

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check that everything needed to build the proxy target is present
    ///
    /// # Errors
    ///
    /// Returns an error if the project or location is missing.
    pub fn validate(&self) -> Result<()> {
        if self.vertex.project.trim().is_empty() || self.vertex.location.trim().is_empty() {
            return Err(Error::Config(
                "VERTEXAI_LOCATION and VERTEXAI_PROJECT env vars must be set".to_string(),
            ));
        }
        if self.auth.scopes.is_empty() {
            return Err(Error::Config("auth.scopes must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Deadline for one proxied request (token fetch plus upstream call)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Vertex AI upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexConfig {
    /// Google Cloud project ID
    pub project: String,
    /// Vertex AI region, e.g. `us-central1`
    pub location: String,
    /// Host pattern for the regional endpoint
    pub api_host_format: String,
    /// Full upstream base URL, bypassing `api_host_format`
    pub base_url: Option<String>,
    /// Model IDs advertised by `/v1/models` (list or comma-separated string)
    #[serde(deserialize_with = "deserialize_model_ids")]
    pub available_models: Option<Vec<String>>,
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            location: String::new(),
            api_host_format: DEFAULT_API_HOST_FORMAT.to_string(),
            base_url: None,
            available_models: None,
        }
    }
}

impl VertexConfig {
    /// Build the upstream resource root
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting URL cannot be parsed.
    pub fn target_url(&self) -> Result<Url> {
        let raw = match &self.base_url {
            Some(base) => base.clone(),
            None => {
                let host = self.api_host_format.replace("{location}", &self.location);
                format!(
                    "https://{host}/v1/projects/{}/locations/{}/endpoints/openapi",
                    self.project, self.location
                )
            }
        };
        Url::parse(&raw)
            .map_err(|e| Error::Config(format!("Invalid target URL '{raw}': {e}")))
    }
}

/// Credential configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth scopes requested from the credential source
    pub scopes: Vec<String>,
    /// Cached tokens closer than this to expiry are refreshed
    #[serde(with = "humantime_serde")]
    pub refresh_margin: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            refresh_margin: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelIds {
    List(Vec<String>),
    Csv(String),
}

fn deserialize_model_ids<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Option::<ModelIds>::deserialize(deserializer)?;
    Ok(ids.map(|ids| match ids {
        ModelIds::List(list) => list,
        ModelIds::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vertex(project: &str, location: &str) -> VertexConfig {
        VertexConfig {
            project: project.to_string(),
            location: location.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn target_url_uses_regional_host() {
        let url = vertex("my-proj", "us-central1").target_url().unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("us-central1-aiplatform.googleapis.com"));
        assert_eq!(
            url.path(),
            "/v1/projects/my-proj/locations/us-central1/endpoints/openapi"
        );
    }

    #[test]
    fn target_url_honours_custom_host_format() {
        let config = VertexConfig {
            api_host_format: "{location}-private.example.internal".to_string(),
            ..vertex("p", "europe-west4")
        };
        let url = config.target_url().unwrap();
        assert_eq!(url.host_str(), Some("europe-west4-private.example.internal"));
    }

    #[test]
    fn target_url_base_url_override_wins() {
        let config = VertexConfig {
            base_url: Some("http://127.0.0.1:9999/v1/custom".to_string()),
            ..vertex("p", "l")
        };
        let url = config.target_url().unwrap();
        assert_eq!(url.port(), Some(9999));
        assert_eq!(url.path(), "/v1/custom");
    }

    #[test]
    fn target_url_rejects_garbage() {
        let config = VertexConfig {
            base_url: Some("not a url".to_string()),
            ..vertex("p", "l")
        };
        assert!(matches!(config.target_url(), Err(Error::Config(_))));
    }

    #[test]
    fn validate_requires_project_and_location() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.vertex = vertex("proj", "");
        assert!(config.validate().is_err());

        config.vertex = vertex("proj", "us-east5");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_requires_scopes() {
        let mut config = Config {
            vertex: vertex("proj", "us-east5"),
            ..Default::default()
        };
        config.auth.scopes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.refresh_margin, Duration::from_secs(60));
        assert_eq!(config.auth.scopes, vec![CLOUD_PLATFORM_SCOPE.to_string()]);
        assert!(config.vertex.available_models.is_none());
    }

    #[test]
    fn available_models_accepts_csv_string() {
        let yaml = r#"
vertex:
  project: p
  location: l
  available_models: "google/gemini-2.0-flash, ,google/gemini-2.5-pro"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.vertex.available_models.unwrap(),
            vec!["google/gemini-2.0-flash", " ", "google/gemini-2.5-pro"]
        );
    }

    #[test]
    fn available_models_accepts_list() {
        let yaml = r"
vertex:
  available_models:
    - a
    - b
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.vertex.available_models.unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn durations_parse_humantime() {
        let yaml = r"
server:
  request_timeout: 90s
auth:
  refresh_margin: 2m
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.request_timeout, Duration::from_secs(90));
        assert_eq!(config.auth.refresh_margin, Duration::from_secs(120));
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "server:\n  port: 18080\nvertex:\n  project: from-file\n  location: asia-northeast1").unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 18080);
        assert_eq!(config.vertex.location, "asia-northeast1");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/vertex-proxy.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
