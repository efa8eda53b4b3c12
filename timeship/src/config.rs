//! Runtime settings, resolved from `TIMESHIP_*` environment variables with
//! command-line overrides taking precedence.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const ENV_ROOT: &str = "TIMESHIP_ROOT";
pub const ENV_ADDRESS: &str = "TIMESHIP_ADDRESS";
pub const ENV_API_PREFIX: &str = "TIMESHIP_API_PREFIX";
pub const ENV_CORS_ALLOWED_ORIGINS: &str = "TIMESHIP_CORS_ALLOWED_ORIGINS";

const DEFAULT_ADDRESS: &str = ":8080";
const DEFAULT_API_PREFIX: &str = "/api";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:8080";

/// Command-line overrides for individual settings.
#[derive(Debug, Default)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub address: Option<String>,
    pub api_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory served as the `local` storage root.
    pub root: PathBuf,
    /// Listen address; `:port` is shorthand for all interfaces.
    pub address: String,
    /// Prefix under which API routes are mounted, `/` for none.
    pub api_prefix: String,
    pub cors_allowed_origins: Vec<String>,
}

impl Settings {
    pub fn load(overrides: Overrides) -> Result<Self> {
        let mut settings = Self::from_lookup(|key| env::var(key).ok(), overrides);
        if settings.root.as_os_str().is_empty() {
            settings.root = env::current_dir().context("resolving working directory")?;
        }
        Ok(settings)
    }

    /// Pure resolution from a variable lookup; an empty root means "use the
    /// working directory" and is filled in by [`Settings::load`].
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, overrides: Overrides) -> Self {
        let root = overrides
            .root
            .or_else(|| lookup(ENV_ROOT).filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_default();

        let address = overrides
            .address
            .or_else(|| lookup(ENV_ADDRESS).filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());

        let api_prefix = normalize_prefix(
            overrides
                .api_prefix
                .or_else(|| lookup(ENV_API_PREFIX).filter(|v| !v.is_empty()))
                .unwrap_or_else(|| DEFAULT_API_PREFIX.to_string()),
        );

        let cors_allowed_origins = lookup(ENV_CORS_ALLOWED_ORIGINS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_CORS_ORIGIN.to_string()]);

        Self {
            root,
            address,
            api_prefix,
            cors_allowed_origins,
        }
    }

    /// The address handed to the TCP listener; a bare `:port` binds all
    /// interfaces.
    pub fn listen_addr(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }
}

/// Prefixes always start with `/` and never end with one (except `/`
/// itself, which means "mount at the root").
fn normalize_prefix(raw: String) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
