use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// Engine configuration: endpoints, toggles and artifact locations.
///
/// Everything has a serde default so a config file only needs to name
/// the values that differ from the shipped defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub portal: PortalConfig,
    pub filing: FilingConfig,

    /// Documents moved per change-folder round trip.
    pub batch_size: usize,

    /// Clear Filing System cookies and issue a best-effort logout before
    /// the auth machine runs, so a stale cross-tenant session is never
    /// silently reused.
    pub reset_auth_at_start: bool,

    /// Watch for (and dismiss) blocking dialogs for a longer window
    /// right after Filing login. Disabled for login-only runs.
    pub post_login_dialog_watch: bool,

    /// Where failure artifacts (JSON + screenshot pairs) are written.
    pub artifact_dir: PathBuf,

    /// HTTP Basic Auth handed to the browser layer; opaque to the core.
    pub basic_auth: Option<BasicAuth>,

    /// On-disk browser profile directory, guarded by a lock file.
    pub profile_dir: PathBuf,

    /// DevTools endpoint of the already-running browser.
    pub devtools_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            filing: FilingConfig::default(),
            batch_size: 50,
            reset_auth_at_start: false,
            post_login_dialog_watch: true,
            artifact_dir: PathBuf::from("."),
            basic_auth: None,
            profile_dir: PathBuf::from(".browser-profile"),
            devtools_port: 9222,
        }
    }
}

/// Portal (tenant directory) endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// The tenants listing page; also the page whose redirect reveals
    /// whether the operator is logged in.
    pub tenants_url: String,
    /// URL fragments that mark the Portal's login surface.
    pub login_fragments: Vec<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            tenants_url: String::new(),
            login_fragments: vec!["/users/log_in".into(), "/login".into()],
        }
    }
}

/// Filing System endpoints, all relative to one origin.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilingConfig {
    pub base_url: String,
    pub filing_path: String,
    pub logout_path: String,
    pub user_list_path: String,
    /// URL fragments that mark the Filing System's login surface.
    pub login_fragments: Vec<String>,
}

impl Default for FilingConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            filing_path: "/DocumentViewer/Filing".into(),
            logout_path: "/Account/Logout".into(),
            user_list_path: "/Admin/Users/UserList".into(),
            login_fragments: vec!["/account/login".into(), "/account/prelogin".into()],
        }
    }
}

impl FilingConfig {
    pub fn filing_url(&self) -> String {
        format!("{}{}", self.base_url, self.filing_path)
    }

    pub fn logout_url(&self) -> String {
        format!("{}{}", self.base_url, self.logout_path)
    }

    pub fn user_list_url(&self, origin: &str) -> String {
        format!("{}{}", origin, self.user_list_path)
    }
}

/// HTTP Basic Auth pass-through for the browser layer.
#[derive(Clone, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
