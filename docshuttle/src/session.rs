//! Session ownership and the auth reconciliation state machine.
//!
//! Exactly one [`Session`] exists per run; it exclusively owns the
//! browsing context. Bootstrap walks
//! `Unauthenticated → PortalAuthenticated → CredentialsFetched →
//! FilingAuthenticated → TenantVerified`; any step can fail into the
//! terminal error state. No folder operation runs before the machine
//! reaches `TenantVerified`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::backend::{origin_of, PageDriver};
use crate::config::EngineConfig;
use crate::diagnostics;
use crate::dialogs::post_login_dialog_watch;
use crate::errors::EngineError;
use crate::query::Query;
use crate::tenant::tenant_matches;
use crate::ui;
use crate::wait::{await_condition, DEFAULT_POLL};

/// Cross-application credentials read from the Portal. Held in memory
/// only; the core never persists them.
#[derive(Clone)]
pub struct Credentials {
    pub tenant_code: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_code", &self.tenant_code)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Point-in-time classification of the page. Recomputed, never cached:
/// UI state can change between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSurfaceState {
    OnLoginPage,
    OnTargetUi,
    Indeterminate,
}

/// Progress through the reconciliation machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthPhase {
    Unauthenticated,
    PortalAuthenticated,
    CredentialsFetched,
    FilingAuthenticated,
    TenantVerified,
}

/// Suspension point for the operator-interactive Portal login. The
/// engine never types Portal credentials; it waits for an out-of-band
/// signal that the operator has completed login, then re-checks.
#[async_trait]
pub trait OperatorGate: Send + Sync {
    async fn wait_for_operator(&self, prompt: &str) -> Result<(), EngineError>;
}

/// Non-fatal login-state probe of both applications.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    /// `None` when the probe could not determine the state.
    pub portal_logged_in: Option<bool>,
    pub filing_logged_in: Option<bool>,
}

static HEADER_TENANT_FALLBACK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\s*([A-Z0-9][A-Z0-9 \-']{3,})").expect("valid regex"));

const NAV_SETTLE: Duration = Duration::from_millis(500);
const FIELD_TIMEOUT: Duration = Duration::from_secs(30);
const SURFACE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Session {
    driver: Arc<dyn PageDriver>,
    config: EngineConfig,
    tenant_identity: Option<String>,
    credentials: Option<Credentials>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("tenant_identity", &self.tenant_identity)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Run the full reconciliation machine and hand back a session that
    /// is authenticated into both applications and scoped to the
    /// requested tenant, with the filing surface activated and ready.
    #[instrument(skip(driver, config, gate))]
    pub async fn bootstrap(
        driver: Arc<dyn PageDriver>,
        config: EngineConfig,
        gate: &dyn OperatorGate,
        tenant: &str,
    ) -> Result<Session, EngineError> {
        let mut session = Session {
            driver,
            config,
            tenant_identity: None,
            credentials: None,
        };

        if session.config.reset_auth_at_start {
            session.reset_filing_auth().await;
        }

        let mut phase = AuthPhase::Unauthenticated;
        loop {
            debug!(?phase, "auth machine");
            phase = match phase {
                AuthPhase::Unauthenticated => {
                    session.ensure_portal_login(gate).await?;
                    AuthPhase::PortalAuthenticated
                }
                AuthPhase::PortalAuthenticated => {
                    let creds = session.fetch_credentials(tenant).await?;
                    session.credentials = Some(creds);
                    AuthPhase::CredentialsFetched
                }
                AuthPhase::CredentialsFetched => {
                    session.ensure_filing_login(false).await?;
                    AuthPhase::FilingAuthenticated
                }
                AuthPhase::FilingAuthenticated => {
                    session.verify_tenant(tenant).await?;
                    AuthPhase::TenantVerified
                }
                AuthPhase::TenantVerified => break,
            };
        }

        session.activate_filing().await?;
        info!(tenant, "session bootstrapped and tenant verified");
        Ok(session)
    }

    pub fn driver(&self) -> &Arc<dyn PageDriver> {
        &self.driver
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The verified tenant name as the Filing System renders it, when
    /// the header exposed one.
    pub fn tenant_identity(&self) -> Option<&str> {
        self.tenant_identity.as_deref()
    }

    /// Best-effort teardown: close the browsing context (which releases
    /// the profile lock held by the driver).
    pub async fn close(self) {
        if let Err(e) = self.driver.close().await {
            warn!(error = %e, "session close failed");
        }
    }

    /* ---------------- health check ---------------- */

    /// Probe login state on both applications without failing the run.
    /// Navigates away and restores the prior URL best-effort.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthReport {
        let return_url = self.driver.current_url().await.unwrap_or_default();

        let portal_logged_in = match self.probe_portal().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "portal health probe failed");
                None
            }
        };

        let filing_logged_in = match self.probe_filing().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "filing health probe failed");
                None
            }
        };

        let report = HealthReport {
            portal_logged_in,
            filing_logged_in,
        };

        if !return_url.is_empty() && return_url != "about:blank" {
            if let Err(e) = self.driver.navigate(&return_url).await {
                warn!(error = %e, "could not restore prior page after health check");
            }
        }

        info!(
            portal = ?report.portal_logged_in,
            filing = ?report.filing_logged_in,
            "session health check"
        );
        report
    }

    async fn probe_portal(&self) -> Result<bool, EngineError> {
        self.driver.navigate(&self.config.portal.tenants_url).await?;
        tokio::time::sleep(NAV_SETTLE).await;
        let url = self.driver.current_url().await?;
        let on_login = self.portal_url_is_login(&url);
        let unauthorized = self
            .driver
            .read_texts(&Query::text_contains("unauthorized"))
            .await
            .map(|t| !t.is_empty())
            .unwrap_or(false);
        Ok(!on_login && !unauthorized)
    }

    async fn probe_filing(&self) -> Result<bool, EngineError> {
        self.driver.navigate(&self.config.filing.filing_url()).await?;
        tokio::time::sleep(NAV_SETTLE).await;
        Ok(self.classify_filing_surface().await? != AuthSurfaceState::OnLoginPage)
    }

    /* ---------------- portal ---------------- */

    fn portal_url_is_login(&self, url: &str) -> bool {
        self.config
            .portal
            .login_fragments
            .iter()
            .any(|fragment| url.contains(fragment.as_str()))
    }

    async fn ensure_portal_login(&self, gate: &dyn OperatorGate) -> Result<(), EngineError> {
        self.driver.navigate(&self.config.portal.tenants_url).await?;
        tokio::time::sleep(NAV_SETTLE).await;

        let url = self.driver.current_url().await?;
        if !self.portal_url_is_login(&url) {
            debug!("portal session reused");
            return Ok(());
        }

        info!("portal login required; waiting for operator");
        gate.wait_for_operator(
            "Log into the Portal in the opened browser window, then signal to continue.",
        )
        .await?;

        self.driver.navigate(&self.config.portal.tenants_url).await?;
        tokio::time::sleep(NAV_SETTLE).await;
        let url = self.driver.current_url().await?;
        if self.portal_url_is_login(&url) {
            return Err(EngineError::Fatal(
                "Portal still shows the login screen after operator sign-in".into(),
            ));
        }
        Ok(())
    }

    /// Locate the tenant's Portal record and read the Filing System
    /// credentials from its integration tab.
    #[instrument(skip(self))]
    async fn fetch_credentials(&self, tenant: &str) -> Result<Credentials, EngineError> {
        self.driver.navigate(&self.config.portal.tenants_url).await?;
        tokio::time::sleep(NAV_SETTLE).await;

        let exact = ui::portal_tenant_link_exact(tenant);
        let contains = ui::portal_tenant_link_contains(tenant);
        let link = if self.driver.count(&exact).await? > 0 {
            exact
        } else if self.driver.count(&contains).await? > 0 {
            contains
        } else {
            let nearby = self.nearby_tenant_candidates().await;
            return Err(EngineError::PreconditionFailure(format!(
                "tenant \"{tenant}\" not found in Portal listing; nearby candidates: {nearby:?}"
            )));
        };
        self.driver.click(&link).await?;
        tokio::time::sleep(NAV_SETTLE).await;

        let driver = self.driver.as_ref();
        let tab = ui::portal_integration_tab();
        let tab_ref = &tab;
        await_condition("portal integration tab", FIELD_TIMEOUT, DEFAULT_POLL, move || async move {
            driver.count(tab_ref).await.unwrap_or(0) > 0
        })
        .await?;
        self.driver.click(&tab).await?;

        let code_query = ui::portal_tenant_code();
        let code_ref = &code_query;
        await_condition("portal tenant code", FIELD_TIMEOUT, DEFAULT_POLL, move || async move {
            driver.count(code_ref).await.unwrap_or(0) > 0
        })
        .await?;
        let tenant_code = self
            .driver
            .read_texts(&code_query)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let username = self.driver.read_value(&ui::portal_filing_username()).await?;
        let password = self.driver.read_value(&ui::portal_filing_password()).await?;

        if tenant_code.is_empty() || username.is_empty() || password.is_empty() {
            return Err(EngineError::Fatal(
                "could not read Filing System credentials from the Portal integration tab".into(),
            ));
        }

        info!(tenant_code = %tenant_code, username = %username, "credentials resolved from Portal");
        Ok(Credentials {
            tenant_code,
            username,
            password,
        })
    }

    async fn nearby_tenant_candidates(&self) -> Vec<String> {
        let mut out = Vec::new();
        for text in self
            .driver
            .read_texts(&ui::portal_listing_links())
            .await
            .unwrap_or_default()
        {
            if text.is_empty() || text.len() > 80 {
                continue;
            }
            if !out.contains(&text) {
                out.push(text);
            }
            if out.len() >= 15 {
                break;
            }
        }
        out
    }

    /* ---------------- filing ---------------- */

    /// Classify the current page. Derived from a fresh snapshot of URL
    /// plus login-field and target-surface markers.
    pub async fn classify_filing_surface(&self) -> Result<AuthSurfaceState, EngineError> {
        let url = self.driver.current_url().await?.to_lowercase();
        let url_is_login = self
            .config
            .filing
            .login_fragments
            .iter()
            .any(|fragment| url.contains(fragment.as_str()));

        let heading = self
            .driver
            .is_visible(&ui::filing_signin_heading())
            .await
            .unwrap_or(false);
        let auto_failed = self
            .driver
            .is_visible(&ui::filing_autosignin_failed())
            .await
            .unwrap_or(false);
        let code_field = self
            .driver
            .is_visible(&ui::filing_tenant_code_field())
            .await
            .unwrap_or(false);
        let user_field = self
            .driver
            .is_visible(&ui::filing_username_field())
            .await
            .unwrap_or(false);
        let pass_field = self
            .driver
            .is_visible(&ui::filing_password_field())
            .await
            .unwrap_or(false);

        if url_is_login || heading || auto_failed || (code_field && (user_field || pass_field)) {
            return Ok(AuthSurfaceState::OnLoginPage);
        }

        let target_markers = self.driver.count(&ui::folder_pane()).await.unwrap_or(0) > 0
            || self.driver.count(&ui::document_list()).await.unwrap_or(0) > 0
            || self
                .driver
                .count(&ui::all_documents_badge())
                .await
                .unwrap_or(0)
                > 0;
        let on_filing_origin = !self.config.filing.base_url.is_empty()
            && url.starts_with(&self.config.filing.base_url.to_lowercase());

        if target_markers || on_filing_origin {
            return Ok(AuthSurfaceState::OnTargetUi);
        }
        Ok(AuthSurfaceState::Indeterminate)
    }

    /// Establish a logged-in Filing session, reusing the existing one
    /// when the target UI is already up. Wrong credentials are not
    /// retried: re-submitting the same values cannot succeed and risks
    /// a lockout.
    #[instrument(skip(self))]
    async fn ensure_filing_login(&mut self, force_fresh: bool) -> Result<(), EngineError> {
        if force_fresh {
            self.force_logout().await;
        }

        self.driver.navigate(&self.config.filing.filing_url()).await?;
        tokio::time::sleep(NAV_SETTLE).await;

        let mut state = self.classify_filing_surface().await?;
        if state == AuthSurfaceState::Indeterminate {
            // Give slow redirects a moment before deciding.
            let this: &Session = &*self;
            let settle = await_condition(
                "filing surface classification",
                Duration::from_secs(5),
                DEFAULT_POLL,
                move || async move {
                    !matches!(
                        this.classify_filing_surface().await,
                        Ok(AuthSurfaceState::Indeterminate)
                    )
                },
            )
            .await;
            if settle.is_ok() {
                state = self.classify_filing_surface().await?;
            }
        }

        match state {
            AuthSurfaceState::OnTargetUi => {
                info!("filing session reused, skipping credential entry");
                return Ok(());
            }
            AuthSurfaceState::Indeterminate => {
                warn!("filing surface indeterminate after settle; treating as logged in");
                return Ok(());
            }
            AuthSurfaceState::OnLoginPage => {}
        }

        let creds = self.credentials.clone().ok_or_else(|| {
            EngineError::PreconditionFailure(
                "filing login required but no credentials were fetched".into(),
            )
        })?;
        info!(tenant_code = %creds.tenant_code, "filing login required");

        let code_field = ui::filing_tenant_code_field();
        {
            let driver = self.driver.as_ref();
            let code_ref = &code_field;
            await_condition("filing tenant-code field", FIELD_TIMEOUT, DEFAULT_POLL, move || async move {
                driver.count(code_ref).await.unwrap_or(0) > 0
            })
            .await?;
        }
        self.driver.fill(&code_field, &creds.tenant_code).await?;
        self.driver
            .fill(&ui::filing_username_field(), &creds.username)
            .await?;
        self.driver
            .fill(&ui::filing_password_field(), &creds.password)
            .await?;
        self.driver.click(&ui::filing_signin_submit()).await?;
        tokio::time::sleep(NAV_SETTLE).await;

        // The post-login landing page varies; re-navigate to the filing
        // surface before re-classifying.
        self.driver.navigate(&self.config.filing.filing_url()).await?;
        tokio::time::sleep(NAV_SETTLE).await;

        if self.classify_filing_surface().await? == AuthSurfaceState::OnLoginPage {
            diagnostics::capture(
                self.driver.as_ref(),
                &self.config.artifact_dir,
                "filing-login-failed",
                json!({ "tenant_code": creds.tenant_code, "username": creds.username }),
            )
            .await;
            return Err(EngineError::Fatal(
                "Filing System login did not complete (still on login page after submitting)"
                    .into(),
            ));
        }

        info!("filing login completed");
        Ok(())
    }

    /// Read the active tenant from the header and compare against the
    /// requested one. On mismatch: force logout, one fresh re-login,
    /// re-check. A second mismatch is terminal; a third attempt with the
    /// same credentials could only lock the account.
    #[instrument(skip(self))]
    async fn verify_tenant(&mut self, requested: &str) -> Result<(), EngineError> {
        let active = self.read_active_tenant().await;
        let Some(active) = active else {
            warn!("filing header exposes no tenant name; proceeding unverified");
            self.tenant_identity = None;
            return Ok(());
        };

        if tenant_matches(requested, &active) {
            self.tenant_identity = Some(active);
            return Ok(());
        }

        warn!(%active, requested, "filing session scoped to wrong tenant; re-authenticating");
        self.ensure_filing_login(true).await?;

        let active = self.read_active_tenant().await;
        match active {
            Some(active) if tenant_matches(requested, &active) => {
                self.tenant_identity = Some(active);
                Ok(())
            }
            Some(active) => {
                diagnostics::capture(
                    self.driver.as_ref(),
                    &self.config.artifact_dir,
                    "tenant-mismatch",
                    json!({ "requested": requested, "active": active }),
                )
                .await;
                Err(EngineError::AuthMismatch(format!(
                    "Filing session is scoped to \"{active}\" after forced re-login, expected \"{requested}\""
                )))
            }
            None => {
                warn!("tenant unreadable after re-login; proceeding unverified");
                self.tenant_identity = None;
                Ok(())
            }
        }
    }

    /// The header renders "<user> (… System Administrator) - TENANT
    /// NAME"; the tenant is whatever follows the last " - ".
    async fn read_active_tenant(&self) -> Option<String> {
        let texts = self
            .driver
            .read_texts(&ui::filing_system_user_marker())
            .await
            .unwrap_or_default();
        for text in texts {
            if let Some(idx) = text.rfind(" - ") {
                let name = text[idx + 3..].trim();
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }

        // Fallback: scan the whole body for a "- SOME TENANT" tail.
        let body = self
            .driver
            .read_texts(&Query::css("body"))
            .await
            .unwrap_or_default()
            .into_iter()
            .next()
            .unwrap_or_default();
        HEADER_TENANT_FALLBACK
            .captures(&body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    /// Best-effort sign-out: the logout route first, then the user menu.
    async fn force_logout(&self) {
        if let Err(e) = self.driver.navigate(&self.config.filing.logout_url()).await {
            warn!(error = %e, "logout navigation failed");
        }
        if self
            .driver
            .is_visible(&ui::filing_user_menu())
            .await
            .unwrap_or(false)
        {
            let _ = self.driver.click(&ui::filing_user_menu()).await;
            let _ = self.driver.click(&ui::filing_logout_actions()).await;
        }
        tokio::time::sleep(NAV_SETTLE).await;
    }

    /// Clear Filing-host cookies and log out so the machine never
    /// silently reuses a stale cross-tenant session.
    async fn reset_filing_auth(&self) {
        info!("resetting filing auth state before bootstrap");
        if let Some(origin) = origin_of(&self.config.filing.base_url) {
            if let Err(e) = self.driver.clear_cookies(&origin).await {
                warn!(error = %e, "cookie clear failed");
            }
        }
        self.force_logout().await;
    }

    /* ---------------- filing surface activation ---------------- */

    /// Navigate to the filing view and wait for the folder pane to
    /// render, absorbing the restore-pages popup and any post-login
    /// dialogs on the way.
    #[instrument(skip(self))]
    pub async fn activate_filing(&self) -> Result<(), EngineError> {
        self.driver.navigate(&self.config.filing.filing_url()).await?;
        tokio::time::sleep(NAV_SETTLE).await;

        self.dismiss_restore_pages_popup().await;

        if self.config.post_login_dialog_watch {
            post_login_dialog_watch(
                self.driver.as_ref(),
                Duration::from_secs(10),
                Duration::from_millis(500),
            )
            .await?;
        }

        if self
            .driver
            .count(&ui::all_documents_badge())
            .await
            .unwrap_or(0)
            > 0
        {
            let _ = self.driver.click(&ui::all_documents_badge()).await;
        }

        let candidates = ui::folder_pane_candidates();
        let driver = self.driver.as_ref();
        let candidates_ref = &candidates;
        let ready = await_condition(
            "filing folder pane",
            SURFACE_TIMEOUT,
            Duration::from_millis(300),
            move || async move {
                for candidate in candidates_ref {
                    if driver.count(candidate).await.unwrap_or(0) > 0 {
                        return true;
                    }
                }
                false
            },
        )
        .await;

        if let Err(e) = ready {
            let body_head: String = self
                .driver
                .read_texts(&Query::css("body"))
                .await
                .unwrap_or_default()
                .into_iter()
                .next()
                .unwrap_or_default()
                .chars()
                .take(400)
                .collect();
            diagnostics::capture(
                self.driver.as_ref(),
                &self.config.artifact_dir,
                "filing-surface-timeout",
                json!({
                    "url": self.driver.current_url().await.unwrap_or_default(),
                    "title": self.driver.title().await.unwrap_or_default(),
                    "body_head": body_head,
                }),
            )
            .await;
            return Err(e);
        }

        debug!("filing surface ready");
        Ok(())
    }

    async fn dismiss_restore_pages_popup(&self) {
        if !self
            .driver
            .is_visible(&ui::restore_pages_popup())
            .await
            .unwrap_or(false)
        {
            return;
        }
        let _ = self.driver.press_key("Escape").await;
        let _ = self.driver.click(&ui::restore_pages_close()).await;
    }
}
