//! Shared in-memory fake of the Portal and Filing System surfaces.
//!
//! Implements [`PageDriver`] by interpreting the engine's queries
//! against a small state model of both applications, so the suites can
//! script tenant variants (missing controls, no checkboxes, blocking
//! dialogs, wrong-tenant sessions) without a browser.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use docshuttle::ui;
use docshuttle::{EngineConfig, EngineError, OperatorGate, PageDriver, Query};

pub const PORTAL_TENANTS_URL: &str = "https://portal.test/admin_panel/tenants";
pub const PORTAL_LOGIN_URL: &str = "https://portal.test/users/log_in";
pub const FILING_BASE_URL: &str = "https://filing.test";
pub const FILING_LOGIN_URL: &str = "https://filing.test/Account/Login";

/// Engine configuration pointed at the fake, with artifacts going to a
/// caller-owned temp directory.
pub fn test_config(artifact_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.portal.tenants_url = PORTAL_TENANTS_URL.to_string();
    config.filing.base_url = FILING_BASE_URL.to_string();
    config.artifact_dir = artifact_dir.to_path_buf();
    config.profile_dir = artifact_dir.join("profile");
    // The long post-login watch is covered by the dialog suite.
    config.post_login_dialog_watch = false;
    config
}

#[derive(Debug, Clone)]
pub struct PortalTenant {
    pub name: String,
    pub code: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct FilingAccount {
    pub code: String,
    pub username: String,
    pub password: String,
    /// Tenant name the header shows once this account is signed in.
    pub header: String,
}

#[derive(Debug, Default, Clone)]
pub struct LoginForm {
    pub code: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug)]
pub struct FakeState {
    pub url: String,
    pub body_text: String,

    // Portal
    pub portal_logged_in: bool,
    pub portal_tenants: Vec<PortalTenant>,
    pub detail_open: Option<usize>,
    pub integration_tab_open: bool,

    // Filing auth
    pub filing_logged_in: bool,
    pub header_tenant: Option<String>,
    pub accounts: Vec<FilingAccount>,
    pub login_form: LoginForm,
    pub login_attempts: Vec<LoginForm>,
    pub logout_count: usize,
    pub cookies_cleared: Vec<String>,

    // Filing surface
    pub folders: Vec<String>,
    pub window_start: usize,
    pub window_len: usize,
    pub selected_folder: Option<String>,
    pub docs: HashMap<String, Vec<String>>,

    // Select mode + move machinery
    pub select_mode: bool,
    pub has_checkboxes: bool,
    pub aria_select_marker: bool,
    pub direct_toggle_present: bool,
    pub direct_toggle_ineffective: bool,
    pub select_label_present: bool,
    pub change_label_present: bool,
    pub change_direct_present: bool,
    pub overflow_present: bool,
    pub menu_open: bool,
    pub selected_titles: Vec<String>,
    pub dialog_open: bool,
    pub pending_dest: Option<String>,
    pub confirm_clicks: usize,
    pub fail_confirm_at: Option<usize>,
    pub drop_select_mode_after_move: bool,
    pub moved: Vec<(String, String)>,

    // Blocking dialogs / popups
    pub dialog_queue: usize,
    pub restore_popup: bool,

    // User admin
    pub users: Vec<String>,
    pub filter_input: String,
    pub filter_applied: String,

    // Counters
    pub select_mode_clicks: usize,
    pub mutation_clicks: usize,
    pub navigations: Vec<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            url: "about:blank".into(),
            body_text: String::new(),
            portal_logged_in: true,
            portal_tenants: Vec::new(),
            detail_open: None,
            integration_tab_open: false,
            filing_logged_in: true,
            header_tenant: None,
            accounts: Vec::new(),
            login_form: LoginForm::default(),
            login_attempts: Vec::new(),
            logout_count: 0,
            cookies_cleared: Vec::new(),
            folders: Vec::new(),
            window_start: 0,
            window_len: 5,
            selected_folder: None,
            docs: HashMap::new(),
            select_mode: false,
            has_checkboxes: true,
            aria_select_marker: false,
            direct_toggle_present: true,
            direct_toggle_ineffective: false,
            select_label_present: false,
            change_label_present: false,
            change_direct_present: true,
            overflow_present: false,
            menu_open: false,
            selected_titles: Vec::new(),
            dialog_open: false,
            pending_dest: None,
            confirm_clicks: 0,
            fail_confirm_at: None,
            drop_select_mode_after_move: false,
            moved: Vec::new(),
            dialog_queue: 0,
            restore_popup: false,
            users: Vec::new(),
            filter_input: String::new(),
            filter_applied: String::new(),
            select_mode_clicks: 0,
            mutation_clicks: 0,
            navigations: Vec::new(),
        }
    }
}

impl FakeState {
    fn filing_surface_up(&self) -> bool {
        self.filing_logged_in && self.url.starts_with(FILING_BASE_URL) && !self.on_login_page()
    }

    fn on_login_page(&self) -> bool {
        self.url.to_lowercase().contains("/account/login")
    }

    fn portal_listing_shown(&self) -> bool {
        self.portal_logged_in && self.url == PORTAL_TENANTS_URL
    }

    fn on_user_list(&self) -> bool {
        self.filing_logged_in && self.url.contains("/Admin/Users/UserList")
    }

    fn current_docs(&self) -> Vec<String> {
        self.selected_folder
            .as_ref()
            .and_then(|folder| self.docs.get(folder))
            .cloned()
            .unwrap_or_default()
    }

    fn visible_folders(&self) -> &[String] {
        let end = (self.window_start + self.window_len).min(self.folders.len());
        let start = self.window_start.min(end);
        &self.folders[start..end]
    }

    fn header_line(&self) -> Option<String> {
        if !self.filing_logged_in {
            return None;
        }
        self.header_tenant
            .as_ref()
            .map(|tenant| format!("Mr Dyad Admin (System Administrator) - {tenant}"))
    }

    fn filtered_users(&self) -> Vec<String> {
        if self.filter_applied.is_empty() {
            return self.users.clone();
        }
        let needle = self.filter_applied.to_lowercase();
        self.users
            .iter()
            .filter(|user| user.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

use docshuttle::query::{normalize_text as norm, text_matches as matches_text};

fn css_of(query: Query) -> String {
    match query {
        Query::Css(css) => css,
        other => panic!("expected a css query, got {other}"),
    }
}

pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new(state: FakeState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state poisoned")
    }

    fn count_in(&self, state: &FakeState, query: &Query) -> usize {
        match query {
            Query::AnyOf(alternatives) => alternatives
                .iter()
                .map(|alt| self.count_in(state, alt))
                .find(|&count| count > 0)
                .unwrap_or(0),
            Query::Within(scope, inner) => self.count_within(state, scope, inner),
            Query::HasText {
                base,
                needle,
                exact,
            } => self.count_has_text(state, base, needle, *exact),
            Query::Text { needle, exact } => self.count_text(state, needle, *exact),
            Query::Css(css) => self.count_css(state, css),
            Query::XPath(_) => 0,
        }
    }

    fn count_css(&self, state: &FakeState, css: &str) -> usize {
        let pane = css_of(ui::folder_pane());
        let titles = css_of(ui::document_titles());
        let checkboxes = css_of(ui::document_checkboxes());
        let code_field = css_of(ui::filing_tenant_code_field());
        let user_field = css_of(ui::filing_username_field());
        let pass_field = css_of(ui::filing_password_field());
        let tab = css_of(ui::portal_integration_tab());
        let code_badge = css_of(ui::portal_tenant_code());
        let portal_user = css_of(ui::portal_filing_username());
        let portal_pass = css_of(ui::portal_filing_password());
        let user_filter = css_of(ui::user_list_filter());
        let user_cells = css_of(ui::user_list_name_cells());

        let surface = state.filing_surface_up();
        let docs = state.current_docs();

        if css == pane
            || css == "#folders_list"
            || css == "#folders"
            || css == "[id*=\"folder\" i]"
            || css == "[class*=\"folder\" i]"
        {
            return usize::from(surface);
        }
        if css == "span.all-docs-count" || css == "#document_list" {
            return usize::from(surface);
        }
        if css == titles || css == "#document_list li" {
            return if surface { docs.len() } else { 0 };
        }
        if css == ".instruction.primary" {
            return usize::from(surface && docs.is_empty());
        }
        if css == checkboxes {
            return if surface && state.select_mode && state.has_checkboxes {
                docs.len()
            } else {
                0
            };
        }
        if css == code_field || css == user_field || css == pass_field {
            return usize::from(state.on_login_page());
        }
        if css == "button[type=\"submit\"]" {
            return usize::from(state.on_login_page());
        }
        if css == tab {
            return usize::from(state.detail_open.is_some());
        }
        if css == code_badge || css == portal_user || css == portal_pass {
            return usize::from(state.integration_tab_open);
        }
        if css == "a" {
            return if state.portal_listing_shown() {
                state.portal_tenants.len()
            } else {
                0
            };
        }
        if css == "a#action_selectmode, button#action_selectmode" {
            return usize::from(surface && state.direct_toggle_present);
        }
        if css == "a#action_changefolder, button#action_changefolder" {
            return usize::from(surface && state.change_direct_present);
        }
        if css == "#folderselection" || css == "input#change_folder_confirm" {
            return usize::from(state.dialog_open);
        }
        if let Some(rest) = css.strip_prefix("#folderselection a[data-name=\"") {
            let name = rest.trim_end_matches("\"]").replace("\\\"", "\"");
            return usize::from(state.dialog_open && state.folders.iter().any(|f| f == &name));
        }
        if css == ".modal" || css == ".bootbox" || css == ".alertify.ajs-in" || css == "[role=\"dialog\"]" {
            return usize::from(state.dialog_queue > 0);
        }
        if css == "table tbody" || css == user_filter {
            return usize::from(state.on_user_list());
        }
        if css == user_cells {
            return if state.on_user_list() {
                state.filtered_users().len().max(1)
            } else {
                0
            };
        }
        if css == "body" {
            return 1;
        }
        if css.contains("aria-label") || css.contains("ellipsis") || css.contains("kebab") || css.contains("[title*") {
            return usize::from(surface && state.overflow_present);
        }
        0
    }

    fn count_text(&self, state: &FakeState, needle: &str, exact: bool) -> usize {
        let surface = state.filing_surface_up();
        let needle_lower = norm(needle).to_lowercase();
        match needle_lower.as_str() {
            "sign in to continue" => usize::from(state.on_login_page()),
            "automatic sign-in failed" => 0,
            "system administrator" => usize::from(state.header_line().is_some()),
            "select mode" => usize::from(
                surface && (state.select_label_present || state.menu_open),
            ),
            "select documents" | "multi-select" | "select" => 0,
            "change folder" | "move to folder" | "move folder" => usize::from(
                surface && (state.change_label_present || state.menu_open),
            ),
            "change document folder" => usize::from(state.dialog_open),
            "restore pages?" => usize::from(state.restore_popup),
            "folders" => usize::from(surface),
            "ajax issue" => usize::from(state.dialog_queue > 0),
            _ => {
                // A folder name: visible inside the change-folder dialog,
                // else in the rendered folder window.
                if state.dialog_open && state.folders.iter().any(|f| matches_text(f, needle, exact))
                {
                    return 1;
                }
                if surface {
                    state
                        .visible_folders()
                        .iter()
                        .filter(|f| matches_text(f, needle, exact))
                        .count()
                } else {
                    0
                }
            }
        }
    }

    fn count_has_text(&self, state: &FakeState, base: &str, needle: &str, exact: bool) -> usize {
        let surface = state.filing_surface_up();
        match base {
            "a" => {
                if state.portal_listing_shown() {
                    state
                        .portal_tenants
                        .iter()
                        .filter(|t| matches_text(&t.name, needle, exact))
                        .count()
                } else {
                    0
                }
            }
            "#selectedFolder" => usize::from(
                surface
                    && state
                        .selected_folder
                        .as_ref()
                        .map(|f| matches_text(f, needle, exact))
                        .unwrap_or(false),
            ),
            "#document_list li" => usize::from(
                surface
                    && state
                        .current_docs()
                        .iter()
                        .any(|title| matches_text(title, needle, exact)),
            ),
            "button, a" => {
                let affirmative = [
                    "ok", "confirm", "close", "continue", "yes", "got it", "\u{d7}",
                ];
                usize::from(
                    state.dialog_queue > 0
                        && affirmative.contains(&needle.to_lowercase().as_str()),
                )
            }
            "button" => match needle {
                "Sign In" => usize::from(state.on_login_page()),
                "Confirm" | "Move" => usize::from(state.dialog_open),
                _ => 0,
            },
            "label, li, div, [role=\"menuitemcheckbox\"]" => usize::from(state.menu_open),
            "[aria-checked=\"true\"]" => {
                usize::from(surface && state.select_mode && state.aria_select_marker)
            }
            "[class*=\"active\" i]" => 0,
            _ if base.contains("button") => usize::from(surface && state.overflow_present),
            _ => 0,
        }
    }

    fn count_within(&self, state: &FakeState, scope: &Query, inner: &Query) -> usize {
        // Folder entry inside the folder pane.
        if *scope == ui::folder_pane() {
            if let Query::Text { needle, exact } = inner {
                if !state.filing_surface_up() {
                    return 0;
                }
                return state
                    .visible_folders()
                    .iter()
                    .filter(|f| matches_text(f, needle, *exact))
                    .count();
            }
            return 0;
        }

        // Per-row document machinery.
        if let Query::HasText {
            base,
            needle: title,
            exact: true,
        } = scope
        {
            if base == "#document_list li" {
                let row_exists = state.filing_surface_up()
                    && state.current_docs().iter().any(|t| t == title);
                if !row_exists {
                    return 0;
                }
                return match inner {
                    Query::Css(css) if css == "input[type=\"checkbox\"]" => {
                        usize::from(state.select_mode && state.has_checkboxes)
                    }
                    Query::Css(css) if css == "input[type=\"checkbox\"]:checked" => {
                        usize::from(state.selected_titles.iter().any(|t| t == title))
                    }
                    Query::Css(css) if css == "a, div" => 1,
                    _ => 0,
                };
            }
            if base == "label, li, div, [role=\"menuitemcheckbox\"]" {
                if !state.menu_open {
                    return 0;
                }
                return match inner {
                    Query::Css(css) if css == "input[type=\"checkbox\"]" => 1,
                    Query::Css(css) if css == "input[type=\"checkbox\"]:checked" => {
                        usize::from(state.select_mode)
                    }
                    _ => 0,
                };
            }
        }

        // Destination entry inside the change-folder dialog.
        if let Query::Css(css) = scope {
            if css == "#folderselection" {
                if let Query::Text { needle, exact } = inner {
                    return usize::from(
                        state.dialog_open
                            && state.folders.iter().any(|f| matches_text(f, needle, *exact)),
                    );
                }
            }
        }
        0
    }

    fn texts_in(&self, state: &FakeState, query: &Query) -> Vec<String> {
        match query {
            Query::AnyOf(alternatives) => alternatives
                .iter()
                .map(|alt| self.texts_in(state, alt))
                .find(|texts| !texts.is_empty())
                .unwrap_or_default(),
            Query::Within(scope, inner) => {
                if **scope == ui::folder_pane() {
                    if let Query::Text { needle, exact } = inner.as_ref() {
                        return state
                            .visible_folders()
                            .iter()
                            .filter(|f| matches_text(f, needle, *exact))
                            .cloned()
                            .collect();
                    }
                }
                Vec::new()
            }
            Query::Text { needle, exact: _ } => {
                let needle_lower = norm(needle).to_lowercase();
                if needle_lower == "system administrator" {
                    return state.header_line().into_iter().collect();
                }
                Vec::new()
            }
            Query::Css(css) => {
                let titles = css_of(ui::document_titles());
                let cells = css_of(ui::user_list_name_cells());
                if *css == titles {
                    return if state.filing_surface_up() {
                        state.current_docs()
                    } else {
                        Vec::new()
                    };
                }
                if *css == cells {
                    if !state.on_user_list() {
                        return Vec::new();
                    }
                    let filtered = state.filtered_users();
                    return if filtered.is_empty() {
                        vec!["No records found".to_string()]
                    } else {
                        filtered
                    };
                }
                if css == "a" {
                    return if state.portal_listing_shown() {
                        state.portal_tenants.iter().map(|t| t.name.clone()).collect()
                    } else {
                        Vec::new()
                    };
                }
                if *css == css_of(ui::portal_tenant_code()) {
                    return state
                        .detail_open
                        .and_then(|idx| state.portal_tenants.get(idx))
                        .filter(|_| state.integration_tab_open)
                        .map(|t| vec![t.code.clone()])
                        .unwrap_or_default();
                }
                if css == "body" {
                    return vec![state.body_text.clone()];
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn click_in(&self, state: &mut FakeState, query: &Query) -> Result<bool, EngineError> {
        match query {
            Query::AnyOf(alternatives) => {
                for alt in alternatives.clone() {
                    if self.count_in(state, &alt) > 0 {
                        return self.click_in(state, &alt);
                    }
                }
                Ok(false)
            }
            Query::Within(scope, inner) => self.click_within(state, scope, inner),
            Query::HasText {
                base,
                needle,
                exact,
            } => self.click_has_text(state, base, needle, *exact),
            Query::Text { needle, exact } => self.click_text(state, needle, *exact),
            Query::Css(css) => self.click_css(state, &css.clone()),
            Query::XPath(_) => Ok(false),
        }
    }

    fn click_css(&self, state: &mut FakeState, css: &str) -> Result<bool, EngineError> {
        if css == "a#action_selectmode, button#action_selectmode" {
            if !(state.filing_surface_up() && state.direct_toggle_present) {
                return Ok(false);
            }
            state.select_mode_clicks += 1;
            state.mutation_clicks += 1;
            if !state.direct_toggle_ineffective {
                state.select_mode = true;
            }
            return Ok(true);
        }
        if css == "a#action_changefolder, button#action_changefolder" {
            if !(state.filing_surface_up() && state.change_direct_present) {
                return Ok(false);
            }
            state.dialog_open = true;
            return Ok(true);
        }
        if css == "input#change_folder_confirm" {
            return self.confirm_move(state);
        }
        if let Some(rest) = css.strip_prefix("#folderselection a[data-name=\"") {
            let name = rest.trim_end_matches("\"]").replace("\\\"", "\"");
            if state.dialog_open && state.folders.iter().any(|f| f == &name) {
                state.pending_dest = Some(name);
                state.mutation_clicks += 1;
                return Ok(true);
            }
            return Ok(false);
        }
        if css == css_of(ui::portal_integration_tab()) {
            if state.detail_open.is_some() {
                state.integration_tab_open = true;
                return Ok(true);
            }
            return Ok(false);
        }
        if css == "button[type=\"submit\"]" {
            return Ok(self.submit_login(state));
        }
        if css == "span.all-docs-count" {
            return Ok(state.filing_surface_up());
        }
        if css == css_of(ui::user_list_filter()) {
            return Ok(state.on_user_list());
        }
        if css == "button[aria-label=\"Close\"]" {
            state.restore_popup = false;
            return Ok(true);
        }
        Ok(false)
    }

    fn click_text(&self, state: &mut FakeState, needle: &str, exact: bool) -> Result<bool, EngineError> {
        let needle_lower = norm(needle).to_lowercase();
        match needle_lower.as_str() {
            "select mode" => {
                if state.filing_surface_up() && (state.select_label_present || state.menu_open) {
                    state.select_mode_clicks += 1;
                    state.mutation_clicks += 1;
                    state.select_mode = true;
                    state.menu_open = false;
                    return Ok(true);
                }
                Ok(false)
            }
            "change folder" | "move to folder" | "move folder" => {
                if state.filing_surface_up() && (state.change_label_present || state.menu_open) {
                    state.dialog_open = true;
                    state.menu_open = false;
                    return Ok(true);
                }
                Ok(false)
            }
            "log out" | "logout" | "sign out" => Ok(false),
            _ => {
                // Destination by text inside the dialog.
                if state.dialog_open {
                    if let Some(name) = state
                        .folders
                        .iter()
                        .find(|f| matches_text(f, needle, exact))
                        .cloned()
                    {
                        state.pending_dest = Some(name);
                        state.mutation_clicks += 1;
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn click_has_text(
        &self,
        state: &mut FakeState,
        base: &str,
        needle: &str,
        exact: bool,
    ) -> Result<bool, EngineError> {
        match base {
            "a" => {
                if !state.portal_listing_shown() {
                    return Ok(false);
                }
                if let Some(idx) = state
                    .portal_tenants
                    .iter()
                    .position(|t| matches_text(&t.name, needle, exact))
                {
                    state.detail_open = Some(idx);
                    state.url = format!("https://portal.test/admin_panel/tenants/{idx}");
                    return Ok(true);
                }
                Ok(false)
            }
            "button, a" => {
                if state.dialog_queue > 0 {
                    state.dialog_queue -= 1;
                    return Ok(true);
                }
                Ok(false)
            }
            "button" => match needle {
                "Sign In" => Ok(self.submit_login(state)),
                "Confirm" | "Move" if state.dialog_open => self.confirm_move(state),
                _ => Ok(false),
            },
            _ if base.contains("button") => {
                if state.filing_surface_up() && state.overflow_present {
                    state.menu_open = true;
                    return Ok(true);
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn click_within(
        &self,
        state: &mut FakeState,
        scope: &Query,
        inner: &Query,
    ) -> Result<bool, EngineError> {
        // Folder entry click: selects the folder.
        if *scope == ui::folder_pane() {
            if let Query::Text { needle, exact } = inner {
                let hit = state
                    .visible_folders()
                    .iter()
                    .find(|f| matches_text(f, needle, *exact))
                    .cloned();
                if let Some(folder) = hit {
                    state.selected_folder = Some(folder);
                    state.menu_open = false;
                    state.dialog_open = false;
                    return Ok(true);
                }
                return Ok(false);
            }
        }

        if let Query::HasText {
            base,
            needle: title,
            exact: true,
        } = scope
        {
            if base == "#document_list li" {
                if !state.current_docs().iter().any(|t| t == title) {
                    return Ok(false);
                }
                match inner {
                    Query::Css(css)
                        if css == "input[type=\"checkbox\"]" || css == "a, div" =>
                    {
                        if !state.selected_titles.iter().any(|t| t == title) {
                            state.selected_titles.push(title.clone());
                        }
                        state.mutation_clicks += 1;
                        return Ok(true);
                    }
                    _ => return Ok(false),
                }
            }
            if base == "label, li, div, [role=\"menuitemcheckbox\"]" && state.menu_open {
                state.select_mode = true;
                state.select_mode_clicks += 1;
                state.mutation_clicks += 1;
                state.menu_open = false;
                return Ok(true);
            }
        }

        if let Query::Css(css) = scope {
            if css == "#folderselection" {
                if let Query::Text { needle, exact } = inner {
                    return self.click_text(state, needle, *exact);
                }
            }
        }
        Ok(false)
    }

    fn submit_login(&self, state: &mut FakeState) -> bool {
        if !state.on_login_page() {
            return false;
        }
        let form = state.login_form.clone();
        state.login_attempts.push(form.clone());
        if let Some(account) = state.accounts.iter().find(|a| {
            a.code == form.code && a.username == form.username && a.password == form.password
        }) {
            state.filing_logged_in = true;
            state.header_tenant = Some(account.header.clone());
            state.url = format!("{FILING_BASE_URL}/Home");
        }
        true
    }

    fn confirm_move(&self, state: &mut FakeState) -> Result<bool, EngineError> {
        if !state.dialog_open {
            return Ok(false);
        }
        state.confirm_clicks += 1;
        state.mutation_clicks += 1;
        if state.fail_confirm_at == Some(state.confirm_clicks) {
            return Err(EngineError::Driver(
                "change-folder confirm rejected by server".into(),
            ));
        }

        let dest = state.pending_dest.take().unwrap_or_default();
        let source = state.selected_folder.clone().unwrap_or_default();
        let selected = std::mem::take(&mut state.selected_titles);
        if let Some(source_docs) = state.docs.get_mut(&source) {
            source_docs.retain(|title| !selected.contains(title));
        }
        for title in selected {
            state.docs.entry(dest.clone()).or_default().push(title.clone());
            state.moved.push((title, dest.clone()));
        }
        state.dialog_open = false;
        if state.drop_select_mode_after_move {
            state.select_mode = false;
        }
        Ok(true)
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.navigations.push(url.to_string());
        state.menu_open = false;
        state.dialog_open = false;
        state.pending_dest = None;
        state.detail_open = None;
        state.integration_tab_open = false;

        if url == PORTAL_TENANTS_URL {
            state.url = if state.portal_logged_in {
                url.to_string()
            } else {
                PORTAL_LOGIN_URL.to_string()
            };
        } else if url.contains("/Account/Logout") {
            state.filing_logged_in = false;
            state.header_tenant = None;
            state.select_mode = false;
            state.logout_count += 1;
            state.url = FILING_LOGIN_URL.to_string();
        } else if url.starts_with(FILING_BASE_URL) {
            state.url = if state.filing_logged_in {
                url.to_string()
            } else {
                FILING_LOGIN_URL.to_string()
            };
        } else {
            state.url = url.to_string();
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, EngineError> {
        Ok(self.state().url.clone())
    }

    async fn title(&self) -> Result<String, EngineError> {
        Ok("fake page".into())
    }

    async fn count(&self, query: &Query) -> Result<usize, EngineError> {
        let state = self.state();
        Ok(self.count_in(&state, query))
    }

    async fn is_visible(&self, query: &Query) -> Result<bool, EngineError> {
        let state = self.state();
        Ok(self.count_in(&state, query) > 0)
    }

    async fn is_checked(&self, query: &Query) -> Result<bool, EngineError> {
        let state = self.state();
        if let Query::Within(scope, _) = query {
            if let Query::HasText { needle: title, .. } = scope.as_ref() {
                return Ok(state.selected_titles.iter().any(|t| t == title));
            }
        }
        Ok(false)
    }

    async fn click(&self, query: &Query) -> Result<(), EngineError> {
        let mut state = self.state();
        match self.click_in(&mut state, query)? {
            true => Ok(()),
            false => Err(EngineError::Driver(format!("nothing to click for {query}"))),
        }
    }

    async fn fill(&self, query: &Query, text: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        if let Query::Css(css) = query {
            if *css == css_of(ui::filing_tenant_code_field()) {
                state.login_form.code = text.to_string();
                return Ok(());
            }
            if *css == css_of(ui::filing_username_field()) {
                state.login_form.username = text.to_string();
                return Ok(());
            }
            if *css == css_of(ui::filing_password_field()) {
                state.login_form.password = text.to_string();
                return Ok(());
            }
            if *css == css_of(ui::user_list_filter()) {
                state.filter_input = text.to_string();
                return Ok(());
            }
        }
        Err(EngineError::Driver(format!("nothing to fill for {query}")))
    }

    async fn press_key(&self, key: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        match key {
            "Enter" => {
                state.filter_applied = state.filter_input.clone();
            }
            "Escape" => {
                if state.dialog_queue > 0 {
                    state.dialog_queue -= 1;
                }
                state.menu_open = false;
                state.restore_popup = false;
            }
            _ => {}
        }
        Ok(())
    }

    async fn read_texts(&self, query: &Query) -> Result<Vec<String>, EngineError> {
        let state = self.state();
        Ok(self.texts_in(&state, query))
    }

    async fn read_value(&self, query: &Query) -> Result<String, EngineError> {
        let state = self.state();
        if let Query::Css(css) = query {
            if *css == css_of(ui::portal_filing_username()) {
                return Ok(state
                    .detail_open
                    .and_then(|idx| state.portal_tenants.get(idx))
                    .map(|t| t.username.clone())
                    .unwrap_or_default());
            }
            if *css == css_of(ui::portal_filing_password()) {
                return Ok(state
                    .detail_open
                    .and_then(|idx| state.portal_tenants.get(idx))
                    .map(|t| t.password.clone())
                    .unwrap_or_default());
            }
            if *css == css_of(ui::user_list_filter()) {
                return Ok(state.filter_input.clone());
            }
        }
        Ok(String::new())
    }

    async fn scroll_to_top(&self, query: &Query) -> Result<(), EngineError> {
        let _ = query;
        self.state().window_start = 0;
        Ok(())
    }

    async fn scroll_advance(&self, query: &Query, fraction: f64) -> Result<bool, EngineError> {
        let _ = query;
        let mut state = self.state();
        if state.window_start + state.window_len >= state.folders.len() {
            return Ok(false);
        }
        let step = ((state.window_len as f64) * fraction).max(1.0) as usize;
        state.window_start += step;
        Ok(true)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        // PNG magic followed by nothing; enough for artifact tests.
        Ok(vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a])
    }

    async fn clear_cookies(&self, origin: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.cookies_cleared.push(origin.to_string());
        state.filing_logged_in = false;
        state.header_tenant = None;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A state with one Portal tenant record, a matching Filing account,
/// and a live, correctly-scoped Filing session.
pub fn standard_state() -> FakeState {
    let mut state = FakeState::default();
    state.portal_tenants.push(PortalTenant {
        name: "Heathview Medical Practice".into(),
        code: "A12345".into(),
        username: "filing_admin".into(),
        password: "hunter2".into(),
    });
    state.accounts.push(FilingAccount {
        code: "A12345".into(),
        username: "filing_admin".into(),
        password: "hunter2".into(),
        header: "HEATHVIEW MEDICAL PRACTICE".into(),
    });
    state.filing_logged_in = true;
    state.header_tenant = Some("HEATHVIEW MEDICAL PRACTICE".into());
    state.url = format!("{FILING_BASE_URL}/DocumentViewer/Filing");
    state
}

/// Bootstrap a session against the fake for the standard tenant.
pub async fn bootstrap(page: &Arc<FakePage>, artifact_dir: &Path) -> docshuttle::Session {
    let driver: Arc<dyn PageDriver> = page.clone();
    docshuttle::Session::bootstrap(driver, test_config(artifact_dir), &NoopGate, "Heathview")
        .await
        .expect("bootstrap against fake should succeed")
}

/// Gate for runs where the Portal session is already live.
pub struct NoopGate;

#[async_trait]
impl OperatorGate for NoopGate {
    async fn wait_for_operator(&self, _prompt: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Gate that simulates the operator completing the Portal login
/// out-of-band.
pub struct PortalLoginGate {
    pub page: Arc<FakePage>,
}

#[async_trait]
impl OperatorGate for PortalLoginGate {
    async fn wait_for_operator(&self, _prompt: &str) -> Result<(), EngineError> {
        self.page.state().portal_logged_in = true;
        Ok(())
    }
}
