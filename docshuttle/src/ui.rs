//! The known selector vocabulary for the Portal and Filing System
//! surfaces.
//!
//! Tenant deployments render the same controls under different ids and
//! markup, so most entries here are ordered alternatives. Centralizing
//! them keeps the engine's known, ordered set of interaction strategies
//! inspectable in one place; nothing else in the crate hardcodes a
//! selector string.

use crate::query::Query;

/* ---------------- Portal ---------------- */

/// Tenant row link in the Portal's tenants listing, exact name.
pub fn portal_tenant_link_exact(name: &str) -> Query {
    Query::has_text("a", name, true)
}

/// Tenant row link, substring fallback.
pub fn portal_tenant_link_contains(name: &str) -> Query {
    Query::has_text("a", name, false)
}

/// All link texts on the tenants listing, used to name nearby
/// candidates when a tenant lookup fails.
pub fn portal_listing_links() -> Query {
    Query::css("a")
}

/// Tab on the tenant detail view holding the Filing System integration
/// record.
pub fn portal_integration_tab() -> Query {
    Query::css("[data-test-id=\"tab-ehr_settings\"]")
}

/// Badge showing the tenant code on the integration tab.
pub fn portal_tenant_code() -> Query {
    Query::css("span.bg-subtle")
}

pub fn portal_filing_username() -> Query {
    Query::css("#ehr_settings\\[filing\\]\\[username\\]")
}

pub fn portal_filing_password() -> Query {
    Query::css("#ehr_settings\\[filing\\]\\[password\\]")
}

/* ---------------- Filing System: login surface ---------------- */

pub fn filing_signin_heading() -> Query {
    Query::text_contains("Sign in to Continue")
}

pub fn filing_autosignin_failed() -> Query {
    Query::text_contains("automatic sign-in failed")
}

/// Tenant-code field; ids vary by deployment generation.
pub fn filing_tenant_code_field() -> Query {
    Query::css(
        "#OrganisationCode, #OrganizationCode, #OdsCode, \
         input[name=\"OrganisationCode\"], input[name=\"OrganizationCode\"], \
         input[name=\"OdsCode\"]",
    )
}

pub fn filing_username_field() -> Query {
    Query::css("#UserName, #Username, input[name=\"UserName\"], input[name=\"Username\"]")
}

pub fn filing_password_field() -> Query {
    Query::css("#Password, input[name=\"Password\"], input[type=\"password\"]")
}

pub fn filing_signin_submit() -> Query {
    Query::any_of(vec![
        Query::css("button[type=\"submit\"]"),
        Query::has_text("button", "Sign In", true),
    ])
}

/// Header text naming the signed-in system user; the active tenant name
/// follows the last " - " inside it.
pub fn filing_system_user_marker() -> Query {
    Query::text_contains("System Administrator")
}

pub fn filing_user_menu() -> Query {
    Query::text_contains("User")
}

pub fn filing_logout_actions() -> Query {
    Query::any_of(vec![
        Query::text_exact("Log out"),
        Query::text_exact("Logout"),
        Query::text_exact("Sign out"),
    ])
}

/* ---------------- Filing System: filing surface ---------------- */

pub fn folder_pane() -> Query {
    Query::css("#folders_list, #folders")
}

/// Markers that indicate the filing surface has rendered, most specific
/// first. The loose tail entries only ever confirm readiness; they are
/// never clicked.
pub fn folder_pane_candidates() -> Vec<Query> {
    vec![
        Query::css("#folders_list"),
        Query::css("#folders"),
        Query::css("[id*=\"folder\" i]"),
        Query::css("[class*=\"folder\" i]"),
        Query::text_contains("Folders"),
    ]
}

pub fn all_documents_badge() -> Query {
    Query::css("span.all-docs-count")
}

/// Folder entry inside the folder pane by exact visible text.
pub fn folder_entry_exact(name: &str) -> Query {
    Query::within(folder_pane(), Query::text_exact(name))
}

/// Folder entry, case-insensitive substring fallback.
pub fn folder_entry_contains(name: &str) -> Query {
    Query::within(folder_pane(), Query::text_contains(name))
}

/// Marker that the named folder is the currently-selected one. Contents
/// read before this marker appears may belong to the previous folder.
pub fn selected_folder_marker(name: &str) -> Query {
    Query::has_text("#selectedFolder", name, false)
}

pub fn document_list() -> Query {
    Query::css("#document_list")
}

/// Either a populated list or the empty-folder instruction block.
pub fn document_list_ready() -> Query {
    Query::any_of(vec![
        Query::css("#document_list li"),
        Query::css(".instruction.primary"),
        Query::css("#document_list"),
    ])
}

pub fn document_titles() -> Query {
    Query::css("#document_list li a div strong, #document_list li a strong")
}

pub fn document_checkboxes() -> Query {
    Query::css("#document_list input[type=\"checkbox\"]")
}

pub fn document_row(title: &str) -> Query {
    Query::has_text("#document_list li", title, true)
}

pub fn document_row_checkbox(title: &str) -> Query {
    Query::within(document_row(title), Query::css("input[type=\"checkbox\"]"))
}

pub fn document_row_checkbox_checked(title: &str) -> Query {
    Query::within(
        document_row(title),
        Query::css("input[type=\"checkbox\"]:checked"),
    )
}

/// Click target for tenant variants that select by row instead of
/// rendering per-row checkboxes.
pub fn document_row_click_target(title: &str) -> Query {
    Query::within(document_row(title), Query::css("a, div"))
}

/* ---------------- Filing System: select mode ---------------- */

pub fn select_mode_direct() -> Query {
    Query::css("a#action_selectmode, button#action_selectmode")
}

pub fn select_mode_label() -> Query {
    Query::text_exact("Select Mode")
}

/// Menu entries that enable multi-select, in decreasing specificity.
pub fn select_mode_menu_item() -> Query {
    Query::any_of(vec![
        Query::within(
            Query::has_text(
                "label, li, div, [role=\"menuitemcheckbox\"]",
                "Select Mode",
                true,
            ),
            Query::css("input[type=\"checkbox\"]"),
        ),
        Query::text_exact("Select Mode"),
        Query::text_exact("Select Documents"),
        Query::text_exact("Multi-select"),
        Query::text_exact("Select"),
    ])
}

/// Observable evidence that select mode is active. Some tenant variants
/// expose none of these, which is why the enable cascade ends with a
/// tolerant strategy.
pub fn select_mode_enabled_markers() -> Query {
    Query::any_of(vec![
        document_checkboxes(),
        Query::within(
            Query::has_text(
                "label, li, div, [role=\"menuitemcheckbox\"]",
                "Select Mode",
                true,
            ),
            Query::css("input[type=\"checkbox\"]:checked"),
        ),
        Query::has_text("[aria-checked=\"true\"]", "Select Mode", true),
        Query::has_text("[class*=\"active\" i]", "Select Mode", true),
    ])
}

/// Overflow ("...") menu openers near the document list.
pub fn overflow_menu() -> Query {
    Query::any_of(vec![
        Query::has_text("#document_list_header button, #document_list_header [role=\"button\"]", "...", true),
        Query::has_text("#document_list_header button, #document_list_header [role=\"button\"]", "\u{2026}", true),
        Query::has_text("#document_list button, #document_list [role=\"button\"]", "...", true),
        Query::has_text("#document_list button, #document_list [role=\"button\"]", "\u{2026}", true),
        Query::has_text("button, [role=\"button\"]", "...", true),
        Query::has_text("button, [role=\"button\"]", "\u{2026}", true),
        Query::has_text("button, [role=\"button\"]", "\u{22ef}", true),
        Query::css("[aria-label*=\"more\" i], [aria-label*=\"menu\" i]"),
        Query::css("[title*=\"more\" i], [title*=\"menu\" i]"),
        Query::css("[class*=\"ellipsis\" i], [class*=\"kebab\" i], [class*=\"more\" i]"),
    ])
}

/* ---------------- Filing System: change-folder dialog ---------------- */

pub fn change_folder_direct() -> Query {
    Query::css("a#action_changefolder, button#action_changefolder")
}

pub fn change_folder_label() -> Query {
    Query::text_exact("Change Folder")
}

pub fn change_folder_menu_item() -> Query {
    Query::any_of(vec![
        Query::text_exact("Change Folder"),
        Query::text_exact("Move to Folder"),
        Query::text_exact("Move Folder"),
    ])
}

pub fn change_folder_dialog_markers() -> Query {
    Query::any_of(vec![
        Query::text_exact("Change Document Folder"),
        Query::css("#folderselection"),
        Query::css("input#change_folder_confirm"),
    ])
}

/// Destination entry by data attribute, the stable form.
pub fn destination_by_data_name(name: &str) -> Query {
    Query::css(format!(
        "#folderselection a[data-name=\"{}\"]",
        name.replace('"', "\\\"")
    ))
}

/// Destination entry by visible text, dialog-scoped then global.
pub fn destination_by_text(name: &str) -> Query {
    Query::any_of(vec![
        Query::within(Query::css("#folderselection"), Query::text_exact(name)),
        Query::text_exact(name),
    ])
}

pub fn change_folder_confirm() -> Query {
    Query::any_of(vec![
        Query::css("input#change_folder_confirm"),
        Query::has_text("button", "Confirm", true),
        Query::has_text("button", "Move", true),
        Query::css("input[value=\"Confirm\"]"),
    ])
}

/* ---------------- blocking dialogs ---------------- */

/// Modal markers that block all subsequent clicks when present.
pub fn blocking_dialog_markers() -> Query {
    Query::any_of(vec![
        Query::css(".modal"),
        Query::css(".bootbox"),
        Query::css(".alertify.ajs-in"),
        Query::css("[role=\"dialog\"]"),
        Query::text_contains("AJAX Issue"),
    ])
}

/// Affirmative/dismiss control inside a blocking dialog.
pub fn dialog_affirmative() -> Query {
    Query::any_of(vec![
        Query::has_text("button, a", "OK", true),
        Query::has_text("button, a", "Ok", true),
        Query::has_text("button, a", "Confirm", true),
        Query::has_text("button, a", "Close", true),
        Query::has_text("button, a", "Continue", true),
        Query::has_text("button, a", "Yes", true),
        Query::has_text("button, a", "Got it", true),
        Query::has_text("button, a", "\u{d7}", true),
        Query::css("input[value=\"OK\"], input[value=\"Ok\"]"),
    ])
}

/// Browser "Restore pages?" popup shown after an unclean shutdown.
pub fn restore_pages_popup() -> Query {
    Query::text_contains("Restore pages?")
}

pub fn restore_pages_close() -> Query {
    Query::any_of(vec![
        Query::css("button[aria-label=\"Close\"]"),
        Query::has_text("button", "\u{d7}", true),
    ])
}

/* ---------------- Filing System: user admin ---------------- */

pub fn user_list_filter() -> Query {
    Query::css(
        "#Filter_Criteria, input[name=\"Filter.Criteria\"], \
         input[id*=\"Filter_Criteria\"], input[type=\"search\"]",
    )
}

pub fn user_list_table() -> Query {
    Query::css("table tbody")
}

/// First-column cells of the user table, where the account name lives.
pub fn user_list_name_cells() -> Query {
    Query::css("table tbody tr td:first-child a, table tbody tr td:first-child")
}
