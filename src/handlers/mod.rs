//! User-facing handlers and the routing table that binds them
//!
//! Every handler is wrapped as `instrument(gated(roles, h))` or
//! `instrument(h)`, so denied calls still leave an activity row with a
//! `denied` outcome.

pub mod admin;
pub mod analysis;
pub mod auth;
pub mod files;
pub mod general;
pub mod reports;
pub mod settings;
pub mod work_timer;

use crate::engine::scheduler::TimerCallbacks;
use crate::engine::{gated, instrument, instrument_redacted, Dialog, InputFilter, Router, RouterError};
use crate::storage::Role;
use regex::Regex;

/// Any authenticated session
pub const ALL_ROLES: &[Role] = &Role::ALL;
pub const STAFF: &[Role] = &[Role::Admin, Role::Manager];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

fn dialogs() -> Result<Vec<Dialog>, RouterError> {
    let cancel = || instrument(general::Cancel);

    Ok(vec![
        Dialog::new("register", "register", instrument(auth::RegisterStart), cancel())
            .state("username", InputFilter::Text, instrument(auth::RegisterUsername))
            .state("secret", InputFilter::Text, instrument_redacted(auth::RegisterSecret))
            .allow_reentry(),
        Dialog::new("login", "login", instrument(auth::LoginStart), cancel())
            .state("username", InputFilter::Text, instrument(auth::LoginUsername))
            .state("secret", InputFilter::Text, instrument_redacted(auth::LoginSecret))
            .allow_reentry(),
        Dialog::new("settings", "settings", instrument(settings::ShowSettings), cancel())
            .state("choose", InputFilter::Text, instrument(settings::ChooseOption))
            .state(
                "choose",
                InputFilter::Callback(Regex::new(r"^settings_[1-6]$")?),
                instrument(settings::ChooseOption),
            )
            .state("value", InputFilter::Text, instrument(settings::ApplyValue))
            .allow_reentry(),
        Dialog::new("upload", "upload", instrument(files::UploadStart), cancel())
            .state("wait_for_file", InputFilter::Document, instrument(files::ReceiveFile))
            .state("wait_for_file", InputFilter::Text, instrument(files::ExpectFile)),
        Dialog::new("summarize", "summarize", instrument(analysis::SummarizeStart), cancel())
            .state("text", InputFilter::Text, instrument(analysis::SummarizeText)),
        Dialog::new(
            "generate_questions",
            "generate_questions",
            instrument(analysis::QuestionsStart),
            cancel(),
        )
        .state("text", InputFilter::Text, instrument(analysis::QuestionsText)),
        Dialog::new(
            "extract_deadlines",
            "extract_deadlines",
            instrument(analysis::DeadlinesStart),
            cancel(),
        )
        .state("text", InputFilter::Text, instrument(analysis::DeadlinesText)),
    ])
}

/// Routing table of the assistant
///
/// # Errors
///
/// Returns an error if the table is inconsistent.
pub fn build_router() -> Result<Router, RouterError> {
    let mut builder = Router::builder();
    for dialog in dialogs()? {
        builder = builder.dialog(dialog);
    }

    builder
        .command("start", instrument(general::Start))
        .command("help", instrument(general::Help))
        .command("logout", instrument(general::Logout))
        .command("list_files", instrument(files::ListFiles))
        .command("intent", instrument(analysis::Intent))
        .command("sentiment", instrument(analysis::Sentiment))
        .command("topics", instrument(analysis::Topics))
        .command("stats", instrument(reports::Stats))
        .command("dashboard", instrument(gated(ALL_ROLES, reports::DashboardView)))
        .command("stats_global", instrument(gated(ADMIN_ONLY, reports::GlobalStatsView)))
        .command("admin_panel", instrument(gated(ADMIN_ONLY, admin::AdminPanel)))
        .command("set_role", instrument(gated(ADMIN_ONLY, admin::SetRole)))
        .command("manager_panel", instrument(gated(STAFF, admin::ManagerPanel)))
        .command("start_work", instrument(work_timer::StartWork))
        .command("stop_work", instrument(work_timer::StopWork))
        .callback(r"^download_\d+$", instrument(files::Download))
        .callback(r"^(like|dislike)$", instrument(analysis::Feedback))
        .callback(r"^admin_", instrument(gated(ADMIN_ONLY, admin::AdminAction)))
        .callback(r"^mgr_", instrument(gated(STAFF, admin::ManagerAction)))
        .free_text(instrument(analysis::Chat))
        .build()
}

/// Follow-up actions of the work timer purposes
#[must_use]
pub fn timer_callbacks() -> TimerCallbacks {
    TimerCallbacks::new()
        .on(work_timer::WORK, work_timer::WorkFinished)
        .on(work_timer::BREAK, work_timer::BreakFinished)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_is_consistent() -> Result<(), RouterError> {
        let router = build_router()?;
        let names = router.command_names();
        for command in ["register", "login", "settings", "upload", "stats_global", "start_work"] {
            assert!(names.contains(&command), "missing /{command}");
        }
        assert!(router.dialog("settings").is_some_and(|d| d.has_state("value")));
        Ok(())
    }
}
