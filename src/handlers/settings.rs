//! Settings dialog: pick an option (text or button), then enter its value

use crate::config::{BREAK_MINUTES_RANGE, SUMMARY_LENGTH_RANGE, WORK_MINUTES_RANGE};
use crate::engine::Response;
use crate::storage::SettingsChange;
use crate::views;
use std::ops::RangeInclusive;

const OPTION: &str = "option";

/// A settings option, numbered as in the overview
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOption {
    Language = 1,
    SummaryLength = 2,
    DeadlineNotifications = 3,
    FlashcardNotifications = 4,
    WorkMinutes = 5,
    BreakMinutes = 6,
}

impl SettingsOption {
    /// Parse "3", "3️⃣ Дедлайны" or the `settings_3` button payload
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let input = input
            .strip_prefix(views::CALLBACK_SETTINGS_PREFIX)
            .unwrap_or(input);
        let mut chars = input.chars();
        let first = chars.next()?;
        if chars.next().is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
        match first {
            '1' => Some(Self::Language),
            '2' => Some(Self::SummaryLength),
            '3' => Some(Self::DeadlineNotifications),
            '4' => Some(Self::FlashcardNotifications),
            '5' => Some(Self::WorkMinutes),
            '6' => Some(Self::BreakMinutes),
            _ => None,
        }
    }

    const fn prompt(self) -> &'static str {
        match self {
            Self::Language => views::SETTINGS_ASK_LANGUAGE,
            Self::SummaryLength => views::SETTINGS_ASK_SUMMARY_LENGTH,
            Self::DeadlineNotifications => views::SETTINGS_ASK_DEADLINES,
            Self::FlashcardNotifications => views::SETTINGS_ASK_FLASHCARDS,
            Self::WorkMinutes => views::SETTINGS_ASK_WORK_MINUTES,
            Self::BreakMinutes => views::SETTINGS_ASK_BREAK_MINUTES,
        }
    }

    /// Validate a value for this option
    ///
    /// # Errors
    ///
    /// Returns the corrective prompt when the value is out of its domain.
    pub fn change(self, input: &str) -> Result<SettingsChange, String> {
        let input = input.trim();
        match self {
            Self::Language => parse_language(input)
                .map(SettingsChange::Language)
                .ok_or_else(|| views::SETTINGS_BAD_LANGUAGE.to_string()),
            Self::SummaryLength => {
                parse_in_range(input, &SUMMARY_LENGTH_RANGE).map(SettingsChange::SummaryLength)
            }
            Self::DeadlineNotifications => parse_yes_no(input)
                .map(SettingsChange::DeadlineNotifications)
                .ok_or_else(|| views::SETTINGS_BAD_YES_NO.to_string()),
            Self::FlashcardNotifications => parse_yes_no(input)
                .map(SettingsChange::FlashcardNotifications)
                .ok_or_else(|| views::SETTINGS_BAD_YES_NO.to_string()),
            Self::WorkMinutes => {
                parse_in_range(input, &WORK_MINUTES_RANGE).map(SettingsChange::WorkMinutes)
            }
            Self::BreakMinutes => {
                parse_in_range(input, &BREAK_MINUTES_RANGE).map(SettingsChange::BreakMinutes)
            }
        }
    }
}

fn parse_language(input: &str) -> Option<String> {
    (input.len() == 2 && input.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| input.to_ascii_lowercase())
}

fn parse_yes_no(input: &str) -> Option<bool> {
    match input.to_lowercase().as_str() {
        "да" | "yes" => Some(true),
        "нет" | "no" => Some(false),
        _ => None,
    }
}

fn parse_in_range(input: &str, range: &RangeInclusive<u32>) -> Result<u32, String> {
    input
        .parse::<u32>()
        .ok()
        .filter(|n| range.contains(n))
        .ok_or_else(|| views::settings_bad_number(*range.start(), *range.end()))
}

crate::handler!(pub ShowSettings, "settings", |ctx| {
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST));
    };
    let settings = ctx.storage().settings(account_id).await?;
    Ok(Response::new()
        .choices(views::settings_overview(&settings), views::settings_choices())
        .goto("choose"))
});

crate::handler!(pub ChooseOption, "settings_choose", |ctx| {
    let event = ctx.event;
    let input = event.text().or_else(|| event.callback_data()).unwrap_or_default();
    let Some(option) = SettingsOption::parse(input) else {
        return Ok(Response::reply(views::SETTINGS_PICK_OPTION).retry());
    };
    ctx.session.set_answer(OPTION, (option as u8).to_string());
    Ok(Response::reply(option.prompt()).goto("value"))
});

crate::handler!(pub ApplyValue, "settings_value", |ctx| {
    let event = ctx.event;
    let option = ctx.session.answer(OPTION).and_then(SettingsOption::parse);
    let (Some(option), Some(input)) = (option, event.text()) else {
        return Ok(Response::reply(views::SETTINGS_PICK_OPTION).goto("choose"));
    };
    let change = match option.change(input) {
        Ok(change) => change,
        Err(prompt) => return Ok(Response::reply(prompt).retry()),
    };
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST).end());
    };
    let settings = ctx.storage().update_settings(account_id, change).await?;
    Ok(Response::reply(views::settings_saved(&settings)).end())
});

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_option_parsing() {
        assert_eq!(SettingsOption::parse("2"), Some(SettingsOption::SummaryLength));
        assert_eq!(SettingsOption::parse("settings_6"), Some(SettingsOption::BreakMinutes));
        assert_eq!(SettingsOption::parse("3️⃣ Дедлайны"), Some(SettingsOption::DeadlineNotifications));
        assert_eq!(SettingsOption::parse("7"), None);
        assert_eq!(SettingsOption::parse("12"), None);
        assert_eq!(SettingsOption::parse(""), None);
    }

    #[test]
    fn test_values() {
        assert_eq!(
            SettingsOption::Language.change("EN"),
            Ok(SettingsChange::Language("en".to_string()))
        );
        assert!(SettingsOption::Language.change("rus").is_err());
        assert_eq!(
            SettingsOption::DeadlineNotifications.change("Нет"),
            Ok(SettingsChange::DeadlineNotifications(false))
        );
        assert!(SettingsOption::FlashcardNotifications.change("может").is_err());
    }

    proptest! {
        #[test]
        fn test_summary_length_accepts_exactly_its_range(n in 0u32..100) {
            let result = SettingsOption::SummaryLength.change(&n.to_string());
            prop_assert_eq!(result.is_ok(), SUMMARY_LENGTH_RANGE.contains(&n));
        }

        #[test]
        fn test_minutes_never_panic(input in "\\PC{0,12}") {
            let _ = SettingsOption::WorkMinutes.change(&input);
            let _ = SettingsOption::BreakMinutes.change(&input);
        }
    }
}
