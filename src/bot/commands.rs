//! Command menu published to Telegram
//!
//! Parsing is done by the engine; this enum only describes the commands
//! shown in the client's menu.

use teloxide::utils::command::BotCommands;

/// Commands listed in the bot menu
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "приветствие")]
    Start,
    #[command(description = "справка")]
    Help,
    #[command(description = "регистрация")]
    Register,
    #[command(description = "вход")]
    Login,
    #[command(description = "выход")]
    Logout,
    #[command(description = "настройки")]
    Settings,
    #[command(description = "загрузить файл")]
    Upload,
    #[command(description = "мои файлы")]
    ListFiles,
    #[command(description = "краткое содержание текста")]
    Summarize,
    #[command(description = "вопросы по тексту")]
    GenerateQuestions,
    #[command(description = "дедлайны из текста")]
    ExtractDeadlines,
    #[command(description = "определить намерение")]
    Intent,
    #[command(description = "тональность текста")]
    Sentiment,
    #[command(description = "темы нескольких текстов через ;")]
    Topics,
    #[command(description = "моя статистика")]
    Stats,
    #[command(description = "личный кабинет")]
    Dashboard,
    #[command(description = "запустить рабочий таймер")]
    StartWork,
    #[command(description = "остановить рабочий таймер")]
    StopWork,
    #[command(description = "отменить текущий диалог")]
    Cancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_uses_snake_case_names() {
        let names: Vec<String> = Command::bot_commands()
            .into_iter()
            .map(|c| c.command)
            .collect();
        assert!(names.iter().any(|n| n.ends_with("generate_questions")));
        assert!(names.iter().any(|n| n.ends_with("start_work")));
        assert!(names.iter().any(|n| n.ends_with("topics")));
        assert_eq!(names.len(), 19);
    }
}
