//! User-facing texts, choice sets and formatters
//!
//! Every text is Telegram HTML. Values that come from users are escaped.

use crate::capabilities::{Entity, TopicScore};
use crate::engine::Choice;
use crate::storage::{Account, Dashboard, FileRecord, GlobalStats, UserSettings, UserStats};
use html_escape::encode_text;
use std::fmt::Write;

// ─────────────────────────────────────────────────────────────────────────────
// Callback constants
// ─────────────────────────────────────────────────────────────────────────────

pub const CALLBACK_LIKE: &str = "like";
pub const CALLBACK_DISLIKE: &str = "dislike";
pub const CALLBACK_DOWNLOAD_PREFIX: &str = "download_";
pub const CALLBACK_ADMIN_LIST_USERS: &str = "admin_list_users";
pub const CALLBACK_ADMIN_ADD_ROLE: &str = "admin_add_role";
pub const CALLBACK_ADMIN_STATS: &str = "admin_stats";
pub const CALLBACK_MGR_LIST_CLIENTS: &str = "mgr_list_clients";
pub const CALLBACK_MGR_LIST_FILES: &str = "mgr_list_files";
/// Prefix of settings option buttons, followed by the option number
pub const CALLBACK_SETTINGS_PREFIX: &str = "settings_";

// ─────────────────────────────────────────────────────────────────────────────
// Common
// ─────────────────────────────────────────────────────────────────────────────

pub const MUST_AUTHENTICATE: &str =
    "🚫 Доступ только для зарегистрированных пользователей. Используйте /login.";
pub const FORBIDDEN: &str = "🚫 У вас нет прав для выполнения этой команды.";
pub const MODEL_UNAVAILABLE: &str = "❗ Модель пока не загружена. Попробуйте позже.";
pub const INVALID_INPUT: &str = "❗ Не удалось обработать этот текст. Попробуйте другой.";
pub const GENERIC_FAILURE: &str = "❗ Произошла ошибка. Попробуйте позже.";
pub const DIALOG_CANCELLED: &str = "Ок, отмена. Возвращаюсь в основное меню.";
pub const REGISTER_FIRST: &str = "Сначала зарегистрируйтесь через /register.";
pub const UNKNOWN_ACTION: &str = "Неизвестная команда.";

pub const HELP: &str = r"Это интеллектуальный ассистент Витте.

/register — регистрация
/login — вход
/logout — выход
/dashboard — личный кабинет
/settings — настройки
/cancel — отменить текущий диалог

/summarize — суммаризация текста
/generate_questions — вопросы по тексту
/extract_deadlines — поиск дедлайнов
/intent &lt;текст&gt; — ответ на вопрос
/sentiment &lt;текст&gt; — тональность текста
/topics &lt;текст; текст&gt; — темы нескольких текстов

/upload — загрузить файл
/list_files — ваши файлы
/stats — ваша статистика

/start_work — запустить рабочий таймер
/stop_work — остановить таймер

Любой другой текст — свободный диалог.";

#[must_use]
pub fn greeting(account: Option<&Account>) -> String {
    match account {
        Some(account) => format!(
            "С возвращением! Этот чат привязан к аккаунту <code>{}</code>.\n/help — список команд.",
            encode_text(&account.username)
        ),
        None => "Привет! Это интеллектуальный ассистент Витте.\n\
                 Зарегистрируйтесь через /register или войдите через /login.\n/help — список команд."
            .to_string(),
    }
}

pub const LOGGED_OUT: &str = "Вы вышли из системы. До встречи!";
pub const NOT_LOGGED_IN: &str = "Вы не были авторизованы.";

// ─────────────────────────────────────────────────────────────────────────────
// Registration and login
// ─────────────────────────────────────────────────────────────────────────────

pub const REGISTER_ASK_USERNAME: &str = "👤 Регистрация нового пользователя.\nВведите email (логин):";
pub const REGISTER_USERNAME_TAKEN: &str =
    "❌ Такой email уже зарегистрирован.\nПопробуйте другой или выполните /login.";
pub const REGISTER_USERNAME_INVALID: &str = "❌ Логин не может быть пустым или длиннее 255 символов:";
pub const REGISTER_ASK_SECRET: &str = "Введите пароль (минимум 8 символов):";
pub const REGISTER_SECRET_TOO_SHORT: &str =
    "❌ Пароль слишком короткий. Введите минимум 8 символов:";

#[must_use]
pub fn registered(username: &str) -> String {
    format!(
        "✅ Регистрация завершена! Логин: <code>{}</code>\nРоль: client.\n\
         Войдите через /login, чтобы открыть /dashboard.",
        encode_text(username)
    )
}

pub const LOGIN_ASK_USERNAME: &str = "🔑 Вход. Введите ваш логин (email):";
pub const LOGIN_UNKNOWN_USER: &str = "Пользователь не найден. Попробуйте /login заново или /register.";
pub const LOGIN_ASK_SECRET: &str = "Введите пароль:";
pub const LOGIN_WRONG_SECRET: &str = "❌ Неверный пароль. Попробуйте /login ещё раз.";

#[must_use]
pub fn logged_in(account: &Account) -> String {
    format!(
        "✅ Вы вошли как <code>{}</code>.\nРоль: <b>{}</b>.",
        encode_text(&account.username),
        account.role
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

const fn on_off(value: bool) -> &'static str {
    if value {
        "включены"
    } else {
        "выключены"
    }
}

#[must_use]
pub fn settings_overview(settings: &UserSettings) -> String {
    format!(
        "<b>Ваши настройки:</b>\n\
         1️⃣ Язык: <code>{}</code>\n\
         2️⃣ Длина суммаризации: <code>{}</code> предложений\n\
         3️⃣ Уведомления о дедлайнах: <code>{}</code>\n\
         4️⃣ Уведомления о карточках: <code>{}</code>\n\
         5️⃣ Рабочий интервал: <code>{}</code> мин\n\
         6️⃣ Перерыв: <code>{}</code> мин\n\n\
         Выберите, что хотите изменить, или введите «Отмена».",
        encode_text(&settings.language),
        settings.summary_length,
        on_off(settings.deadline_notifications),
        on_off(settings.flashcard_notifications),
        settings.work_minutes,
        settings.break_minutes,
    )
}

#[must_use]
pub fn settings_choices() -> Vec<Vec<Choice>> {
    let option = |n: u8, label: &str| Choice::new(label, format!("{CALLBACK_SETTINGS_PREFIX}{n}"));
    vec![
        vec![option(1, "1️⃣ Язык"), option(2, "2️⃣ Суммаризация")],
        vec![option(3, "3️⃣ Дедлайны"), option(4, "4️⃣ Карточки")],
        vec![option(5, "5️⃣ Работа"), option(6, "6️⃣ Перерыв")],
    ]
}

pub const SETTINGS_PICK_OPTION: &str = "Пожалуйста, выберите вариант (1–6) или введите «Отмена».";
pub const SETTINGS_ASK_LANGUAGE: &str =
    "Введите код языка (например, <code>ru</code> или <code>en</code>):";
pub const SETTINGS_ASK_SUMMARY_LENGTH: &str =
    "Укажите длину суммаризации в виде целого числа (сколько предложений выдавать):";
pub const SETTINGS_ASK_DEADLINES: &str =
    "Уведомления о дедлайнах можно <b>включить</b> или <b>выключить</b>. Введите <code>Да</code> или <code>Нет</code>:";
pub const SETTINGS_ASK_FLASHCARDS: &str =
    "Уведомления о карточках можно <b>включить</b> или <b>выключить</b>. Введите <code>Да</code> или <code>Нет</code>:";
pub const SETTINGS_ASK_WORK_MINUTES: &str = "Введите длительность рабочего интервала в минутах (1–180):";
pub const SETTINGS_ASK_BREAK_MINUTES: &str = "Введите длительность перерыва в минутах (1–60):";
pub const SETTINGS_BAD_LANGUAGE: &str =
    "❌ Некорректный формат. Введите двухбуквенный код языка (например, ru или en):";
pub const SETTINGS_BAD_YES_NO: &str = "❌ Пожалуйста, введите «Да» или «Нет»:";

#[must_use]
pub fn settings_bad_number(min: u32, max: u32) -> String {
    format!("❌ Введите целое число от {min} до {max}:")
}

#[must_use]
pub fn settings_saved(settings: &UserSettings) -> String {
    format!("✅ Настройка сохранена.\n\n{}", settings_overview(settings))
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

pub const UPLOAD_ASK_FILE: &str = "Пришлите файл, который хотите загрузить:";
pub const UPLOAD_EXPECT_FILE: &str = "Пожалуйста, отправьте именно файл (не фото или текст).";
pub const NO_FILES: &str = "У вас нет загруженных файлов.";
pub const FILE_NOT_FOUND: &str = "Файл не найден или у вас нет доступа к нему.";

#[must_use]
pub fn file_saved(file_name: &str) -> String {
    format!("✅ Файл «{}» успешно сохранён.", encode_text(file_name))
}

#[must_use]
pub fn file_choices(files: &[FileRecord]) -> Vec<Vec<Choice>> {
    files
        .iter()
        .map(|f| vec![Choice::new(&f.file_name, format!("{CALLBACK_DOWNLOAD_PREFIX}{}", f.id))])
        .collect()
}

pub const FILES_HEADER: &str = "Ваши файлы:";

// ─────────────────────────────────────────────────────────────────────────────
// Analysis
// ─────────────────────────────────────────────────────────────────────────────

pub const SUMMARIZE_ASK_TEXT: &str = "Пришлите текст, который нужно суммировать:";
pub const QUESTIONS_ASK_TEXT: &str = "Пришлите текст, из которого нужно сгенерировать вопросы:";
pub const DEADLINES_ASK_TEXT: &str = "Пришлите текст, из которого нужно извлечь дедлайны:";
pub const TEXT_TOO_SHORT: &str = "Текст слишком короткий для суммаризации. Вот оригинал:";
pub const NO_DEADLINES: &str = "Не удалось найти дедлайны в этом тексте.";
pub const FEEDBACK_PROMPT: &str = "Оцените, пожалуйста, полезность ответа:";
pub const FEEDBACK_THANKS: &str = "Спасибо за ваш отзыв!";
pub const FEEDBACK_NOTHING_TO_RATE: &str = "Нет ответа, который можно оценить.";

#[must_use]
pub fn summary(sentences: &str) -> String {
    format!("<b>Суммаризация:</b>\n{}", encode_text(sentences))
}

#[must_use]
pub fn question(text: &str) -> String {
    format!("Сгенерированный вопрос:\n❓ {}", encode_text(text))
}

#[must_use]
pub fn deadlines(entities: &[Entity]) -> String {
    let mut text = String::from("<b>Найденные сущности (дедлайны/события):</b>\n");
    for entity in entities {
        let _ = writeln!(
            text,
            "• {} → {}",
            encode_text(&entity.text),
            encode_text(&entity.label)
        );
    }
    text
}

pub const TOPICS_USAGE: &str =
    "Пожалуйста, после команды /topics введите тексты, разделённые точкой с запятой.";

/// Topics of each document, numbered from 1
#[must_use]
pub fn topics(documents: &[Vec<TopicScore>]) -> String {
    let mut text = String::new();
    for (i, scores) in documents.iter().enumerate() {
        let _ = writeln!(text, "<b>Документ {}:</b>", i + 1);
        for score in scores {
            let _ = writeln!(
                text,
                "• Тема {} (вероятность {:.2}): {}",
                score.topic,
                score.probability,
                encode_text(&score.terms.join(", "))
            );
        }
        text.push('\n');
    }
    text.truncate(text.trim_end().len());
    text
}

#[must_use]
pub fn args_required(command: &str) -> String {
    format!("Пожалуйста, введите текст после /{command}.")
}

/// Canned answer for a classified intent
#[must_use]
pub fn intent_answer(label: &str) -> &'static str {
    match label {
        "apply_course" => "Чтобы подать заявку на курс, перейдите по ссылке: https://example.com/apply",
        "ask_time" => "Расписание занятий доступно в личном кабинете студента.",
        "other" => "Извините, я не понял вашего запроса.",
        _ => "Ответ для этого запроса ещё не настроен.",
    }
}

#[must_use]
pub fn sentiment(label: &str) -> &'static str {
    match label {
        "positive" => "👍 Позитивный",
        "neutral" => "😐 Нейтральный",
        "negative" => "👎 Негативный",
        _ => "Не удалось определить тональность.",
    }
}

#[must_use]
pub fn feedback_choices() -> Vec<Vec<Choice>> {
    vec![vec![
        Choice::new("👍 Полезно", CALLBACK_LIKE),
        Choice::new("👎 Не помогло", CALLBACK_DISLIKE),
    ]]
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

fn preview(text: Option<&str>) -> String {
    let text = text.unwrap_or_default();
    let cut: String = text.chars().take(50).collect();
    if cut.len() < text.len() {
        format!("{}...", encode_text(&cut))
    } else {
        encode_text(&cut).into_owned()
    }
}

#[must_use]
pub fn user_stats(stats: &UserStats) -> String {
    let mut text = format!(
        "<b>Ваша статистика:</b>\n• Всего запросов: {}\n• Среднее время ответа: {:.0} мс\n\n\
         <b>Последние запросы:</b>\n",
        stats.total_requests,
        stats.average_ms.unwrap_or_default()
    );
    for request in &stats.recent {
        let latency = request
            .response_time_ms
            .map_or_else(|| "—".to_string(), |ms| ms.to_string());
        let _ = writeln!(text, "– «{}» → {latency} мс", preview(request.query_text.as_deref()));
    }
    text
}

#[must_use]
pub fn global_stats(stats: &GlobalStats) -> String {
    let mut text = format!(
        "<b>Общая статистика по боту:</b>\n• Всего зарегистрированных пользователей: {}\n\n\
         <b>Самые активные хендлеры (по количеству запросов):</b>\n",
        stats.total_users
    );
    for row in &stats.top_by_volume {
        let _ = writeln!(text, "– {}: {} запросов", row.handler_name, row.requests);
    }
    text.push_str("\n<b>Самые медленные хендлеры (среднее время):</b>\n");
    for row in &stats.top_by_latency {
        let _ = writeln!(text, "– {}: {:.0} мс", row.handler_name, row.average_ms);
    }
    text
}

#[must_use]
pub fn dashboard(dashboard: &Dashboard) -> String {
    format!(
        "<b>Личный кабинет</b>\n\n👤 Логин: <code>{}</code>\n🔑 Роль: <code>{}</code>\n\n\
         📂 Загружено файлов: {}\n📈 Всего запросов к боту: {}",
        encode_text(&dashboard.account.username),
        dashboard.account.role,
        dashboard.files,
        dashboard.requests
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Administration
// ─────────────────────────────────────────────────────────────────────────────

pub const ADMIN_PANEL: &str = "Панель администратора:";
pub const MANAGER_PANEL: &str = "Панель менеджера:";
pub const SET_ROLE_USAGE: &str =
    "Введите команду в формате:\n/set_role &lt;username&gt; &lt;role&gt;\nгде роли: admin, manager, client";
pub const SET_ROLE_BAD_FORMAT: &str =
    "Неверный формат. Используйте /set_role &lt;username&gt; &lt;role&gt;.";
pub const SET_ROLE_BAD_ROLE: &str = "Роль должна быть одной из: admin, manager, client.";

#[must_use]
pub fn admin_choices() -> Vec<Vec<Choice>> {
    vec![
        vec![Choice::new("👥 Список всех пользователей", CALLBACK_ADMIN_LIST_USERS)],
        vec![Choice::new("➕ Добавить роль пользователю", CALLBACK_ADMIN_ADD_ROLE)],
        vec![Choice::new("📊 Глобальная статистика", CALLBACK_ADMIN_STATS)],
    ]
}

#[must_use]
pub fn manager_choices() -> Vec<Vec<Choice>> {
    vec![
        vec![Choice::new("👤 Список клиентов", CALLBACK_MGR_LIST_CLIENTS)],
        vec![Choice::new("📁 Файлы клиентов", CALLBACK_MGR_LIST_FILES)],
    ]
}

#[must_use]
pub fn user_list(accounts: &[Account]) -> String {
    let mut text = String::from("<b>Список всех пользователей:</b>\n");
    for account in accounts {
        let _ = writeln!(text, "– {} (роль: {})", encode_text(&account.username), account.role);
    }
    text
}

#[must_use]
pub fn client_list<'a>(usernames: impl IntoIterator<Item = &'a str>) -> String {
    let mut text = String::from("<b>Список клиентов:</b>\n");
    for username in usernames {
        let _ = writeln!(text, "– {}", encode_text(username));
    }
    text
}

#[must_use]
pub fn client_files(counts: &[(String, i64)]) -> String {
    let mut text = String::from("<b>Файлы клиентов (кол-во):</b>\n");
    for (username, count) in counts {
        let _ = writeln!(text, "– {}: {count} файл(ов)", encode_text(username));
    }
    text
}

#[must_use]
pub fn user_not_found(username: &str) -> String {
    format!("Пользователь {} не найден.", encode_text(username))
}

#[must_use]
pub fn role_changed(username: &str, role: &str) -> String {
    format!("Роль пользователя {} изменена на {role}.", encode_text(username))
}

// ─────────────────────────────────────────────────────────────────────────────
// Work timer
// ─────────────────────────────────────────────────────────────────────────────

pub const WORK_FINISHED: &str = "⏰ Рабочий интервал завершён! Пора сделать перерыв.";
pub const BREAK_FINISHED: &str = "⏳ Перерыв завершён! Можно возвращаться к работе.";
pub const WORK_STOPPED: &str = "⏹ Рабочий таймер остановлен досрочно.";
pub const NO_ACTIVE_WORK: &str = "Нет активного рабочего интервала для остановки.";

#[must_use]
pub fn work_started(minutes: u32) -> String {
    format!("✅ Рабочий таймер запущен на {minutes} минут. Успешной работы!")
}
