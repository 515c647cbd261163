//! Text analysis: intake dialogs, one-shot commands, feedback and open chat
//!
//! Each call that reaches a capability stores the analysed text as the
//! session's last query, which the like/dislike buttons rate.

use crate::capabilities::summarize::split_sentences;
use crate::capabilities::{CapabilityKind, CapabilityRequest, TopicScore};
use crate::config::TOP_TOPICS_PER_DOCUMENT;
use crate::engine::{HandlerCtx, Response};
use crate::views;
use html_escape::encode_text;

/// Text typed in an analysis state, or `None` for anything else
fn typed_text<'a>(ctx: &HandlerCtx<'a>) -> Option<&'a str> {
    ctx.event.text().filter(|t| !t.is_empty())
}

/// Text after a one-shot command
fn command_text(ctx: &HandlerCtx<'_>) -> Option<String> {
    let args = ctx.event.args();
    (!args.is_empty()).then(|| args.join(" "))
}

crate::handler!(pub SummarizeStart, "summarize", |ctx| {
    if ctx.account_id().await?.is_none() {
        return Ok(Response::reply(views::REGISTER_FIRST));
    }
    Ok(Response::reply(views::SUMMARIZE_ASK_TEXT).goto("text"))
});

crate::handler!(pub SummarizeText, "summarize_text", |ctx| {
    let Some(text) = typed_text(ctx) else {
        return Ok(Response::new());
    };
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST).end());
    };
    let length = ctx.storage().settings(account_id).await?.summary_length;
    let length = usize::try_from(length).unwrap_or(usize::MAX);
    ctx.session.last_query = Some(text.to_string());

    if split_sentences(text).len() <= length {
        return Ok(Response::reply(views::TEXT_TOO_SHORT)
            .text(encode_text(text))
            .intent("summarize")
            .end());
    }

    let request = CapabilityRequest::text(text).with_max_sentences(length);
    let summary = ctx
        .capabilities()
        .text(CapabilityKind::Summarize, &request)
        .await?;
    Ok(Response::reply(views::summary(&summary))
        .intent("summarize")
        .end())
});

crate::handler!(pub QuestionsStart, "generate_questions", |ctx| {
    if ctx.account_id().await?.is_none() {
        return Ok(Response::reply(views::REGISTER_FIRST));
    }
    Ok(Response::reply(views::QUESTIONS_ASK_TEXT).goto("text"))
});

crate::handler!(pub QuestionsText, "generate_questions_text", |ctx| {
    let Some(text) = typed_text(ctx) else {
        return Ok(Response::new());
    };
    ctx.session.last_query = Some(text.to_string());
    let question = ctx
        .capabilities()
        .text(CapabilityKind::Questions, &CapabilityRequest::text(text))
        .await?;
    Ok(Response::reply(views::question(&question))
        .intent("generate_questions")
        .end())
});

crate::handler!(pub DeadlinesStart, "extract_deadlines", |ctx| {
    if ctx.account_id().await?.is_none() {
        return Ok(Response::reply(views::REGISTER_FIRST));
    }
    Ok(Response::reply(views::DEADLINES_ASK_TEXT).goto("text"))
});

crate::handler!(pub DeadlinesText, "extract_deadlines_text", |ctx| {
    let Some(text) = typed_text(ctx) else {
        return Ok(Response::new());
    };
    ctx.session.last_query = Some(text.to_string());
    let entities = ctx
        .capabilities()
        .entities(CapabilityKind::Deadlines, text)
        .await?;
    let reply = if entities.is_empty() {
        views::NO_DEADLINES.to_string()
    } else {
        views::deadlines(&entities)
    };
    Ok(Response::reply(reply).intent("extract_deadlines").end())
});

crate::handler!(pub Intent, "intent", |ctx| {
    if ctx.account_id().await?.is_none() {
        return Ok(Response::reply(views::REGISTER_FIRST));
    }
    let Some(text) = command_text(ctx) else {
        return Ok(Response::reply(views::args_required("intent")));
    };
    let label = ctx.capabilities().label(CapabilityKind::Intent, &text).await?;
    ctx.session.last_query = Some(text);
    Ok(Response::reply(views::intent_answer(&label))
        .choices(views::FEEDBACK_PROMPT, views::feedback_choices())
        .intent(label))
});

crate::handler!(pub Sentiment, "sentiment", |ctx| {
    if ctx.account_id().await?.is_none() {
        return Ok(Response::reply(views::REGISTER_FIRST));
    }
    let Some(text) = command_text(ctx) else {
        return Ok(Response::reply(views::args_required("sentiment")));
    };
    let label = ctx
        .capabilities()
        .label(CapabilityKind::Sentiment, &text)
        .await?;
    ctx.session.last_query = Some(text);
    Ok(Response::reply(views::sentiment(&label)).intent("sentiment"))
});

/// Documents of `/topics`, separated by `;`
fn split_documents(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|doc| !doc.is_empty())
        .map(str::to_string)
        .collect()
}

/// Most probable topics first
fn top_topics(mut scores: Vec<TopicScore>) -> Vec<TopicScore> {
    scores.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    scores.truncate(TOP_TOPICS_PER_DOCUMENT);
    scores
}

crate::handler!(pub Topics, "topics", |ctx| {
    if ctx.account_id().await?.is_none() {
        return Ok(Response::reply(views::REGISTER_FIRST));
    }
    let documents = command_text(ctx).map(|text| split_documents(&text)).unwrap_or_default();
    if documents.is_empty() {
        return Ok(Response::reply(views::TOPICS_USAGE));
    }
    let query = documents.join("; ");
    let topics: Vec<_> = ctx
        .capabilities()
        .topics(documents)
        .await?
        .into_iter()
        .map(top_topics)
        .collect();
    ctx.session.last_query = Some(query);
    Ok(Response::reply(views::topics(&topics)).intent("topics"))
});

crate::handler!(pub Feedback, "process_feedback", |ctx| {
    let event = ctx.event;
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST));
    };
    let Some(query) = ctx.session.last_query.clone() else {
        return Ok(Response::reply(views::FEEDBACK_NOTHING_TO_RATE));
    };
    let rating = i64::from(event.callback_data() == Some(views::CALLBACK_LIKE));
    ctx.storage()
        .add_feedback(account_id, Some(query), rating)
        .await?;
    Ok(Response::reply(views::FEEDBACK_THANKS))
});

crate::handler!(
    /// Free text outside any dialog
    pub Chat, "chat", |ctx| {
        let Some(text) = typed_text(ctx) else {
            return Ok(Response::new());
        };
        let answer = ctx
            .capabilities()
            .text(CapabilityKind::Chat, &CapabilityRequest::text(text))
            .await?;
        ctx.session.last_query = Some(text.to_string());
        Ok(Response::reply(encode_text(&answer)))
    }
);
