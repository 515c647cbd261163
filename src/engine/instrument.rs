//! Activity and error telemetry around every handler call
//!
//! Unresolved identities (a chat that never registered) are not written to
//! the activity table. Error rows are written regardless and carry a null
//! account in that case.

use super::handler::{Handler, HandlerCtx, HandlerResult};
use crate::storage::{NewActivity, NewErrorRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// A handler wrapped with activity and error recording
pub struct Instrumented<H> {
    inner: H,
    record_input: bool,
}

/// Wrap `inner` with telemetry and erase its type
#[must_use]
pub fn instrument<H: Handler + 'static>(inner: H) -> Arc<dyn Handler> {
    Arc::new(Instrumented {
        inner,
        record_input: true,
    })
}

/// Like [`instrument`], but the raw input (a secret) is never stored
#[must_use]
pub fn instrument_redacted<H: Handler + 'static>(inner: H) -> Arc<dyn Handler> {
    Arc::new(Instrumented {
        inner,
        record_input: false,
    })
}

#[async_trait]
impl<H: Handler> Handler for Instrumented<H> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> HandlerResult {
        let started = Instant::now();
        let handler = self.name();

        let account_id = match ctx.account_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(handler, error = %e, "Identity lookup failed");
                None
            }
        };

        let activity_id = match account_id {
            Some(account_id) => {
                let activity = NewActivity {
                    account_id,
                    handler_name: handler.to_string(),
                    query_text: self.record_input.then(|| ctx.event.query_text()),
                };
                match ctx.storage().record_activity(activity).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(handler, error = %e, "Failed to record activity");
                        None
                    }
                }
            }
            None => {
                debug!(handler, chat_id = ctx.event.chat_id, "Unresolved identity, activity skipped");
                None
            }
        };

        let result = self.inner.handle(ctx).await;
        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match &result {
            Ok(response) => {
                if let Some(id) = activity_id {
                    if let Err(e) = ctx
                        .storage()
                        .complete_activity(id, elapsed_ms, response.outcome, response.intent.clone())
                        .await
                    {
                        warn!(handler, error = %e, "Failed to complete activity");
                    }
                }
                debug!(handler, elapsed_ms, outcome = response.outcome.as_str(), "Handler done");
            }
            Err(err) => {
                error!(handler, elapsed_ms, error = %err, "Handler failed");
                let record = NewErrorRecord {
                    account_id,
                    handler_name: handler.to_string(),
                    description: err.to_string(),
                };
                if let Err(e) = ctx.storage().record_error(record).await {
                    warn!(handler, error = %e, "Failed to write error record");
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::HandlerError;
    use crate::engine::handler::Response;
    use crate::engine::session::Session;
    use crate::engine::testing::{test_app, Stub};
    use crate::engine::InboundEvent;
    use crate::storage::{NewAccount, Role, StorageError};

    crate::handler!(Failing, "failing", |_ctx| {
        Err(HandlerError::Storage(StorageError::Corrupt("broken row".to_string())))
    });

    crate::handler!(Labelled, "labelled", |_ctx| {
        Ok(Response::reply("ok").intent("ask_time"))
    });

    crate::handler!(Slow, "slow", |_ctx| {
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        Ok(Response::reply("ok"))
    });

    async fn registered(app: &crate::engine::AppContext, external: i64) -> Result<i64, StorageError> {
        let account = app
            .storage
            .create_account(NewAccount {
                username: format!("user{external}"),
                password_hash: "x$y".to_string(),
                role: Role::Client,
                external_id: Some(external),
            })
            .await?;
        Ok(account.id)
    }

    #[tokio::test]
    async fn test_unresolved_identity_skips_activity() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let event = InboundEvent::from_text(1, Some(1), "/help");
        let mut session = Session::new(event.session_key());

        let handler = instrument(Stub::default());
        handler
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;

        let stats = app.storage.global_stats(5).await?;
        assert!(stats.top_by_volume.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_success_backfills_latency_and_intent() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let account_id = registered(&app, 2).await?;
        let event = InboundEvent::from_text(2, Some(2), "/intent который час");
        let mut session = Session::new(event.session_key());

        instrument(Labelled)
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;

        let rows = app.storage.activities(account_id).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].handler_name, "labelled");
        assert_eq!(rows[0].query_text.as_deref(), Some("/intent который час"));
        assert!(rows[0].response_time_ms.is_some());
        assert_eq!(rows[0].intent_label.as_deref(), Some("ask_time"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_follows_runtime_clock() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let account_id = registered(&app, 5).await?;
        let event = InboundEvent::from_text(5, Some(5), "/slow");
        let mut session = Session::new(event.session_key());

        instrument(Slow)
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;

        let rows = app.storage.activities(account_id).await?;
        let elapsed = rows[0].response_time_ms.unwrap_or_default();
        assert!((1500..1600).contains(&elapsed), "elapsed {elapsed}");
        Ok(())
    }

    #[tokio::test]
    async fn test_redacted_input_is_not_stored() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let account_id = registered(&app, 4).await?;
        let event = InboundEvent::from_text(4, Some(4), "hunter2hunter2");
        let mut session = Session::new(event.session_key());

        instrument_redacted(Stub::default())
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;

        let rows = app.storage.activities(account_id).await?;
        assert_eq!(rows[0].query_text, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_writes_error_and_leaves_latency_unfilled(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let account_id = registered(&app, 3).await?;
        let event = InboundEvent::from_text(3, Some(3), "/summarize");
        let mut session = Session::new(event.session_key());

        let result = instrument(Failing)
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await;
        assert!(result.is_err());

        let rows = app.storage.activities(account_id).await?;
        assert_eq!(rows[0].response_time_ms, None);
        assert_eq!(rows[0].outcome, None);

        let errors = app.storage.errors().await?;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].handler_name, "failing");
        assert_eq!(errors[0].account_id, Some(account_id));
        Ok(())
    }
}
