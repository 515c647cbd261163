//! Work/break timer
//!
//! `/start_work` opens a work-session row and schedules the `work` timer.
//! When it fires the row is completed, the chat is notified and the `break`
//! timer is scheduled. `/stop_work` cancels both.

use crate::engine::scheduler::TimerCallback;
use crate::engine::{AppContext, HandlerError, Reply, Response, TimerPayload, TimerPurpose};
use crate::views;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const WORK: TimerPurpose = TimerPurpose("work");
pub const BREAK: TimerPurpose = TimerPurpose("break");

fn minutes(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 60)
}

crate::handler!(pub StartWork, "start_work", |ctx| {
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST));
    };
    let settings = ctx.storage().settings(account_id).await?;
    let record_id = ctx.storage().start_work_session(account_id).await?;

    ctx.app.scheduler.cancel(ctx.session, BREAK);
    let payload = TimerPayload {
        session: ctx.session.key(),
        account_id: Some(account_id),
        record_id: Some(record_id),
    };
    ctx.app
        .scheduler
        .schedule(ctx.session, WORK, minutes(settings.work_minutes), payload);
    Ok(Response::reply(views::work_started(settings.work_minutes)))
});

crate::handler!(pub StopWork, "stop_work", |ctx| {
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST));
    };
    let work = ctx.app.scheduler.cancel(ctx.session, WORK);
    let pause = ctx.app.scheduler.cancel(ctx.session, BREAK);
    let stopped = ctx.storage().stop_active_work_session(account_id).await?;
    debug!(account_id, work, pause, ?stopped, "Work timer stopped");

    Ok(match stopped {
        Some(_) => Response::reply(views::WORK_STOPPED),
        None if work || pause => Response::reply(views::WORK_STOPPED),
        None => Response::reply(views::NO_ACTIVE_WORK),
    })
});

/// Completes the work session and starts the break
pub struct WorkFinished;

#[async_trait]
impl TimerCallback for WorkFinished {
    async fn fire(&self, app: Arc<AppContext>, payload: TimerPayload) -> Result<(), HandlerError> {
        let Some(record_id) = payload.record_id else {
            return Ok(());
        };
        if !app.storage.complete_work_session(record_id).await? {
            debug!(record_id, "Work session no longer active, timer ignored");
            return Ok(());
        }
        info!(record_id, chat_id = payload.chat_id(), "Work interval finished");
        app.outbound
            .send(payload.chat_id(), Reply::text(views::WORK_FINISHED))
            .await?;

        let break_minutes = match payload.account_id {
            Some(account_id) => app.storage.settings(account_id).await?.break_minutes,
            None => crate::config::DEFAULT_BREAK_MINUTES,
        };
        let session = app.sessions.get_or_create(payload.session).await;
        let mut session = session.lock().await;
        app.scheduler
            .schedule(&mut session, BREAK, minutes(break_minutes), payload);
        Ok(())
    }
}

/// Announces the end of the break
pub struct BreakFinished;

#[async_trait]
impl TimerCallback for BreakFinished {
    async fn fire(&self, app: Arc<AppContext>, payload: TimerPayload) -> Result<(), HandlerError> {
        app.outbound
            .send(payload.chat_id(), Reply::text(views::BREAK_FINISHED))
            .await?;
        Ok(())
    }
}
