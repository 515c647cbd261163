//! Usage reports: personal stats, dashboard and global stats

use crate::config::{RECENT_REQUESTS_LIMIT, TOP_HANDLERS_LIMIT};
use crate::engine::Response;
use crate::views;

crate::handler!(pub Stats, "stats", |ctx| {
    let Some(account_id) = ctx.account_id().await? else {
        return Ok(Response::reply(views::REGISTER_FIRST));
    };
    let stats = ctx
        .storage()
        .user_stats(account_id, RECENT_REQUESTS_LIMIT)
        .await?;
    Ok(Response::reply(views::user_stats(&stats)))
});

crate::handler!(
    /// Dashboard of the logged in account
    pub DashboardView, "dashboard", |ctx| {
        let Some(auth) = ctx.session.auth().cloned() else {
            return Ok(Response::reply(views::MUST_AUTHENTICATE));
        };
        Ok(match ctx.storage().dashboard(auth.account_id).await? {
            Some(dashboard) => Response::reply(views::dashboard(&dashboard)),
            None => Response::reply(views::user_not_found(&auth.username)),
        })
    }
);

crate::handler!(pub GlobalStatsView, "stats_global", |ctx| {
    let stats = ctx.storage().global_stats(TOP_HANDLERS_LIMIT).await?;
    Ok(Response::reply(views::global_stats(&stats)))
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::AuthState;
    use crate::engine::testing::test_app;
    use crate::engine::{Handler, HandlerCtx, InboundEvent, Session};
    use crate::storage::{NewAccount, Role};

    #[tokio::test]
    async fn test_dashboard_uses_logged_in_account() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let account = app
            .storage
            .create_account(NewAccount {
                username: "bob".to_string(),
                password_hash: "s$h".to_string(),
                role: Role::Manager,
                external_id: None,
            })
            .await?;

        let event = InboundEvent::from_text(3, Some(3), "/dashboard");
        let mut session = Session::new(event.session_key());
        session.login(AuthState {
            account_id: account.id,
            username: account.username.clone(),
            role: account.role,
        });
        let response = DashboardView
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;
        let text = response.replies[0].as_text().unwrap_or_default();
        assert!(text.contains("bob"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_require_registration() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let event = InboundEvent::from_text(4, Some(4), "/stats");
        let mut session = Session::new(event.session_key());
        let response = Stats
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;
        assert_eq!(response.replies[0].as_text(), Some(views::REGISTER_FIRST));
        Ok(())
    }
}
