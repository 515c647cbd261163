//! Administrator and manager panels

use crate::config::TOP_HANDLERS_LIMIT;
use crate::engine::{HandlerCtx, Response, Session};
use crate::storage::Role;
use crate::views;
use tracing::info;

/// Refresh the cached role of every session logged in as `account_id`
async fn refresh_sessions(ctx: &mut HandlerCtx<'_>, account_id: i64, role: Role) {
    let own = ctx.session.key();
    if ctx.session.auth().is_some_and(|auth| auth.account_id == account_id) {
        ctx.session.set_role(role);
    }
    for (key, session) in ctx.app.sessions.all().await {
        if key == own {
            continue;
        }
        // A busy session may be waiting on ours; update it once it is released
        let applied = match session.try_lock() {
            Ok(mut guard) => {
                apply_role(&mut guard, account_id, role);
                true
            }
            Err(_) => false,
        };
        if !applied {
            tokio::spawn(async move {
                apply_role(&mut *session.lock().await, account_id, role);
            });
        }
    }
}

fn apply_role(session: &mut Session, account_id: i64, role: Role) {
    if session.auth().is_some_and(|auth| auth.account_id == account_id) {
        session.set_role(role);
    }
}

crate::handler!(pub AdminPanel, "admin_panel", |_ctx| {
    Ok(Response::new().choices(views::ADMIN_PANEL, views::admin_choices()))
});

crate::handler!(pub AdminAction, "admin_callback", |ctx| {
    let event = ctx.event;
    match event.callback_data().unwrap_or_default() {
        views::CALLBACK_ADMIN_LIST_USERS => {
            let accounts = ctx.storage().list_accounts().await?;
            Ok(Response::reply(views::user_list(&accounts)))
        }
        views::CALLBACK_ADMIN_ADD_ROLE => Ok(Response::reply(views::SET_ROLE_USAGE)),
        views::CALLBACK_ADMIN_STATS => {
            let stats = ctx.storage().global_stats(TOP_HANDLERS_LIMIT).await?;
            Ok(Response::reply(views::global_stats(&stats)))
        }
        _ => Ok(Response::reply(views::UNKNOWN_ACTION)),
    }
});

crate::handler!(
    /// `/set_role <username> <role>`
    pub SetRole, "set_role", |ctx| {
        let event = ctx.event;
        let [username, role] = event.args() else {
            return Ok(Response::reply(views::SET_ROLE_BAD_FORMAT));
        };
        let Ok(role) = role.parse::<Role>() else {
            return Ok(Response::reply(views::SET_ROLE_BAD_ROLE));
        };
        if !ctx.storage().set_role(username, role).await? {
            return Ok(Response::reply(views::user_not_found(username)));
        }
        info!(username = %username, %role, "Role changed");

        if let Some(credentials) = ctx.storage().find_credentials(username).await? {
            refresh_sessions(ctx, credentials.account.id, role).await;
        }
        Ok(Response::reply(views::role_changed(username, role.as_str())))
    }
);

crate::handler!(pub ManagerPanel, "manager_panel", |_ctx| {
    Ok(Response::new().choices(views::MANAGER_PANEL, views::manager_choices()))
});

crate::handler!(pub ManagerAction, "manager_callback", |ctx| {
    let event = ctx.event;
    match event.callback_data().unwrap_or_default() {
        views::CALLBACK_MGR_LIST_CLIENTS => {
            let accounts = ctx.storage().list_accounts().await?;
            let clients = accounts
                .iter()
                .filter(|account| account.role == Role::Client)
                .map(|account| account.username.as_str());
            Ok(Response::reply(views::client_list(clients)))
        }
        views::CALLBACK_MGR_LIST_FILES => {
            let counts = ctx.storage().client_file_counts().await?;
            Ok(Response::reply(views::client_files(&counts)))
        }
        _ => Ok(Response::reply(views::UNKNOWN_ACTION)),
    }
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::AuthState;
    use crate::engine::testing::test_app;
    use crate::engine::{Handler, InboundEvent, SessionKey};
    use crate::storage::NewAccount;

    #[tokio::test]
    async fn test_set_role_updates_live_sessions() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let carol = app
            .storage
            .create_account(NewAccount {
                username: "carol".to_string(),
                password_hash: "s$h".to_string(),
                role: Role::Client,
                external_id: None,
            })
            .await?;

        let carol_key = SessionKey {
            chat_id: 30,
            user_id: Some(30),
        };
        app.sessions.get_or_create(carol_key).await.lock().await.login(AuthState {
            account_id: carol.id,
            username: "carol".to_string(),
            role: Role::Client,
        });

        let event = InboundEvent::from_text(1, Some(1), "/set_role carol manager");
        let mut admin = Session::new(event.session_key());
        let response = SetRole
            .handle(&mut HandlerCtx::new(&app, &event, &mut admin))
            .await?;
        assert_eq!(
            response.replies[0].as_text(),
            Some(views::role_changed("carol", "manager").as_str())
        );

        let session = app.sessions.get_or_create(carol_key).await;
        assert_eq!(session.lock().await.auth().map(|a| a.role), Some(Role::Manager));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_role_updates_busy_session_after_release(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let dan = app
            .storage
            .create_account(NewAccount {
                username: "dan".to_string(),
                password_hash: "s$h".to_string(),
                role: Role::Client,
                external_id: None,
            })
            .await?;

        let dan_key = SessionKey {
            chat_id: 40,
            user_id: Some(40),
        };
        let dan_session = app.sessions.get_or_create(dan_key).await;
        let mut busy = dan_session.lock().await;
        busy.login(AuthState {
            account_id: dan.id,
            username: "dan".to_string(),
            role: Role::Client,
        });

        let event = InboundEvent::from_text(1, Some(1), "/set_role dan admin");
        let mut admin = Session::new(event.session_key());
        SetRole
            .handle(&mut HandlerCtx::new(&app, &event, &mut admin))
            .await?;
        tokio::task::yield_now().await;
        assert_eq!(busy.auth().map(|a| a.role), Some(Role::Client));
        drop(busy);

        // The deferred update queued on the lock first
        let role = dan_session.lock().await.auth().map(|a| a.role);
        assert_eq!(role, Some(Role::Admin));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_role_rejects_bad_input() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        for (input, expected) in [
            ("/set_role carol", views::SET_ROLE_BAD_FORMAT.to_string()),
            ("/set_role carol owner", views::SET_ROLE_BAD_ROLE.to_string()),
            ("/set_role nobody client", views::user_not_found("nobody")),
        ] {
            let event = InboundEvent::from_text(1, Some(1), input);
            let mut session = Session::new(event.session_key());
            let response = SetRole
                .handle(&mut HandlerCtx::new(&app, &event, &mut session))
                .await?;
            assert_eq!(response.replies[0].as_text(), Some(expected.as_str()));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_admin_callback() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let event = InboundEvent::callback(1, Some(1), "admin_reboot");
        let mut session = Session::new(event.session_key());
        let response = AdminAction
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;
        assert_eq!(response.replies[0].as_text(), Some(views::UNKNOWN_ACTION));
        Ok(())
    }
}
