//! Greeting, help, logout and the dialog escape

use crate::engine::Response;
use crate::views;

crate::handler!(
    /// `/start`: greet and tell whether the chat is linked to an account
    pub Start, "start", |ctx| {
        let account = match ctx.account_id().await? {
            Some(id) => ctx.storage().find_account(id).await?,
            None => None,
        };
        Ok(Response::reply(views::greeting(account.as_ref())))
    }
);

crate::handler!(pub Help, "help", |_ctx| { Ok(Response::reply(views::HELP)) });

crate::handler!(pub Logout, "logout", |ctx| {
    let text = if ctx.session.logout() {
        views::LOGGED_OUT
    } else {
        views::NOT_LOGGED_IN
    };
    Ok(Response::reply(text))
});

crate::handler!(
    /// Escape of every dialog; the engine has already returned the session to idle
    pub Cancel, "cancel", |_ctx| { Ok(Response::reply(views::DIALOG_CANCELLED)) }
);
