//! Registration and login dialogs

use crate::config::{MAX_USERNAME_LEN, MIN_SECRET_LEN};
use crate::credentials::{hash_secret, verify_secret};
use crate::engine::session::AuthState;
use crate::engine::{HandlerCtx, HandlerError, Response};
use crate::storage::{NewAccount, Role, StorageError};
use crate::views;
use tracing::info;

const USERNAME: &str = "username";

/// Usernames are single tokens of bounded length
#[must_use]
pub fn valid_username(input: &str) -> bool {
    !input.is_empty()
        && input.chars().count() <= MAX_USERNAME_LEN
        && !input.chars().any(char::is_whitespace)
}

#[must_use]
pub fn valid_secret(input: &str) -> bool {
    input.chars().count() >= MIN_SECRET_LEN
}

/// Link the sender's platform identity to `account_id` and refresh caches
async fn link_sender(ctx: &mut HandlerCtx<'_>, account_id: i64) -> Result<(), HandlerError> {
    if let Some(external) = ctx.event.user_id {
        ctx.storage().link_external_id(account_id, external).await?;
        ctx.app.identities.invalidate(external).await;
        ctx.forget_account();
    }
    Ok(())
}

crate::handler!(pub RegisterStart, "register", |_ctx| {
    Ok(Response::reply(views::REGISTER_ASK_USERNAME).goto("username"))
});

crate::handler!(pub RegisterUsername, "register_username", |ctx| {
    let Some(username) = ctx.event.text() else {
        return Ok(Response::new());
    };
    if !valid_username(username) {
        return Ok(Response::reply(views::REGISTER_USERNAME_INVALID).retry());
    }
    if ctx.storage().find_credentials(username).await?.is_some() {
        return Ok(Response::reply(views::REGISTER_USERNAME_TAKEN).retry());
    }
    ctx.session.set_answer(USERNAME, username);
    Ok(Response::reply(views::REGISTER_ASK_SECRET).goto("secret"))
});

crate::handler!(pub RegisterSecret, "register_secret", |ctx| {
    let Some(secret) = ctx.event.text() else {
        return Ok(Response::new());
    };
    if !valid_secret(secret) {
        return Ok(Response::reply(views::REGISTER_SECRET_TOO_SHORT).retry());
    }
    let Some(username) = ctx.session.answer(USERNAME).map(ToString::to_string) else {
        return Err(HandlerError::Internal("registration without username".to_string()));
    };

    // Account, settings and the chat link are written in one transaction
    let external_id = ctx.event.user_id;
    let created = ctx
        .storage()
        .create_account(NewAccount {
            username: username.clone(),
            password_hash: hash_secret(secret),
            role: Role::Client,
            external_id,
        })
        .await;
    let account = match created {
        Ok(account) => account,
        // Taken between the two steps
        Err(StorageError::Conflict(_)) => {
            return Ok(Response::reply(views::REGISTER_USERNAME_TAKEN)
                .text(views::REGISTER_ASK_USERNAME)
                .goto("username"));
        }
        Err(e) => return Err(e.into()),
    };
    if let Some(external) = external_id {
        ctx.app.identities.invalidate(external).await;
    }
    ctx.forget_account();

    info!(account_id = account.id, chat_id = ctx.event.chat_id, "Registered");
    Ok(Response::reply(views::registered(&username)).end())
});

crate::handler!(pub LoginStart, "login", |_ctx| {
    Ok(Response::reply(views::LOGIN_ASK_USERNAME).goto("username"))
});

crate::handler!(pub LoginUsername, "login_username", |ctx| {
    let Some(username) = ctx.event.text() else {
        return Ok(Response::new());
    };
    if ctx.storage().find_credentials(username).await?.is_none() {
        return Ok(Response::reply(views::LOGIN_UNKNOWN_USER).end());
    }
    ctx.session.set_answer(USERNAME, username);
    Ok(Response::reply(views::LOGIN_ASK_SECRET).goto("secret"))
});

crate::handler!(pub LoginSecret, "login_secret", |ctx| {
    let Some(secret) = ctx.event.text() else {
        return Ok(Response::new());
    };
    let username = ctx.session.answer(USERNAME).unwrap_or_default().to_string();
    let credentials = ctx.storage().find_credentials(&username).await?;
    let Some(credentials) = credentials.filter(|c| verify_secret(secret, &c.password_hash)) else {
        info!(chat_id = ctx.event.chat_id, "Login rejected");
        return Ok(Response::reply(views::LOGIN_WRONG_SECRET).end());
    };

    let account = credentials.account;
    if account.external_id != ctx.event.user_id {
        link_sender(ctx, account.id).await?;
    }
    ctx.session.login(AuthState {
        account_id: account.id,
        username: account.username.clone(),
        role: account.role,
    });

    info!(account_id = account.id, role = %account.role, "Logged in");
    Ok(Response::reply(views::logged_in(&account)).end())
});

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_username_rules() {
        assert!(valid_username("alice@example.com"));
        assert!(!valid_username(""));
        assert!(!valid_username("two words"));
        assert!(!valid_username(&"a".repeat(MAX_USERNAME_LEN + 1)));
    }

    proptest! {
        #[test]
        fn test_secret_accepts_exactly_min_length_and_above(secret in "\\PC{0,20}") {
            prop_assert_eq!(valid_secret(&secret), secret.chars().count() >= MIN_SECRET_LEN);
        }
    }
}
