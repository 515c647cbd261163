//! Role-based access gate

use super::handler::{Handler, HandlerCtx, HandlerResult, Response};
use super::session::Session;
use crate::storage::Role;
use crate::views;
use async_trait::async_trait;
use tracing::info;

/// Decision of the gate for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    /// Not logged in
    Unauthenticated,
    /// Logged in with a role outside the required set
    Forbidden,
}

/// Check a session against a set of roles without touching it
#[must_use]
pub fn check(session: &Session, roles: &[Role]) -> Access {
    match session.auth() {
        None => Access::Unauthenticated,
        Some(auth) if roles.contains(&auth.role) => Access::Allowed,
        Some(_) => Access::Forbidden,
    }
}

/// A handler that only runs for authenticated sessions with one of `roles`
pub struct Gated<H> {
    roles: &'static [Role],
    inner: H,
}

/// Wrap `inner` so that it only runs for the given roles
#[must_use]
pub const fn gated<H: Handler>(roles: &'static [Role], inner: H) -> Gated<H> {
    Gated { roles, inner }
}

#[async_trait]
impl<H: Handler> Handler for Gated<H> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> HandlerResult {
        match check(ctx.session, self.roles) {
            Access::Allowed => self.inner.handle(ctx).await,
            Access::Unauthenticated => {
                info!(handler = self.name(), chat_id = ctx.event.chat_id, "Denied: not authenticated");
                Ok(Response::denied(views::MUST_AUTHENTICATE))
            }
            Access::Forbidden => {
                info!(handler = self.name(), chat_id = ctx.event.chat_id, "Denied: role not allowed");
                Ok(Response::denied(views::FORBIDDEN))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::{AuthState, SessionKey};
    use crate::engine::testing::{test_app, Stub};
    use crate::engine::InboundEvent;
    use crate::storage::ActivityOutcome;
    use std::sync::atomic::Ordering;

    const ADMIN_ONLY: &[Role] = &[Role::Admin];
    const KEY: SessionKey = SessionKey {
        chat_id: 5,
        user_id: Some(5),
    };

    fn logged_in(role: Role) -> Session {
        let mut session = Session::new(KEY);
        session.login(AuthState {
            account_id: 1,
            username: "user".to_string(),
            role,
        });
        session
    }

    #[test]
    fn test_check() {
        assert_eq!(check(&Session::new(KEY), ADMIN_ONLY), Access::Unauthenticated);
        assert_eq!(check(&logged_in(Role::Client), ADMIN_ONLY), Access::Forbidden);
        assert_eq!(check(&logged_in(Role::Admin), ADMIN_ONLY), Access::Allowed);
    }

    #[tokio::test]
    async fn test_denied_handler_body_never_runs() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _outbound) = test_app()?;
        let stub = Stub::default();
        let calls = stub.calls.clone();
        let handler = gated(ADMIN_ONLY, stub);
        let event = InboundEvent::from_text(5, Some(5), "/stats_global");

        let mut session = logged_in(Role::Client);
        let response = handler
            .handle(&mut HandlerCtx::new(&app, &event, &mut session))
            .await?;
        assert_eq!(response.replies[0].as_text(), Some(views::FORBIDDEN));
        assert_eq!(response.outcome, ActivityOutcome::Denied);

        let mut anonymous = Session::new(KEY);
        let response = handler
            .handle(&mut HandlerCtx::new(&app, &event, &mut anonymous))
            .await?;
        assert_eq!(response.replies[0].as_text(), Some(views::MUST_AUTHENTICATE));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut admin = logged_in(Role::Admin);
        handler
            .handle(&mut HandlerCtx::new(&app, &event, &mut admin))
            .await?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
