use crate::error::AuthError;
use crate::server::session::SessionInfo;

/// Decides whether a freshly accepted session may be served.
///
/// Runs once per connection, before the session is registered or any frame
/// is read. Returning an error closes the connection.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, session: &SessionInfo) -> Result<(), AuthError>;
}

/// Accepts every session.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _session: &SessionInfo) -> Result<(), AuthError> {
        Ok(())
    }
}

impl<F> Authenticator for F
where
    F: Fn(&SessionInfo) -> Result<(), AuthError> + Send + Sync + 'static,
{
    fn authenticate(&self, session: &SessionInfo) -> Result<(), AuthError> {
        self(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::SessionId;

    fn info(peer: &str) -> SessionInfo {
        SessionInfo {
            id: SessionId::new(),
            peer: peer.to_owned(),
        }
    }

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.authenticate(&info("127.0.0.1:1")).is_ok());
    }

    #[test]
    fn test_closure_authenticator() {
        let local_only = |session: &SessionInfo| {
            if session.peer.starts_with("127.0.0.1:") {
                Ok(())
            } else {
                Err(AuthError::Rejected(format!("{} is not local", session.peer)))
            }
        };

        assert!(local_only.authenticate(&info("127.0.0.1:4000")).is_ok());
        let err = local_only.authenticate(&info("10.0.0.9:4000")).unwrap_err();
        assert_eq!(err.to_string(), "authentication rejected: 10.0.0.9:4000 is not local");
    }
}
