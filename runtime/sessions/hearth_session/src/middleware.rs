use crate::errors::{FinalizeError, WithSessionError};
use crate::store::errors::LoadError;
use crate::{Session, SessionCommit, SessionManager};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Request, Response};
use std::future::Future;

impl SessionManager {
    /// Start the session using the `Cookie` headers of an incoming request.
    ///
    /// Multiple `Cookie` headers are joined together, as if they had been sent as one.
    pub async fn start_from_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<(Session, SessionCommit), LoadError> {
        let cookie_header = cookie_header(headers);
        self.start(cookie_header.as_deref()).await
    }
}

fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let values: Vec<_> = headers
        .get_all(COOKIE)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join("; "))
    }
}

/// A post-processing step to attach a session cookie to the outgoing response, if needed.
///
/// It will also sync the session state with the chosen storage backend.
pub async fn finalize_session<B>(
    mut response: Response<B>,
    commit: SessionCommit,
) -> Result<Response<B>, FinalizeError> {
    if let Some(cookie) = commit.commit().await? {
        let value = HeaderValue::try_from(cookie)?;
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}

/// Run `handler` within a session.
///
/// The session is started from the request headers, handed over to `handler`
/// and committed once `handler` has produced a response.
///
/// ```rust
/// use hearth_session::{Session, SessionManager, with_session};
/// use http::{Request, Response};
///
/// async fn visit(manager: &SessionManager, request: Request<()>) -> Response<String> {
///     let outcome = with_session(manager, request, |_request, session: Session| async move {
///         let visits: u64 = session.get("visits").ok().flatten().unwrap_or(0);
///         let _ = session.set("visits", visits + 1);
///         Response::new(format!("Visit #{}", visits + 1))
///     })
///     .await;
///     outcome.unwrap_or_else(|e| e.into_response())
/// }
/// ```
pub async fn with_session<ReqBody, ResBody, H, Fut>(
    manager: &SessionManager,
    request: Request<ReqBody>,
    handler: H,
) -> Result<Response<ResBody>, WithSessionError>
where
    H: FnOnce(Request<ReqBody>, Session) -> Fut,
    Fut: Future<Output = Response<ResBody>>,
{
    let (session, commit) = manager.start_from_headers(request.headers()).await?;
    let response = handler(request, session).await;
    Ok(finalize_session(response, commit).await?)
}
