//! Interactive browser login: authorization code + PKCE with a loopback redirect

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use oauth2::basic::BasicClient;
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{complete_user_login, silent_login, user_client, user_tenant, Availability, ResolveContext};
use crate::auth::oauth::{self, TokenGrant};
use crate::auth::{CredentialError, HostProbe, TokenCredential};

/// Dynamic/private port range the redirect listener picks from
const PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;
const BIND_ATTEMPTS: usize = 20;
/// How long the user gets to finish signing in
const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REQUEST_BYTES: usize = 16 * 1024;

pub(crate) fn availability(probe: &HostProbe) -> Availability {
    if probe.browser_available() {
        Availability::Available
    } else {
        Availability::Unavailable("no desktop browser available (headless environment)".to_string())
    }
}

pub(crate) async fn build(ctx: &ResolveContext<'_>) -> Result<Arc<dyn TokenCredential>, CredentialError> {
    if let Some(credential) = silent_login(ctx).await? {
        return Ok(Arc::new(credential));
    }

    let config = ctx.config;
    let (listener, port) = bind_redirect_listener().await?;
    let redirect = redirect_uri(port);

    let client = oauth::build_client(&config.environment, user_tenant(config), user_client(config), None)?
        .set_redirect_uri(RedirectUrl::new(redirect.clone()).context("Invalid redirect URL")?);
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (authorize_url, state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(config.environment.management_scope()))
        .add_scope(Scope::new("offline_access".to_string()))
        .set_pkce_challenge(challenge)
        .url();

    tracing::info!("Opening browser for sign-in (redirect to {})", redirect);
    if let Err(e) = webbrowser::open(authorize_url.as_str()) {
        return Err(anyhow!("Failed to open browser: {}", e).into());
    }

    let code = wait_for_redirect(listener, state.secret(), &ctx.cancel).await?;
    let grant = redeem_code(ctx, &client, code, verifier).await?;

    let credential = complete_user_login(ctx, grant).await?;
    Ok(Arc::new(credential))
}

/// Loopback redirect matching the address the listener binds.
fn redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

async fn redeem_code(
    ctx: &ResolveContext<'_>,
    client: &BasicClient,
    code: String,
    verifier: PkceCodeVerifier,
) -> Result<TokenGrant, CredentialError> {
    let exchange = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request_async(|req| oauth::send(ctx.http.clone(), req));

    let response = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(CredentialError::Cancelled),
        response = exchange => response,
    };
    let response = response
        .map_err(oauth::token_error)
        .context("Failed to redeem authorization code")?;
    Ok(TokenGrant::from_response(&response))
}

fn random_port() -> Result<u16> {
    let mut bytes = [0u8; 2];
    getrandom::getrandom(&mut bytes).context("Failed to pick a random port")?;
    let span = PORT_RANGE.end() - PORT_RANGE.start() + 1;
    Ok(PORT_RANGE.start() + u16::from_le_bytes(bytes) % span)
}

/// Bind `127.0.0.1` on a random dynamic port, moving on when one is taken.
async fn bind_redirect_listener() -> Result<(TcpListener, u16)> {
    bind_redirect_listener_with(random_port).await
}

async fn bind_redirect_listener_with(
    mut pick: impl FnMut() -> Result<u16>,
) -> Result<(TcpListener, u16)> {
    for _ in 0..BIND_ATTEMPTS {
        let port = pick()?;
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::debug!("Redirect port {} in use, retrying", port);
            }
            Err(e) => return Err(e).context("Failed to bind redirect listener"),
        }
    }
    bail!("No free redirect port after {} attempts", BIND_ATTEMPTS)
}

/// Accept exactly one redirect and return its authorization code.
///
/// The listener is consumed, so the port is released on every exit path.
async fn wait_for_redirect(
    listener: TcpListener,
    expected_state: &str,
    cancel: &CancellationToken,
) -> Result<String, CredentialError> {
    let accepted = tokio::select! {
        _ = cancel.cancelled() => return Err(CredentialError::Cancelled),
        accepted = tokio::time::timeout(LOGIN_TIMEOUT, listener.accept()) => accepted,
    };
    drop(listener);

    let (mut stream, peer) = accepted
        .map_err(|_| anyhow!("timed out waiting for browser sign-in"))?
        .context("Failed to accept redirect")?;
    tracing::debug!("Redirect received from {}", peer);

    let request = tokio::select! {
        _ = cancel.cancelled() => return Err(CredentialError::Cancelled),
        request = read_request_head(&mut stream) => request?,
    };
    let outcome = parse_redirect(&request, expected_state);

    let page = match &outcome {
        Ok(_) => "Sign-in complete. You can close this window.",
        Err(_) => "Sign-in failed. Return to the terminal for details.",
    };
    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        page.len(),
        page
    );
    if let Err(e) = stream.write_all(reply.as_bytes()).await {
        tracing::debug!("Failed to answer browser: {}", e);
    }

    Ok(outcome?)
}

async fn read_request_head(stream: &mut tokio::net::TcpStream) -> Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.context("Failed to read redirect")?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            bail!("Redirect request too large");
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Pull the code out of `GET /?code=..&state=.. HTTP/1.1`.
fn parse_redirect(request: &str, expected_state: &str) -> Result<String> {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .context("Malformed redirect request")?;
    let url = Url::parse("http://localhost")
        .and_then(|base| base.join(target))
        .context("Malformed redirect target")?;

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(error) = param("error") {
        let description = param("error_description").unwrap_or_default();
        bail!("identity provider returned {}: {}", error, description);
    }
    if param("state").as_deref() != Some(expected_state) {
        bail!("Redirect state mismatch; ignoring response");
    }
    param("code").context("Redirect carried no authorization code")
}
