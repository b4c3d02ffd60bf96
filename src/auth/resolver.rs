//! Strategy selection, validation and the resolved account
//!
//! AUTO walks [`StrategyKind::AUTO_ORDER`] and stops at the first strategy
//! whose credential survives a live management-plane token round-trip. A
//! pinned type runs exactly one strategy. Nothing is retried here.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::credential::{build_http_client, tenant_from_token};
use super::strategies::ResolveContext;
use super::{
    Account, AuthConfiguration, AuthError, Availability, CredentialError, HostProbe,
    LoginFailure, StrategyKind, TokenCache, TokenCredential, TokenCredentialHandle, TokenRequest,
};

/// Tenants that name an audience rather than a directory
const META_TENANTS: [&str; 3] = ["organizations", "common", "consumers"];

/// Outcome of the live round-trip that proves a credential.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub handle: TokenCredentialHandle,
    pub tenant_id: Option<String>,
    pub succeeded: bool,
    pub failure_reason: Option<String>,
}

/// Resolves an [`AuthConfiguration`] into a validated [`Account`].
#[derive(Debug, Clone)]
pub struct Resolver {
    probe: HostProbe,
    token_cache: Option<TokenCache>,
}

impl Resolver {
    /// Resolver over `probe` with no persisted token cache.
    pub fn new(probe: HostProbe) -> Self {
        Self {
            probe,
            token_cache: None,
        }
    }

    pub fn with_token_cache(mut self, cache: TokenCache) -> Self {
        self.token_cache = Some(cache);
        self
    }

    /// Probe the running process and use the platform token cache.
    pub fn from_environment() -> Self {
        let resolver = Self::new(HostProbe::from_process());
        match TokenCache::default_location() {
            Ok(cache) => resolver.with_token_cache(cache),
            Err(e) => {
                tracing::warn!("Token cache disabled: {:#}", e);
                resolver
            }
        }
    }

    pub fn probe(&self) -> &HostProbe {
        &self.probe
    }

    pub fn token_cache(&self) -> Option<&TokenCache> {
        self.token_cache.as_ref()
    }

    pub async fn resolve(&self, config: &AuthConfiguration) -> Result<Account, AuthError> {
        self.resolve_with_cancellation(config, CancellationToken::new())
            .await
    }

    /// Like [`resolve`](Self::resolve); cancelling `cancel` stops an
    /// interactive flow and yields `AuthenticationCancelled`.
    pub async fn resolve_with_cancellation(
        &self,
        config: &AuthConfiguration,
        cancel: CancellationToken,
    ) -> Result<Account, AuthError> {
        self.run(config, config.auth_type.pinned_strategy(), cancel)
            .await
    }

    /// Log in again with the strategy that produced `account`.
    ///
    /// A device-code account whose executor has been shut down cannot log in
    /// again and fails with `ExecutorUnavailable`. Only one device-code flow
    /// runs per account; a second concurrent call fails with
    /// `InvalidConfiguration` before prompting.
    pub async fn reauthenticate(
        &self,
        account: &Account,
        cancel: CancellationToken,
    ) -> Result<Account, AuthError> {
        let kind = account.strategy();
        let _in_flight = match kind {
            StrategyKind::DeviceCode => Some(account.begin_login().ok_or_else(|| {
                AuthError::InvalidConfiguration(
                    "a device code login is already in progress for this account".to_string(),
                )
            })?),
            _ => None,
        };

        tracing::info!("Re-authenticating with {}", kind);
        self.run(account.configuration(), Some(kind), cancel).await
    }

    /// Local availability of every strategy in AUTO order. No network.
    pub fn probe_availability(&self, config: &AuthConfiguration) -> Vec<(StrategyKind, Availability)> {
        let ctx = ResolveContext {
            config,
            probe: &self.probe,
            http: reqwest::Client::new(),
            token_cache: self.token_cache.as_ref(),
            cancel: CancellationToken::new(),
        };
        StrategyKind::AUTO_ORDER
            .iter()
            .map(|kind| {
                let availability = kind
                    .check_available(&ctx)
                    .unwrap_or_else(|e| Availability::Unavailable(e.to_string()));
                (*kind, availability)
            })
            .collect()
    }

    async fn run(
        &self,
        config: &AuthConfiguration,
        pinned: Option<StrategyKind>,
        cancel: CancellationToken,
    ) -> Result<Account, AuthError> {
        // Caller-owned executor already shut down: refuse before any network call
        let wants_device_code = matches!(pinned, None | Some(StrategyKind::DeviceCode));
        if wants_device_code && config.executor.as_ref().is_some_and(|e| e.is_shutdown()) {
            return Err(AuthError::ExecutorUnavailable);
        }

        let http = build_http_client(config)
            .map_err(|e| AuthError::InvalidConfiguration(format!("{:#}", e)))?;
        let ctx = ResolveContext {
            config,
            probe: &self.probe,
            http,
            token_cache: self.token_cache.as_ref(),
            cancel,
        };

        match pinned {
            Some(kind) => self.resolve_pinned(kind, &ctx).await,
            None => self.resolve_auto(&ctx).await,
        }
    }

    async fn resolve_pinned(&self, kind: StrategyKind, ctx: &ResolveContext<'_>) -> Result<Account, AuthError> {
        if let Availability::Unavailable(reason) = kind.check_available(ctx)? {
            return Err(AuthError::InvalidConfiguration(format!(
                "{} authentication was requested but cannot be used: {}",
                kind, reason
            )));
        }
        tracing::info!("Authenticating with {}", kind);
        self.attempt(kind, ctx).await
    }

    async fn resolve_auto(&self, ctx: &ResolveContext<'_>) -> Result<Account, AuthError> {
        let mut failures = Vec::new();

        for kind in StrategyKind::AUTO_ORDER {
            if ctx.cancel.is_cancelled() {
                return Err(AuthError::AuthenticationCancelled(kind));
            }

            if let Availability::Unavailable(reason) = kind.check_available(ctx)? {
                tracing::debug!("Skipping {}: {}", kind, reason);
                failures.push(LoginFailure::new(kind, format!("not available: {}", reason)));
                continue;
            }

            tracing::info!("Trying {} authentication", kind);
            match self.attempt(kind, ctx).await {
                Ok(account) => return Ok(account),
                Err(AuthError::LoginFailure(failure)) => {
                    tracing::warn!("{} authentication failed: {}", kind, failure.reason);
                    failures.push(failure);
                }
                Err(other) => return Err(other),
            }
        }

        Err(AuthError::AggregatedLoginFailure(failures))
    }

    /// Build and validate one strategy.
    async fn attempt(&self, kind: StrategyKind, ctx: &ResolveContext<'_>) -> Result<Account, AuthError> {
        // Interactive builds watch ctx.cancel themselves
        let credential = kind
            .build_credential(ctx)
            .await
            .map_err(|e| e.into_auth_error(kind))?;

        let validation = validate(kind, credential, ctx).await?;
        if !validation.succeeded {
            return Err(AuthError::LoginFailure(LoginFailure::new(
                kind,
                validation
                    .failure_reason
                    .unwrap_or_else(|| "validation failed".to_string()),
            )));
        }

        tracing::info!(
            "Authenticated with {} (tenant {})",
            kind,
            validation.tenant_id.as_deref().unwrap_or("unknown")
        );
        Ok(Account::new(
            kind,
            validation.handle,
            Arc::new(ctx.config.clone()),
            ctx.http.clone(),
        ))
    }
}

/// Request a management-plane token through `credential`.
///
/// Ordinary failures come back as an unsuccessful result; cancellation and a
/// dead executor stay errors.
async fn validate(
    kind: StrategyKind,
    credential: Arc<dyn TokenCredential>,
    ctx: &ResolveContext<'_>,
) -> Result<ValidationResult, AuthError> {
    let environment = ctx.config.environment.clone();
    let request = TokenRequest::new(environment.management_scope());

    let outcome = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(AuthError::AuthenticationCancelled(kind)),
        outcome = credential.get_token(&request) => outcome,
    };

    match outcome {
        Ok(token) => {
            let tenant_id = ctx
                .config
                .tenant()
                .filter(|t| !is_meta_tenant(t))
                .map(str::to_string)
                .or_else(|| {
                    credential
                        .tenant_id()
                        .filter(|t| !is_meta_tenant(t))
                        .map(str::to_string)
                })
                .or_else(|| tenant_from_token(&token.token));
            Ok(ValidationResult {
                handle: TokenCredentialHandle::new(credential, environment, tenant_id.clone()),
                tenant_id,
                succeeded: true,
                failure_reason: None,
            })
        }
        Err(CredentialError::Other(e)) => Ok(ValidationResult {
            handle: TokenCredentialHandle::new(credential, environment, None),
            tenant_id: None,
            succeeded: false,
            failure_reason: Some(format!("{:#}", e)),
        }),
        Err(e) => Err(e.into_auth_error(kind)),
    }
}

fn is_meta_tenant(tenant: &str) -> bool {
    META_TENANTS.iter().any(|m| m.eq_ignore_ascii_case(tenant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::fake_jwt;
    use crate::auth::strategies::device_code::tests::{device_config, mount_device_code, mount_pending};
    use crate::auth::strategies::service_principal::tests::sp_config;
    use crate::auth::strategies::shared_cache::tests::FIXTURE;
    use crate::auth::{AuthType, AzureEnvironment, WorkerPool};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{any, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_environment(server: &MockServer) -> AzureEnvironment {
        AzureEnvironment::custom("mock", server.uri(), format!("{}/", server.uri()))
    }

    /// Host where managed identity exists but refuses, like a laptop.
    async fn refusing_imds() -> (MockServer, HostProbe) {
        let imds = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(400).set_body_string("no identity"))
            .mount(&imds)
            .await;
        let probe = HostProbe::empty().with_imds_endpoint(format!("{}/metadata/identity/oauth2/token", imds.uri()));
        (imds, probe)
    }

    fn sp_token_response(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": 3600
        }))
    }

    #[tokio::test]
    async fn test_auto_with_nothing_usable_lists_every_strategy() {
        let identity = MockServer::start().await;
        // No strategy that fails its availability check may touch the network
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&identity)
            .await;
        let (_imds, probe) = refusing_imds().await;

        let config = AuthConfiguration {
            environment: mock_environment(&identity),
            ..AuthConfiguration::default()
        };
        let err = Resolver::new(probe).resolve(&config).await.unwrap_err();

        let AuthError::AggregatedLoginFailure(failures) = &err else {
            panic!("unexpected error: {err:?}");
        };
        let attempted: Vec<StrategyKind> = failures.iter().map(|f| f.strategy).collect();
        assert_eq!(attempted, StrategyKind::AUTO_ORDER.to_vec());
        assert!(failures.iter().all(|f| !f.reason.is_empty()));
        assert!(failures[2].reason.contains("HTTP 400"), "{}", failures[2].reason);
        assert!(failures[1].reason.starts_with("not available"));
    }

    #[tokio::test]
    async fn test_pinned_unavailable_is_invalid_configuration() {
        let identity = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&identity)
            .await;
        let resolver = Resolver::new(HostProbe::empty());

        for auth_type in [
            AuthType::ServicePrincipal,
            AuthType::DeviceCode,
            AuthType::OAuth2,
            AuthType::VsCode,
            AuthType::AzureCli,
        ] {
            let config = AuthConfiguration {
                client: Some("00000000-0000-0000-0000-000000000001".to_string()),
                environment: mock_environment(&identity),
                ..AuthConfiguration::new(auth_type)
            };
            let err = resolver.resolve(&config).await.unwrap_err();
            assert!(
                matches!(err, AuthError::InvalidConfiguration(_)),
                "{auth_type}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_service_principal_binds_tenant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(sp_token_response("sp-token"))
            .mount(&server)
            .await;

        let account = Resolver::new(HostProbe::empty())
            .resolve(&sp_config(&server))
            .await
            .unwrap();
        assert_eq!(account.strategy(), StrategyKind::ServicePrincipal);
        assert_eq!(account.tenant_id(), Some("t1"));
        assert!(account.is_valid());
        let token = account.token_credential().management_token().await.unwrap();
        assert_eq!(token.token, "sp-token");
    }

    #[tokio::test]
    async fn test_repeated_resolution_yields_independent_accounts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(sp_token_response("sp-token"))
            // One validation per resolution: nothing is shared between them
            .expect(2)
            .mount(&server)
            .await;

        let resolver = Resolver::new(HostProbe::empty());
        let config = sp_config(&server);
        let first = resolver.resolve(&config).await.unwrap();
        let second = resolver.resolve(&config).await.unwrap();

        assert!(!Arc::ptr_eq(
            &first.token_credential().credential(),
            &second.token_credential().credential()
        ));
        assert_eq!(first.tenant_id(), second.tenant_id());
    }

    #[tokio::test]
    async fn test_auto_stops_at_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .and(body_string_contains("client_id=env-client"))
            .respond_with(sp_token_response("env-token"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("client_id=00000000-0000-0000-0000-000000000001"))
            .respond_with(sp_token_response("sp-token"))
            .expect(0)
            .mount(&server)
            .await;

        let probe = HostProbe::empty()
            .with_var("AZURE_CLIENT_ID", "env-client")
            .with_var("AZURE_TENANT_ID", "t1")
            .with_var("AZURE_CLIENT_SECRET", "env-secret");
        let config = AuthConfiguration {
            auth_type: AuthType::Auto,
            ..sp_config(&server)
        };
        let account = Resolver::new(probe).resolve(&config).await.unwrap();
        assert_eq!(account.strategy(), StrategyKind::EnvironmentDelegated);
    }

    #[tokio::test]
    async fn test_auto_moves_past_failed_validation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("client_id=env-client"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .and(body_string_contains("client_id=00000000-0000-0000-0000-000000000001"))
            .respond_with(sp_token_response("sp-token"))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HostProbe::empty()
            .with_var("AZURE_CLIENT_ID", "env-client")
            .with_var("AZURE_TENANT_ID", "t1")
            .with_var("AZURE_CLIENT_SECRET", "wrong");
        let config = AuthConfiguration {
            auth_type: AuthType::Auto,
            ..sp_config(&server)
        };
        let account = Resolver::new(probe).resolve(&config).await.unwrap();
        assert_eq!(account.strategy(), StrategyKind::ServicePrincipal);
    }

    #[tokio::test]
    async fn test_pinned_failure_reports_strategy_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "unauthorized_client",
                "error_description": "AADSTS700016: Application not found"
            })))
            .mount(&server)
            .await;

        let err = Resolver::new(HostProbe::empty())
            .resolve(&sp_config(&server))
            .await
            .unwrap_err();
        match err {
            AuthError::LoginFailure(failure) => {
                assert_eq!(failure.strategy, StrategyKind::ServicePrincipal);
                assert!(failure.reason.contains("AADSTS700016"), "{}", failure.reason);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_device_code_cancel_is_prompt_and_keeps_executor() {
        let server = MockServer::start().await;
        mount_device_code(&server).await;
        mount_pending(&server).await;

        let pool = WorkerPool::new(2);
        let config = device_config(&server, pool.clone(), Arc::new(Mutex::new(Vec::new())));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
            Instant::now()
        });

        let err = Resolver::new(HostProbe::empty())
            .resolve_with_cancellation(&config, cancel)
            .await
            .unwrap_err();
        let cancelled_at = canceller.await.unwrap();

        assert!(matches!(
            err,
            AuthError::AuthenticationCancelled(StrategyKind::DeviceCode)
        ));
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));
        assert!(!pool.is_shutdown());
        assert_eq!(pool.idle_workers(), 2);
        // Still usable for other work
        let task = pool.spawn(async { 7 }).await.unwrap();
        assert_eq!(task.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_reauthenticate_after_executor_shutdown() {
        let server = MockServer::start().await;
        mount_device_code(&server).await;
        Mock::given(method("POST"))
            .and(path("/organizations/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": fake_jwt("home-tenant"),
                "refresh_token": "rt-1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let pool = WorkerPool::new(1);
        let config = device_config(&server, pool.clone(), Arc::new(Mutex::new(Vec::new())));
        let resolver = Resolver::new(HostProbe::empty());
        let account = resolver.resolve(&config).await.unwrap();
        assert_eq!(account.strategy(), StrategyKind::DeviceCode);
        assert_eq!(account.tenant_id(), Some("home-tenant"));
        assert!(account.is_valid());

        pool.shutdown();
        let requests_before = server.received_requests().await.unwrap().len();

        assert!(!account.is_valid());
        let err = resolver
            .reauthenticate(&account, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExecutorUnavailable));
        // No stale token either
        assert!(matches!(
            account.token_credential().management_token().await,
            Err(CredentialError::ExecutorUnavailable)
        ));
        assert!(matches!(
            resolver.resolve(&config).await,
            Err(AuthError::ExecutorUnavailable)
        ));

        assert_eq!(server.received_requests().await.unwrap().len(), requests_before);
    }

    #[tokio::test]
    async fn test_one_device_code_reauthentication_at_a_time() {
        let server = MockServer::start().await;
        mount_device_code(&server).await;
        // The first sign-in completes; every later poll stays pending
        Mock::given(method("POST"))
            .and(path("/organizations/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": fake_jwt("home-tenant"),
                "refresh_token": "rt-1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_pending(&server).await;

        let pool = WorkerPool::new(2);
        let shown = Arc::new(Mutex::new(Vec::new()));
        let config = device_config(&server, pool.clone(), shown.clone());
        let resolver = Resolver::new(HostProbe::empty());
        let account = resolver.resolve(&config).await.unwrap();
        shown.lock().unwrap().clear();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let same_account = account.clone();
        let (first, second) = tokio::join!(
            resolver.reauthenticate(&account, cancel.clone()),
            resolver.reauthenticate(&same_account, cancel.clone()),
        );
        assert!(matches!(
            first,
            Err(AuthError::AuthenticationCancelled(StrategyKind::DeviceCode))
        ));
        match second {
            Err(AuthError::InvalidConfiguration(reason)) => {
                assert!(reason.contains("already in progress"), "{reason}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(shown.lock().unwrap().len(), 1);

        // Released once the running flow ends
        assert!(account.begin_login().is_some());
        assert_eq!(pool.idle_workers(), 2);
    }

    /// Home directory holding the shared MSAL cache, rewritten to point at `server`.
    fn home_with_shared_cache(server: &MockServer) -> tempfile::TempDir {
        let home = tempfile::tempdir().unwrap();
        let dir = home.path().join(".IdentityService");
        std::fs::create_dir_all(&dir).unwrap();
        let host = mock_environment(server).authority_host_name().to_string();
        std::fs::write(
            dir.join("msal.cache"),
            FIXTURE.replace("login.microsoftonline.com", &host),
        )
        .unwrap();
        home
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_pinned_shared_cache_binds_account_realm() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-two/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=vscode-rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ide-token",
                "refresh_token": "vscode-rt-2",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let home = home_with_shared_cache(&server);
        let config = AuthConfiguration {
            environment: mock_environment(&server),
            ..AuthConfiguration::new(AuthType::VsCode)
        };
        let account = Resolver::new(HostProbe::empty().with_home(home.path()))
            .resolve(&config)
            .await
            .unwrap();

        assert_eq!(account.strategy(), StrategyKind::SharedTokenCache);
        assert_eq!(account.tenant_id(), Some("tenant-two"));
        let token = account.token_credential().management_token().await.unwrap();
        assert_eq!(token.token, "ide-token");
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_pinned_shared_cache_refused_refresh_is_login_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-two/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS700082: The refresh token has expired due to inactivity."
            })))
            .mount(&server)
            .await;

        let home = home_with_shared_cache(&server);
        let config = AuthConfiguration {
            environment: mock_environment(&server),
            ..AuthConfiguration::new(AuthType::VsCode)
        };
        let err = Resolver::new(HostProbe::empty().with_home(home.path()))
            .resolve(&config)
            .await
            .unwrap_err();
        match err {
            AuthError::LoginFailure(failure) => {
                assert_eq!(failure.strategy, StrategyKind::SharedTokenCache);
                assert!(failure.reason.contains("AADSTS700082"), "{}", failure.reason);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_availability_is_local() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        let config = AuthConfiguration {
            executor: Some(pool),
            device_code_callback: Some(Arc::new(|_: &crate::auth::DeviceCodeInfo| {})),
            ..AuthConfiguration::default()
        };
        let report = Resolver::new(HostProbe::empty().with_browser(true)).probe_availability(&config);

        let kinds: Vec<StrategyKind> = report.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, StrategyKind::AUTO_ORDER.to_vec());
        assert_eq!(report[2].1, Availability::Available);
        assert!(!report[4].1.is_available());
        assert_eq!(report[5].1, Availability::Available);
    }

    #[test]
    fn test_meta_tenants() {
        assert!(is_meta_tenant("organizations"));
        assert!(is_meta_tenant("Common"));
        assert!(!is_meta_tenant("t1"));
    }
}
