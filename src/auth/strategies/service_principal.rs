//! Service principal: client secret or certificate assertion

use std::fmt;
use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pkcs8::der::Decode;
use pkcs8::EncryptedPrivateKeyInfo;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::{Availability, ResolveContext};
use crate::auth::credential::CachedTokens;
use crate::auth::oauth::{self, ClientAuth};
use crate::auth::{
    AccessToken, AuthConfiguration, AzureEnvironment, CredentialError, TokenCredential,
    TokenRequest,
};

/// Lifetime of a signed client assertion
const ASSERTION_LIFETIME_SECS: i64 = 600;

pub(crate) fn availability(config: &AuthConfiguration) -> Availability {
    let mut missing = Vec::new();
    if config.client().is_none() {
        missing.push("client");
    }
    if config.tenant().is_none() {
        missing.push("tenant");
    }
    if config.key().is_none() && config.certificate().is_none() {
        missing.push("key or certificate");
    }
    if missing.is_empty() {
        Availability::Available
    } else {
        Availability::Unavailable(format!("missing {}", missing.join(", ")))
    }
}

pub(crate) fn build(ctx: &ResolveContext<'_>) -> Result<Arc<dyn TokenCredential>, CredentialError> {
    let config = ctx.config;
    let (Some(client), Some(tenant)) = (config.client(), config.tenant()) else {
        return Err(anyhow!("service principal requires client and tenant").into());
    };

    // Certificate wins when both are configured
    let secret = match (config.certificate(), config.key()) {
        (Some(certificate), _) => ClientSecretKind::Certificate(ClientCertificate::load(
            certificate,
            config.certificate_password(),
        )?),
        (None, Some(key)) => ClientSecretKind::Secret(key.to_string()),
        (None, None) => return Err(anyhow!("service principal requires a key or certificate").into()),
    };

    tracing::debug!(
        "Service principal {} in tenant {} using {}",
        client,
        tenant,
        secret.describe()
    );
    Ok(Arc::new(ServicePrincipalCredential::new(
        ctx.http.clone(),
        config.environment.clone(),
        tenant,
        client,
        secret,
    )))
}

/// How the service principal proves itself.
pub(crate) enum ClientSecretKind {
    Secret(String),
    Certificate(ClientCertificate),
}

impl ClientSecretKind {
    fn describe(&self) -> &'static str {
        match self {
            ClientSecretKind::Secret(_) => "client secret",
            ClientSecretKind::Certificate(_) => "client certificate",
        }
    }
}

/// RSA key and thumbprints from a PEM bundle.
pub(crate) struct ClientCertificate {
    key: EncodingKey,
    x5t: String,
    x5t_s256: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    jti: String,
    nbf: i64,
    iat: i64,
    exp: i64,
}

impl ClientCertificate {
    /// `source` is a PEM file path or inline PEM text holding the
    /// certificate and its private key. An `ENCRYPTED PRIVATE KEY` needs
    /// `password`.
    pub(crate) fn load(source: &str, password: Option<&str>) -> Result<Self> {
        let text = if source.contains("-----BEGIN") {
            source.to_string()
        } else {
            fs::read_to_string(source)
                .with_context(|| format!("Failed to read certificate file {}", source))?
        };
        Self::from_pem(&text, password)
    }

    fn from_pem(text: &str, password: Option<&str>) -> Result<Self> {
        let blocks = pem::parse_many(text).context("Failed to parse certificate PEM")?;

        let certificate = blocks
            .iter()
            .find(|b| b.tag() == "CERTIFICATE")
            .context("No certificate found in PEM")?;

        let key_pem = match blocks.iter().find(|b| b.tag() == "ENCRYPTED PRIVATE KEY") {
            Some(encrypted) => {
                let password = password
                    .context("Private key is encrypted; a certificate password is required")?;
                decrypt_private_key(encrypted, password)?
            }
            None => {
                let key_block = blocks
                    .iter()
                    .find(|b| b.tag() == "PRIVATE KEY" || b.tag() == "RSA PRIVATE KEY")
                    .context("No private key found in PEM")?;
                if password.is_some() {
                    tracing::debug!("Private key is not encrypted; ignoring certificate password");
                }
                pem::encode(key_block)
            }
        };

        let key = EncodingKey::from_rsa_pem(key_pem.as_bytes())
            .context("Failed to parse certificate private key")?;

        let b64 = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        Ok(Self {
            key,
            x5t: b64.encode(Sha1::digest(certificate.contents())),
            x5t_s256: b64.encode(Sha256::digest(certificate.contents())),
        })
    }

    /// Signed JWT proving possession of the key to `audience` (the token endpoint).
    fn assertion(&self, client_id: &str, audience: &str) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.x5t = Some(self.x5t.clone());
        header.x5t_s256 = Some(self.x5t_s256.clone());

        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            aud: audience,
            iss: client_id,
            sub: client_id,
            jti: uuid::Uuid::new_v4().to_string(),
            nbf: now,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.key).context("Failed to sign client assertion")
    }
}

/// Decrypt a PKCS#8 `ENCRYPTED PRIVATE KEY` block into a plain `PRIVATE KEY` PEM.
fn decrypt_private_key(block: &pem::Pem, password: &str) -> Result<String> {
    let info = EncryptedPrivateKeyInfo::from_der(block.contents())
        .map_err(|e| anyhow!("Malformed encrypted private key: {}", e))?;
    let document = info
        .decrypt(password)
        .map_err(|e| anyhow!("Failed to decrypt private key (wrong certificate password?): {}", e))?;
    Ok(pem::encode(&pem::Pem::new("PRIVATE KEY", document.as_bytes())))
}

/// Confidential client credential for one tenant.
pub(crate) struct ServicePrincipalCredential {
    http: reqwest::Client,
    environment: AzureEnvironment,
    tenant: String,
    client_id: String,
    secret: ClientSecretKind,
    tokens: CachedTokens,
}

impl ServicePrincipalCredential {
    pub(crate) fn new(
        http: reqwest::Client,
        environment: AzureEnvironment,
        tenant: &str,
        client_id: &str,
        secret: ClientSecretKind,
    ) -> Self {
        Self {
            http,
            environment,
            tenant: tenant.to_string(),
            client_id: client_id.to_string(),
            secret,
            tokens: CachedTokens::default(),
        }
    }
}

impl fmt::Debug for ServicePrincipalCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalCredential")
            .field("environment", &self.environment.name())
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field("secret", &self.secret.describe())
            .finish()
    }
}

#[async_trait]
impl TokenCredential for ServicePrincipalCredential {
    async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, CredentialError> {
        // A service principal lives in one tenant; foreign tenants are not supported
        let tenant = self.tenant.as_str();
        self.tokens
            .get_or_fetch(request, || async {
                let auth = match &self.secret {
                    ClientSecretKind::Secret(secret) => ClientAuth::Secret(secret),
                    ClientSecretKind::Certificate(certificate) => ClientAuth::Assertion(
                        certificate
                            .assertion(&self.client_id, &self.environment.token_url(tenant))?,
                    ),
                };
                let token = oauth::client_credentials(
                    &self.http,
                    &self.environment,
                    tenant,
                    &self.client_id,
                    auth,
                    &request.scopes,
                )
                .await?;
                Ok(token)
            })
            .await
    }

    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant)
    }
}
