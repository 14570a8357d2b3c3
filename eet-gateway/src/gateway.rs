//! The gateway core.
//!
//! [`GatewayCore`] ties the credential vault, the request pipeline and the
//! authority transport together. Every operation takes a
//! [`CancellationToken`]; once it fires, pending reads and network I/O are
//! abandoned and the operation returns [`GatewayError::Cancelled`]. Vault
//! writes check the token before they start and then run to completion.
//!
//! # Sale pipeline
//!
//! ```text
//! validate ─▶ vault.get ─▶ stamp (pkp, bkp) ─▶ envelope ─▶ sign ─▶ send ─▶ verify
//! ```
//!
//! A sale is never resent automatically.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    certs::{PinnedRoots, parse_merchant_pkcs12},
    error::{GatewayError, PingError, Result},
    sale::{Sale, codes},
    soap::{Response, ResponseVerifier, build_envelope, sign},
    transport::AuthorityTransport,
    vault::{CredentialVault, KeyValueStore},
};

/// Runs `operation` unless `cancel` fires first.
async fn cancellable<T, F>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GatewayError::Cancelled),
        result = operation => result,
    }
}

/// Starts `write` only if `cancel` has not fired.
///
/// A started write is never dropped: Redis may already have applied its
/// `EXEC` when the future goes away.
async fn committing<T, F>(cancel: &CancellationToken, write: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(GatewayError::Cancelled);
    }
    write.await
}

fn request_build(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::RequestBuild(err.to_string())
}

/// Orchestrates sale submissions and credential management.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use eet_gateway::{
///     certs::PinnedRoots,
///     gateway::GatewayCore,
///     soap::ResponseVerifier,
///     transport::{HttpTransport, PLAYGROUND_URL},
///     vault::{CredentialVault, MemoryStore},
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(merchant_roots: PinnedRoots, authority_roots: PinnedRoots) -> eet_gateway::error::Result<()> {
/// let transport = HttpTransport::new(PLAYGROUND_URL.parse().unwrap())?;
/// let verifier = ResponseVerifier::new(Arc::new(authority_roots), "Česká republika - Generální finanční ředitelství");
/// let gateway = GatewayCore::new(CredentialVault::new(MemoryStore::new()), transport, merchant_roots, verifier);
///
/// gateway.ping(&CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GatewayCore<S, T> {
    vault: CredentialVault<S>,
    transport: T,
    merchant_roots: PinnedRoots,
    verifier: ResponseVerifier,
}

impl<S: KeyValueStore, T: AuthorityTransport> GatewayCore<S, T> {
    /// Assembles a gateway.
    ///
    /// `merchant_roots` gate [`store_cert`](Self::store_cert); `verifier`
    /// checks every authority response.
    pub fn new(
        vault: CredentialVault<S>,
        transport: T,
        merchant_roots: PinnedRoots,
        verifier: ResponseVerifier,
    ) -> Self {
        Self { vault, transport, merchant_roots, verifier }
    }

    /// The credential vault.
    pub fn vault(&self) -> &CredentialVault<S> {
        &self.vault
    }

    /// The authority transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Probes the authority and the vault concurrently.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Ping`] holding every failing probe.
    #[instrument(skip_all)]
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let (authority, vault) = cancellable(cancel, async {
            Ok(tokio::join!(self.transport.ping(), self.vault.ping()))
        })
        .await?;

        let errors: Vec<GatewayError> = [authority.err().map(GatewayError::from), vault.err().map(GatewayError::from)]
            .into_iter()
            .flatten()
            .collect();

        match PingError::from_errors(errors) {
            Some(err) => {
                warn!(error = %err, "health check failed");
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    /// Registers one sale with the authority.
    ///
    /// Absent `dat_odesl`/`dat_trzby` are set to now; `pkp` and `bkp` are
    /// always recomputed. A rejection by the authority is a successful call
    /// whose [`Response::error`] is set.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidSale`] if a field violates a registry constraint
    /// - [`GatewayError::CertNotFound`] / [`GatewayError::BadCertPassword`] from the vault
    /// - [`GatewayError::RequestBuild`] if signing fails
    /// - [`GatewayError::AuthorityUnreachable`] on transport failure
    /// - [`GatewayError::ResponseParse`] / [`GatewayError::ResponseVerify`] for bad answers
    #[instrument(skip(self, cancel, password, sale), fields(uuid = %sale.uuid_zpravy))]
    pub async fn send_sale(
        &self,
        cancel: &CancellationToken,
        cert_id: &str,
        password: &[u8],
        mut sale: Sale,
    ) -> Result<Response> {
        sale.fill_defaults();
        sale.validate()?;

        let pair = cancellable(cancel, async { Ok(self.vault.get(cert_id, password).await?) }).await?;

        codes::stamp(&mut sale, pair.private_key()).map_err(request_build)?;
        let cert_der = pair.certificate_der().map_err(request_build)?;
        let envelope = build_envelope(&sale, &cert_der).map_err(request_build)?;
        let signed = sign(&envelope, pair.private_key()).map_err(request_build)?;
        drop(pair);

        let body = cancellable(cancel, async { Ok(self.transport.send(signed.as_bytes()).await?) }).await?;

        let response = self.verifier.verify(&body, sale.uuid_zpravy)?;
        match (&response.confirmation, &response.error) {
            (Some(confirmation), _) => {
                info!(fik = %confirmation.fik, test = confirmation.test, warnings = response.warnings.len(), "sale registered");
            }
            (None, Some(rejection)) => {
                warn!(kod = rejection.kod, message = %rejection.message, "sale rejected by authority");
            }
            (None, None) => {}
        }
        Ok(response)
    }

    /// Imports a merchant PKCS#12 bundle and stores it sealed under `password`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidMerchantCert`] if the bundle is rejected,
    /// [`GatewayError::IdExists`] if `cert_id` is taken.
    #[instrument(skip(self, cancel, password, pkcs12, pkcs12_password), fields(bundle_len = pkcs12.len()))]
    pub async fn store_cert(
        &self,
        cancel: &CancellationToken,
        cert_id: &str,
        password: &[u8],
        pkcs12: &[u8],
        pkcs12_password: &str,
    ) -> Result<()> {
        let pair = parse_merchant_pkcs12(pkcs12, pkcs12_password, &self.merchant_roots)?;
        committing(cancel, async { Ok(self.vault.store(cert_id, password, &pair).await?) }).await?;
        info!("merchant certificate stored");
        Ok(())
    }

    /// Lists stored identifiers.
    #[instrument(skip(self, cancel))]
    pub async fn list_cert_ids(&self, cancel: &CancellationToken, offset: usize, limit: usize) -> Result<Vec<String>> {
        cancellable(cancel, async { Ok(self.vault.list(offset, limit).await?) }).await
    }

    /// Renames a stored identifier.
    ///
    /// # Errors
    ///
    /// [`GatewayError::CertNotFound`], [`GatewayError::IdExists`] or
    /// [`GatewayError::MaxAttempts`].
    #[instrument(skip(self, cancel))]
    pub async fn update_cert_id(&self, cancel: &CancellationToken, old_id: &str, new_id: &str) -> Result<()> {
        committing(cancel, async { Ok(self.vault.update_id(old_id, new_id).await?) }).await
    }

    /// Re-seals a stored key pair under a new password.
    ///
    /// # Errors
    ///
    /// [`GatewayError::CertNotFound`], [`GatewayError::BadCertPassword`] or
    /// [`GatewayError::MaxAttempts`].
    #[instrument(skip(self, cancel, old_password, new_password))]
    pub async fn update_cert_password(
        &self,
        cancel: &CancellationToken,
        cert_id: &str,
        old_password: &[u8],
        new_password: &[u8],
    ) -> Result<()> {
        committing(cancel, async {
            Ok(self.vault.update_password(cert_id, old_password, new_password).await?)
        })
        .await
    }

    /// Deletes a stored key pair.
    ///
    /// # Errors
    ///
    /// [`GatewayError::CertNotFound`].
    #[instrument(skip(self, cancel))]
    pub async fn delete_id(&self, cancel: &CancellationToken, cert_id: &str) -> Result<()> {
        committing(cancel, async { Ok(self.vault.delete(cert_id).await?) }).await
    }
}
