//! Connection pool construction for target environments.

use crate::config::DatabaseConfig;
use crate::error::{MorphError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

/// Connection timeout for new pool clients.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Recognized `ssl_mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    Disable,
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for TlsMode {
    type Err = MorphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(MorphError::Config(format!(
                "unknown ssl_mode '{}' (expected disable, require, verify-ca, or verify-full)",
                other
            ))),
        }
    }
}

/// Build a connection pool for an environment and verify it with a probe
/// query.
pub async fn build_pool(config: &DatabaseConfig, max_conns: usize) -> Result<Pool> {
    let mode: TlsMode = config.ssl_mode.parse()?;

    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match mode {
        TlsMode::Disable => {
            warn!("TLS disabled; credentials travel in plaintext");
            Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
        }
        mode => {
            let connector = MakeRustlsConnect::new(tls_client_config(mode));
            Manager::from_config(pg_config, connector, mgr_config)
        }
    };

    let pool = Pool::builder(mgr)
        .max_size(max_conns)
        .build()
        .map_err(|e| MorphError::pool(e, "creating connection pool"))?;

    // Probe before handing the pool out.
    let client = pool
        .get()
        .await
        .map_err(|e| MorphError::pool(e, "testing connection"))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to PostgreSQL: {}:{}/{}",
        config.host, config.port, config.database
    );

    Ok(pool)
}

fn tls_client_config(mode: TlsMode) -> ClientConfig {
    if mode == TlsMode::Require {
        // Encrypted channel without identity verification.
        warn!("ssl_mode=require encrypts the connection but does not verify the server certificate");
        return ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(IdentityUnverified::with_default_provider()))
            .with_no_client_auth();
    }

    info!("server certificate verification enabled");
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Verifier backing `ssl_mode=require`: handshake signatures are still
/// checked against the crypto provider, but the certificate chain and the
/// server's identity are taken on trust.
#[derive(Debug)]
struct IdentityUnverified {
    provider: CryptoProvider,
}

impl IdentityUnverified {
    fn with_default_provider() -> Self {
        Self {
            provider: rustls::crypto::aws_lc_rs::default_provider(),
        }
    }
}

impl ServerCertVerifier for IdentityUnverified {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
