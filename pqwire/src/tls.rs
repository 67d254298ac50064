//! TLS client configuration.
//!
//! Certificates and keys are read from the paths in [`Options`], falling back
//! to `~/.postgresql/{root.crt, root.crl, postgresql.crt, postgresql.key}`
//! when present.
use std::{fs::File, io::BufReader, path::{Path, PathBuf}, sync::Arc};

use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::{CryptoProvider, ring},
    pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer, ServerName, UnixTime},
};

use crate::{
    Result,
    common::verbose,
    options::{ConfigError, Options, SslMode},
};

/// Build a client config for the [`SslMode`] in `options`.
pub fn client_config(options: &Options) -> Result<ClientConfig> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let mode = options.ssl_mode();
    verbose!(?mode, "building tls config");

    let builder = match mode {
        SslMode::Require => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider })),
        SslMode::VerifyCa => {
            let inner = webpki_verifier(options, provider)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(IgnoreHostname { inner }))
        },
        SslMode::VerifyFull => builder.with_webpki_verifier(webpki_verifier(options, provider)?),
    };

    let config = match client_identity(options)? {
        Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

/// Server name for SNI and certificate verification.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ConfigError> {
    ServerName::try_from(host.to_owned())
        .map_err(|_| ConfigError::new(format!("invalid tls server name `{host}`")))
}

/// `~/.postgresql/<name>`
fn default_file(name: &str) -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".postgresql").join(name))
}

/// Path from option, or the default file if it exists.
///
/// A path named in options that does not exist is an error.
fn resolve(options: &Options, key: &str, default: &str) -> Result<Option<PathBuf>, ConfigError> {
    match options.get(key) {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(ConfigError::new(format!("{key} file `{}` not found", path.display())));
            }
            Ok(Some(path))
        },
        None => Ok(default_file(default).filter(|e| e.is_file())),
    }
}

fn open(path: &Path) -> Result<BufReader<File>, ConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ConfigError::new(format!("failed to open `{}`: {e}", path.display())))
}

fn root_store(options: &Options) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();

    let Some(path) = resolve(options, Options::SSLROOTCERT, "root.crt")? else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    for cert in rustls_pemfile::certs(&mut open(&path)?) {
        let cert = cert.map_err(|e| ConfigError::new(format!("invalid certificate in `{}`: {e}", path.display())))?;
        roots
            .add(cert)
            .map_err(|e| ConfigError::new(format!("invalid root certificate in `{}`: {e}", path.display())))?;
    }

    if roots.is_empty() {
        return Err(ConfigError::new(format!("no certificate found in `{}`", path.display())));
    }

    Ok(roots)
}

fn crls(options: &Options) -> Result<Vec<CertificateRevocationListDer<'static>>, ConfigError> {
    let Some(path) = resolve(options, Options::SSLCRL, "root.crl")? else {
        return Ok(vec![]);
    };
    rustls_pemfile::crls(&mut open(&path)?)
        .collect::<Result<_, _>>()
        .map_err(|e| ConfigError::new(format!("invalid crl in `{}`: {e}", path.display())))
}

fn webpki_verifier(options: &Options, provider: Arc<CryptoProvider>) -> Result<Arc<WebPkiServerVerifier>> {
    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(root_store(options)?), provider)
        .with_crls(crls(options)?)
        .build()
        .map_err(|e| ConfigError::new(format!("failed to build certificate verifier: {e}")))?;
    Ok(verifier)
}

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn client_identity(options: &Options) -> Result<Option<Identity>, ConfigError> {
    let cert = resolve(options, Options::SSLCERT, "postgresql.crt")?;
    let key = resolve(options, Options::SSLKEY, "postgresql.key")?;

    let (Some(cert), Some(key)) = (cert, key) else {
        return Ok(None);
    };

    let certs = rustls_pemfile::certs(&mut open(&cert)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::new(format!("invalid certificate in `{}`: {e}", cert.display())))?;

    let key = rustls_pemfile::private_key(&mut open(&key)?)
        .map_err(|e| ConfigError::new(format!("invalid private key in `{}`: {e}", key.display())))?
        .ok_or_else(|| ConfigError::new(format!("no private key found in `{}`", key.display())))?;

    Ok(Some((certs, key)))
}

/// Accept any server certificate, `sslmode=require`.
///
/// Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Verify certificate chain but not the host name, `sslmode=verify-ca`.
#[derive(Debug)]
struct IgnoreHostname {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for IgnoreHostname {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            result => result,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn require_accepts_any_certificate() {
        let verifier = AcceptAnyCert { provider: Arc::new(ring::default_provider()) };
        let cert = CertificateDer::from(vec![0u8; 8]);
        let name = server_name("localhost").unwrap();
        assert!(verifier.verify_server_cert(&cert, &[], &name, &[], UnixTime::now()).is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn require_config_builds() {
        let options = Options::new().set(Options::SSLMODE, "require");
        assert!(client_config(&options).is_ok());
    }

    #[test]
    fn missing_named_file_is_config_error() {
        let options = Options::new()
            .set(Options::SSLMODE, "verify-full")
            .set(Options::SSLROOTCERT, "/nonexistent/root.crt");
        let err = client_config(&options).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)));
    }

    #[test]
    fn server_name_accepts_ip() {
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("db.example.com").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
