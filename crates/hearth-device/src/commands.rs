//! Domain commands over an authenticated connection.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use hearth_shared::crypto::{self, SymmetricKey};
use hearth_shared::envelope::{unwrap_key, wrap_key};
use hearth_shared::identity::{Certificate, DeviceIdentity};
use hearth_shared::protocol::{
    read_frame, write_frame, DomainKeyEntry, EncryptedUpload, Request, Response,
};
use hearth_shared::types::{ResultCode, UserId};
use hearth_shared::ProtocolError;

use crate::error::DeviceError;
use crate::keystore::KeyParamsStore;

/// An authenticated device connection plus the local key material the
/// commands need. Certificates fetched from the server are cached for the
/// lifetime of the session.
#[derive(Debug)]
pub struct DeviceSession<T> {
    stream: T,
    identity: DeviceIdentity,
    params: KeyParamsStore,
    cert_cache: HashMap<UserId, Certificate>,
}

impl<T> DeviceSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: T, identity: DeviceIdentity, params: KeyParamsStore) -> Self {
        Self {
            stream,
            identity,
            params,
            cert_cache: HashMap::new(),
        }
    }

    async fn expect_ack(&mut self) -> Result<ResultCode, DeviceError> {
        match read_frame(&mut self.stream).await? {
            Response::Ack { code } => Ok(code),
            _ => Err(ProtocolError::Unexpected { expected: "Ack" }.into()),
        }
    }

    fn ok_or_rejected(code: ResultCode) -> Result<(), DeviceError> {
        if code.is_ok() {
            Ok(())
        } else {
            Err(DeviceError::Rejected(code))
        }
    }

    // ------------------------------------------------------------------
    // Domain management
    // ------------------------------------------------------------------

    pub async fn create_domain(&mut self, domain: &str) -> Result<(), DeviceError> {
        write_frame(&mut self.stream, &Request::CreateDomain { domain: domain.into() }).await?;
        let code = self.expect_ack().await?;
        Self::ok_or_rejected(code)
    }

    /// Add `target` to `domain`. The domain key is derived locally from the
    /// password (reusing recorded salt/iterations so every member ends up
    /// with the same key material), wrapped under the target's public key,
    /// and only the wrapped bytes leave this process.
    pub async fn add_user(
        &mut self,
        target: &UserId,
        domain: &str,
        domain_password: &str,
    ) -> Result<(), DeviceError> {
        let certificate = self.fetch_certificate(target).await?;

        let (salt, iterations) = match self.params.lookup(domain)? {
            Some(recorded) => recorded,
            None => (crypto::generate_salt().to_vec(), crypto::generate_iterations()),
        };
        let domain_key = crypto::derive_key(domain_password, &salt, iterations);
        let wrapped_key = wrap_key(&certificate.exchange_key, &domain_key)?;

        write_frame(
            &mut self.stream,
            &Request::AddUser {
                user_id: target.to_string(),
                domain: domain.into(),
                wrapped_key,
            },
        )
        .await?;
        let code = self.expect_ack().await?;
        Self::ok_or_rejected(code)?;

        // only remember parameters that produced an accepted key
        self.params.record(domain, &salt, iterations)?;
        Ok(())
    }

    async fn fetch_certificate(&mut self, user: &UserId) -> Result<Certificate, DeviceError> {
        if let Some(cached) = self.cert_cache.get(user) {
            return Ok(cached.clone());
        }
        write_frame(
            &mut self.stream,
            &Request::GetCertificate { user_id: user.to_string() },
        )
        .await?;
        match read_frame(&mut self.stream).await? {
            Response::CertificateFor { certificate } => {
                debug!(user = %user, "fetched certificate");
                self.cert_cache.insert(user.clone(), certificate.clone());
                Ok(certificate)
            }
            Response::Ack { code } => Err(DeviceError::Rejected(code)),
            _ => Err(ProtocolError::Unexpected { expected: "CertificateFor" }.into()),
        }
    }

    pub async fn register_device(&mut self, domain: &str) -> Result<(), DeviceError> {
        write_frame(&mut self.stream, &Request::RegisterDevice { domain: domain.into() }).await?;
        let code = self.expect_ack().await?;
        Self::ok_or_rejected(code)
    }

    /// Domains containing this device, with this user's wrapped key in each.
    pub async fn my_domains(&mut self) -> Result<Vec<DomainKeyEntry>, DeviceError> {
        write_frame(&mut self.stream, &Request::GetMyDomains).await?;
        match read_frame(&mut self.stream).await? {
            Response::Domains { entries } => Ok(entries),
            Response::Ack { code } => Err(DeviceError::Rejected(code)),
            _ => Err(ProtocolError::Unexpected { expected: "Domains" }.into()),
        }
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Encrypt `payload` once per domain membership and upload the batch.
    async fn push_payload(
        &mut self,
        payload: &[u8],
        image: bool,
    ) -> Result<(), DeviceError> {
        let domains = self.my_domains().await?;

        let mut entries = Vec::with_capacity(domains.len());
        for entry in domains {
            let key: SymmetricKey =
                unwrap_key(self.identity.exchange_secret(), &entry.wrapped_key)?;
            let (ciphertext, params) = crypto::encrypt(&key, payload)?;
            entries.push(EncryptedUpload {
                domain: entry.domain,
                ciphertext,
                params,
            });
        }

        let request = if image {
            Request::PushImages { entries }
        } else {
            Request::PushTemperatures { entries }
        };
        write_frame(&mut self.stream, &request).await?;
        let code = self.expect_ack().await?;
        Self::ok_or_rejected(code)
    }

    /// Submit a temperature reading to every domain this device belongs to.
    /// The f32 bit pattern survives the pipeline exactly.
    pub async fn push_temperature(&mut self, value: f32) -> Result<(), DeviceError> {
        self.push_payload(&value.to_be_bytes(), false).await
    }

    pub async fn push_image(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.push_payload(bytes, true).await
    }

    /// Latest temperature of every device in `domain`, decrypted locally.
    pub async fn get_temperatures(
        &mut self,
        domain: &str,
    ) -> Result<Vec<(String, f32)>, DeviceError> {
        write_frame(&mut self.stream, &Request::GetTemperatures { domain: domain.into() }).await?;
        let (wrapped_key, readings) = match read_frame(&mut self.stream).await? {
            Response::Temperatures {
                wrapped_key,
                readings,
            } => (wrapped_key, readings),
            Response::Ack { code } => return Err(DeviceError::Rejected(code)),
            _ => return Err(ProtocolError::Unexpected { expected: "Temperatures" }.into()),
        };

        let key = unwrap_key(self.identity.exchange_secret(), &wrapped_key)?;
        let mut out = Vec::with_capacity(readings.len());
        for reading in readings {
            let plain = crypto::decrypt(&key, &reading.ciphertext, &reading.params)?;
            let bits: [u8; 4] = plain.as_slice().try_into().map_err(|_| {
                DeviceError::MalformedPayload(format!(
                    "temperature from {} is {} bytes, expected 4",
                    reading.device,
                    plain.len()
                ))
            })?;
            out.push((reading.device, f32::from_be_bytes(bits)));
        }
        Ok(out)
    }

    /// Latest image of `user:device`, decrypted locally.
    pub async fn get_image(
        &mut self,
        user: &str,
        device: &str,
    ) -> Result<Vec<u8>, DeviceError> {
        write_frame(
            &mut self.stream,
            &Request::GetImage {
                user_id: user.into(),
                device_id: device.into(),
            },
        )
        .await?;
        let (wrapped_key, ciphertext, params) = match read_frame(&mut self.stream).await? {
            Response::ImageData {
                wrapped_key,
                ciphertext,
                params,
            } => (wrapped_key, ciphertext, params),
            Response::Ack { code } => return Err(DeviceError::Rejected(code)),
            _ => return Err(ProtocolError::Unexpected { expected: "ImageData" }.into()),
        };

        let key = unwrap_key(self.identity.exchange_secret(), &wrapped_key)?;
        Ok(crypto::decrypt(&key, &ciphertext, &params)?)
    }

    /// Leave cleanly; the server releases the device session slot.
    pub async fn bye(mut self) -> Result<(), DeviceError> {
        write_frame(&mut self.stream, &Request::Bye).await?;
        match read_frame(&mut self.stream).await? {
            Response::Goodbye => Ok(()),
            _ => Err(ProtocolError::Unexpected { expected: "Goodbye" }.into()),
        }
    }
}
