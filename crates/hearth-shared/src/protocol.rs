use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_FRAME_SIZE;
use crate::crypto::CipherParams;
use crate::error::ProtocolError;
use crate::identity::Certificate;
use crate::types::ResultCode;

/// Whether the server already knows the connecting user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserStatus {
    New,
    Existing,
}

/// One `(domain, ciphertext, params)` triple of a batched submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedUpload {
    pub domain: String,
    pub ciphertext: Vec<u8>,
    pub params: CipherParams,
}

/// A domain the caller's device belongs to, with the caller's wrapped key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainKeyEntry {
    pub domain: String,
    pub wrapped_key: Vec<u8>,
}

/// One device's latest reading, with the parameters that decrypt it.
/// Returned as an ordered list so ciphertext and params can never
/// desynchronize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceReading {
    pub device: String,
    pub ciphertext: Vec<u8>,
    pub params: CipherParams,
}

/// Client-to-server messages, one variant per protocol step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    // -- authentication --
    /// Open the identity phase.
    Hello { user_id: String },
    /// New-user branch: echo the challenge nonce, present a certificate,
    /// prove possession of its signing key.
    ProveNewUser {
        nonce: u64,
        certificate: Certificate,
        signature: Vec<u8>,
    },
    /// Existing-user branch: signature over the challenge nonce.
    ProveExistingUser { signature: Vec<u8> },
    /// Echo of the out-of-band one-time code.
    SubmitOtp { code: String },
    /// After an OTP mismatch: restart both phases with a fresh nonce.
    RetryAuth,
    /// After an OTP mismatch: give up; the attempt fails terminally.
    AbortAuth,
    /// Claim the `(user, device)` session slot.
    RegisterSession { device_id: String },
    /// SHA-256 over (nonce_be || executable bytes).
    AttestExecutable { digest: Vec<u8> },
    /// Final acknowledgment after a failed attestation.
    AttestAck,

    // -- commands --
    CreateDomain { domain: String },
    AddUser {
        user_id: String,
        domain: String,
        wrapped_key: Vec<u8>,
    },
    RegisterDevice { domain: String },
    PushTemperatures { entries: Vec<EncryptedUpload> },
    PushImages { entries: Vec<EncryptedUpload> },
    GetTemperatures { domain: String },
    GetImage { user_id: String, device_id: String },
    /// Domains containing the caller's authenticated `user:device` pair.
    GetMyDomains,
    GetCertificate { user_id: String },
    Bye,
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Identity challenge: user status plus a fresh nonce to sign.
    Challenge { status: UserStatus, nonce: u64 },
    /// Outcome of an identity proof or OTP echo (`Ok` / `Error`).
    AuthResult { code: ResultCode },
    /// Session slot granted; nonce for executable attestation.
    SessionGranted { nonce: u64 },
    /// Session slot already active for this `(user, device)` pair.
    SessionDenied,
    /// Outcome of executable attestation (`OkTested` / `NokTested`).
    AttestResult { code: ResultCode },
    /// Generic command outcome.
    Ack { code: ResultCode },
    CertificateFor { certificate: Certificate },
    Domains { entries: Vec<DomainKeyEntry> },
    Temperatures {
        wrapped_key: Vec<u8>,
        readings: Vec<DeviceReading>,
    },
    ImageData {
        wrapped_key: Vec<u8>,
        ciphertext: Vec<u8>,
        params: CipherParams,
    },
    Goodbye,
}

/// Write one length-prefixed bincode frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed bincode frame.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceIdentity;
    use crate::types::UserId;

    #[tokio::test]
    async fn test_request_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let msg = Request::AddUser {
            user_id: "bob".into(),
            domain: "home".into(),
            wrapped_key: vec![1, 2, 3, 4],
        };
        write_frame(&mut client, &msg).await.unwrap();

        let decoded: Request = read_frame(&mut server).await.unwrap();
        match decoded {
            Request::AddUser {
                user_id,
                domain,
                wrapped_key,
            } => {
                assert_eq!(user_id, "bob");
                assert_eq!(domain, "home");
                assert_eq!(wrapped_key, vec![1, 2, 3, 4]);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_with_certificate() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let cert = DeviceIdentity::generate().certificate(&UserId::from("alice"));
        let msg = Response::CertificateFor {
            certificate: cert.clone(),
        };
        write_frame(&mut server, &msg).await.unwrap();

        let decoded: Response = read_frame(&mut client).await.unwrap();
        match decoded {
            Response::CertificateFor { certificate } => assert_eq!(certificate, cert),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_stream_reports_connection_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_frame::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        tokio::spawn(async move {
            // hand-written header claiming a frame far past the limit
            let _ = client.write_u32(u32::MAX).await;
        });

        let err = read_frame::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
    }
}
