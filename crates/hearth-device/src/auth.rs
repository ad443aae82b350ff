//! Device half of the authentication handshake.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use hearth_shared::crypto::attestation_digest;
use hearth_shared::identity::DeviceIdentity;
use hearth_shared::protocol::{read_frame, write_frame, Request, Response, UserStatus};
use hearth_shared::types::{ResultCode, UserId};
use hearth_shared::ProtocolError;

use crate::error::DeviceError;

/// Where the one-time code and the retry decision come from. The CLI reads
/// stdin; tests script the answers.
pub trait OtpPrompt {
    fn code(&mut self) -> String;
    /// After a mismatch: `true` to restart both phases, `false` to give up.
    fn retry(&mut self) -> bool;
}

/// Run the full three-phase handshake against an open stream.
pub async fn authenticate<T, P>(
    stream: &mut T,
    identity: &DeviceIdentity,
    user_id: &UserId,
    device_id: &str,
    executable: &[u8],
    prompt: &mut P,
) -> Result<(), DeviceError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    P: OtpPrompt,
{
    // Identity + one-time code, repeated together until the code matches.
    loop {
        write_frame(stream, &Request::Hello { user_id: user_id.to_string() }).await?;

        let (status, nonce) = match read_frame(stream).await? {
            Response::Challenge { status, nonce } => (status, nonce),
            _ => return Err(ProtocolError::Unexpected { expected: "Challenge" }.into()),
        };
        debug!(nonce, ?status, "received identity challenge");

        let signature = identity.sign_nonce(nonce);
        let proof = match status {
            UserStatus::New => Request::ProveNewUser {
                nonce,
                certificate: identity.certificate(user_id),
                signature,
            },
            UserStatus::Existing => Request::ProveExistingUser { signature },
        };
        write_frame(stream, &proof).await?;

        match read_frame(stream).await? {
            Response::AuthResult { code: ResultCode::Ok } => {}
            Response::AuthResult { code } => return Err(DeviceError::AuthRejected(code)),
            _ => return Err(ProtocolError::Unexpected { expected: "AuthResult" }.into()),
        }

        write_frame(stream, &Request::SubmitOtp { code: prompt.code() }).await?;
        match read_frame(stream).await? {
            Response::AuthResult { code: ResultCode::Ok } => break,
            Response::AuthResult { .. } => {
                if prompt.retry() {
                    write_frame(stream, &Request::RetryAuth).await?;
                    continue;
                }
                write_frame(stream, &Request::AbortAuth).await?;
                return Err(DeviceError::Aborted);
            }
            _ => return Err(ProtocolError::Unexpected { expected: "AuthResult" }.into()),
        }
    }

    // Device session + executable attestation.
    write_frame(stream, &Request::RegisterSession { device_id: device_id.to_string() }).await?;
    let nonce = match read_frame(stream).await? {
        Response::SessionGranted { nonce } => nonce,
        Response::SessionDenied => return Err(DeviceError::SessionDenied),
        _ => return Err(ProtocolError::Unexpected { expected: "SessionGranted" }.into()),
    };

    let digest = attestation_digest(nonce, executable).to_vec();
    write_frame(stream, &Request::AttestExecutable { digest }).await?;

    match read_frame(stream).await? {
        Response::AttestResult { code: ResultCode::OkTested } => {
            info!(user = %user_id, device = %device_id, "authenticated");
            Ok(())
        }
        Response::AttestResult { .. } => {
            write_frame(stream, &Request::AttestAck).await?;
            Err(DeviceError::AttestationFailed)
        }
        _ => Err(ProtocolError::Unexpected { expected: "AttestResult" }.into()),
    }
}
