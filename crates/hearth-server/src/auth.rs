//! The authentication protocol state machine.
//!
//! Every connection passes through three phases before a command is
//! accepted: an identity proof (signature over a fresh nonce, with a
//! certificate presented on first contact), an out-of-band one-time code,
//! and device/executable attestation. A failed code restarts the identity
//! phase with a fresh nonce; every other verification failure is terminal
//! for the connection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use hearth_shared::crypto::{self, attestation_digest, codes_match};
use hearth_shared::protocol::{read_frame, write_frame, Request, Response, UserStatus};
use hearth_shared::types::{DeviceAddr, ResultCode, UserId};
use hearth_shared::ProtocolError;
use hearth_store::layout::validate_component;
use hearth_store::{LocalInfoFile, UserRecord};

use crate::error::ServerError;
use crate::otp::OtpSender;
use crate::registry::{DeviceGuard, SharedState};

/// A fully authenticated connection: verified user plus the claimed device
/// session slot (released when the guard drops).
pub struct SessionIdentity {
    pub user: UserRecord,
    pub guard: DeviceGuard,
}

impl SessionIdentity {
    pub fn addr(&self) -> &DeviceAddr {
        self.guard.addr()
    }
}

enum OtpOutcome {
    Verified,
    Retry,
    Aborted,
}

/// Run the full handshake. `Ok(None)` is a rejection that was already
/// communicated to the peer; `Err` is a transport or protocol failure.
pub async fn authenticate<T, S>(
    stream: &mut T,
    state: &Arc<SharedState>,
    otp: &S,
    localinfo: &LocalInfoFile,
) -> Result<Option<SessionIdentity>, ServerError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: OtpSender,
{
    // Phases 1 + 2 repeat together: a rejected one-time code forces a fresh
    // nonce/signature round, not just a fresh code.
    let user = loop {
        let Some(user) = identity_phase(stream, state).await? else {
            return Ok(None);
        };
        match otp_phase(stream, otp, &user.user_id).await? {
            OtpOutcome::Verified => break user,
            OtpOutcome::Retry => continue,
            OtpOutcome::Aborted => return Ok(None),
        }
    };

    attestation_phase(stream, state, localinfo, user).await
}

async fn identity_phase<T>(
    stream: &mut T,
    state: &Arc<SharedState>,
) -> Result<Option<UserRecord>, ServerError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let user_id = match read_frame(stream).await? {
        Request::Hello { user_id } => user_id,
        _ => return Err(ProtocolError::Unexpected { expected: "Hello" }.into()),
    };

    if validate_component(&user_id).is_err() {
        warn!(user = %user_id, "rejecting unusable user id");
        write_frame(stream, &Response::AuthResult { code: ResultCode::Error }).await?;
        return Ok(None);
    }
    let user_id = UserId(user_id);

    let known = state.lookup_user(&user_id);
    let nonce = crypto::generate_nonce();
    let status = if known.is_some() {
        UserStatus::Existing
    } else {
        UserStatus::New
    };
    write_frame(stream, &Response::Challenge { status, nonce }).await?;

    match (read_frame(stream).await?, known) {
        (
            Request::ProveNewUser {
                nonce: echoed,
                certificate,
                signature,
            },
            None,
        ) => {
            // The echoed nonce guards against a replayed "new user" branch
            // carrying a signature over some other challenge.
            if echoed != nonce {
                warn!(user = %user_id, "nonce echo mismatch");
                write_frame(stream, &Response::AuthResult { code: ResultCode::Error }).await?;
                return Ok(None);
            }
            if certificate.user_id != user_id
                || certificate.verify_nonce(nonce, &signature).is_err()
            {
                warn!(user = %user_id, "new-user signature rejected");
                write_frame(stream, &Response::AuthResult { code: ResultCode::Error }).await?;
                return Ok(None);
            }

            let record = UserRecord {
                user_id: user_id.clone(),
                certificate,
            };
            if !state.add_user(record.clone()) {
                // lost a creation race for this id; the signature was checked
                // against the losing certificate, so reject outright
                warn!(user = %user_id, "concurrent registration for the same user id");
                write_frame(stream, &Response::AuthResult { code: ResultCode::Error }).await?;
                return Ok(None);
            }

            info!(user = %user_id, "new user registered");
            write_frame(stream, &Response::AuthResult { code: ResultCode::Ok }).await?;
            Ok(Some(record))
        }
        (Request::ProveExistingUser { signature }, Some(record)) => {
            if record.certificate.verify_nonce(nonce, &signature).is_err() {
                warn!(user = %user_id, "signature rejected");
                write_frame(stream, &Response::AuthResult { code: ResultCode::Error }).await?;
                return Ok(None);
            }
            write_frame(stream, &Response::AuthResult { code: ResultCode::Ok }).await?;
            Ok(Some(record))
        }
        _ => {
            write_frame(stream, &Response::AuthResult { code: ResultCode::Error }).await?;
            Err(ProtocolError::Unexpected {
                expected: "identity proof matching the challenge",
            }
            .into())
        }
    }
}

async fn otp_phase<T, S>(
    stream: &mut T,
    otp: &S,
    user_id: &UserId,
) -> Result<OtpOutcome, ServerError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: OtpSender,
{
    let code = crypto::generate_otp();
    otp.deliver(user_id, &code).await;

    let submitted = match read_frame(stream).await? {
        Request::SubmitOtp { code } => code,
        _ => return Err(ProtocolError::Unexpected { expected: "SubmitOtp" }.into()),
    };

    if codes_match(&submitted, &code) {
        write_frame(stream, &Response::AuthResult { code: ResultCode::Ok }).await?;
        return Ok(OtpOutcome::Verified);
    }

    warn!(user = %user_id, "one-time code mismatch");
    write_frame(stream, &Response::AuthResult { code: ResultCode::Error }).await?;

    match read_frame(stream).await? {
        Request::RetryAuth => Ok(OtpOutcome::Retry),
        Request::AbortAuth => {
            info!(user = %user_id, "client gave up after code mismatch");
            Ok(OtpOutcome::Aborted)
        }
        _ => Err(ProtocolError::Unexpected {
            expected: "RetryAuth or AbortAuth",
        }
        .into()),
    }
}

async fn attestation_phase<T>(
    stream: &mut T,
    state: &Arc<SharedState>,
    localinfo: &LocalInfoFile,
    user: UserRecord,
) -> Result<Option<SessionIdentity>, ServerError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let device_id = match read_frame(stream).await? {
        Request::RegisterSession { device_id } => device_id,
        _ => {
            return Err(ProtocolError::Unexpected {
                expected: "RegisterSession",
            }
            .into())
        }
    };

    if validate_component(&device_id).is_err() {
        warn!(device = %device_id, "rejecting unusable device id");
        write_frame(stream, &Response::SessionDenied).await?;
        return Ok(None);
    }

    let addr = DeviceAddr::new(user.user_id.as_str(), device_id);
    let Some(guard) = state.claim_device(addr.clone()) else {
        info!(device = %addr, "device session already active");
        write_frame(stream, &Response::SessionDenied).await?;
        return Ok(None);
    };

    let nonce = crypto::generate_nonce();
    write_frame(stream, &Response::SessionGranted { nonce }).await?;

    // Our own reference copy must verify before its hash means anything.
    let reference = match localinfo.verify() {
        Ok(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reference artifact unreadable");
                return reject_attestation(stream).await;
            }
        },
        Err(e) => {
            warn!(error = %e, "reference-integrity record failed verification");
            return reject_attestation(stream).await;
        }
    };

    let digest = match read_frame(stream).await? {
        Request::AttestExecutable { digest } => digest,
        _ => {
            return Err(ProtocolError::Unexpected {
                expected: "AttestExecutable",
            }
            .into())
        }
    };

    if digest == attestation_digest(nonce, &reference) {
        info!(device = %addr, "session authenticated");
        write_frame(stream, &Response::AttestResult { code: ResultCode::OkTested }).await?;
        Ok(Some(SessionIdentity { user, guard }))
    } else {
        warn!(device = %addr, "executable digest mismatch");
        write_frame(stream, &Response::AttestResult { code: ResultCode::NokTested }).await?;
        let _ = read_frame::<_, Request>(stream).await; // final acknowledgment
        Ok(None)
    }
}

/// Integrity failure on our side: report NOK_TESTED without comparing
/// digests, then drain the client's in-flight frames (its digest and the
/// closing acknowledgment) before giving up.
async fn reject_attestation<T>(stream: &mut T) -> Result<Option<SessionIdentity>, ServerError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, &Response::AttestResult { code: ResultCode::NokTested }).await?;
    for _ in 0..2 {
        match read_frame::<_, Request>(stream).await {
            Ok(Request::AttestAck) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    Ok(None)
}
