//! Per-connection lifecycle: authenticate, then serve commands until the
//! client leaves or the transport drops.
//!
//! Commands run strictly sequentially for a connection. Authorization and
//! not-found failures answer with a result code and keep the connection
//! alive; transport failures abort only this connection. The device session
//! slot is released by the guard on every exit path.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use hearth_shared::protocol::{read_frame, write_frame, Request, Response};
use hearth_shared::types::{DeviceAddr, ResultCode, UserId};
use hearth_shared::ProtocolError;
use hearth_store::layout::validate_component;
use hearth_store::LocalInfoFile;

use crate::auth::{authenticate, SessionIdentity};
use crate::error::ServerError;
use crate::otp::OtpSender;
use crate::registry::SharedState;

/// Serve one client connection end to end.
pub async fn handle_connection<T, S>(
    mut stream: T,
    state: Arc<SharedState>,
    otp: Arc<S>,
    localinfo: Arc<LocalInfoFile>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
    S: OtpSender,
{
    let identity = match authenticate(&mut stream, &state, otp.as_ref(), &localinfo).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            debug!("authentication rejected");
            return;
        }
        Err(e) => {
            warn!(error = %e, "authentication aborted");
            return;
        }
    };

    if let Err(e) = command_loop(&mut stream, &state, &identity).await {
        match e {
            ServerError::Protocol(ProtocolError::ConnectionClosed) => {
                debug!(device = %identity.addr(), "client disconnected")
            }
            other => warn!(device = %identity.addr(), error = %other, "connection failed"),
        }
    }
}

async fn command_loop<T>(
    stream: &mut T,
    state: &Arc<SharedState>,
    identity: &SessionIdentity,
) -> Result<(), ServerError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let caller = &identity.user.user_id;
    let addr = identity.addr();

    loop {
        let request: Request = read_frame(stream).await?;
        let response = dispatch(state, caller, addr, request);
        let done = matches!(response, Response::Goodbye);
        write_frame(stream, &response).await?;
        if done {
            info!(device = %addr, "session closed");
            return Ok(());
        }
    }
}

fn dispatch(
    state: &Arc<SharedState>,
    caller: &UserId,
    addr: &DeviceAddr,
    request: Request,
) -> Response {
    match request {
        Request::CreateDomain { domain } => {
            if validate_component(&domain).is_err() {
                warn!(domain = %domain, "rejecting unusable domain name");
                return Response::Ack { code: ResultCode::Nok };
            }
            if state.create_domain(&domain, caller.clone()) {
                info!(domain = %domain, owner = %caller, "domain created");
                Response::Ack { code: ResultCode::Ok }
            } else {
                Response::Ack { code: ResultCode::Nok }
            }
        }

        Request::AddUser {
            user_id,
            domain,
            wrapped_key,
        } => {
            let target = UserId(user_id);
            match state.add_member(caller, &target, &domain, wrapped_key) {
                Ok(()) => {
                    info!(domain = %domain, member = %target, "member added");
                    Response::Ack { code: ResultCode::Ok }
                }
                Err(e) => Response::Ack { code: e.result_code() },
            }
        }

        Request::RegisterDevice { domain } => match state.register_device(caller, addr, &domain) {
            Ok(()) => {
                info!(domain = %domain, device = %addr, "device registered");
                Response::Ack { code: ResultCode::Ok }
            }
            Err(e) => Response::Ack { code: e.result_code() },
        },

        Request::PushTemperatures { entries } => {
            state.store_temperatures(addr, entries);
            Response::Ack { code: ResultCode::Ok }
        }

        Request::PushImages { entries } => {
            state.store_images(addr, entries);
            Response::Ack { code: ResultCode::Ok }
        }

        Request::GetTemperatures { domain } => match state.temperatures(caller, &domain) {
            Ok((wrapped_key, readings)) => Response::Temperatures {
                wrapped_key,
                readings,
            },
            Err(e) => Response::Ack { code: e.result_code() },
        },

        Request::GetImage { user_id, device_id } => {
            let target = DeviceAddr::new(user_id, device_id);
            match state.image(caller, &target) {
                Ok((wrapped_key, ciphertext, params)) => Response::ImageData {
                    wrapped_key,
                    ciphertext,
                    params,
                },
                Err(e) => Response::Ack { code: e.result_code() },
            }
        }

        Request::GetMyDomains => {
            let entries = state.caller_domains(addr);
            if entries.is_empty() {
                Response::Ack { code: ResultCode::NoData }
            } else {
                Response::Domains { entries }
            }
        }

        Request::GetCertificate { user_id } => match state.certificate(&UserId(user_id)) {
            Ok(certificate) => Response::CertificateFor { certificate },
            Err(e) => Response::Ack { code: e.result_code() },
        },

        Request::Bye => Response::Goodbye,

        // handshake-phase messages have no business here
        other => {
            warn!(device = %addr, request = ?other, "unexpected message in command phase");
            Response::Ack { code: ResultCode::Error }
        }
    }
}
