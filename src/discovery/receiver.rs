//! Reads datagrams off the rendezvous socket and forwards parsed envelopes
//! to the guardian. Mirrors the original `receiver` actor's role, minus the
//! DNS wire parsing it no longer needs.

use acto::ActoRef;

use super::guardian::GuardianMsg;
use super::socket::MulticastSocket;
use super::Envelope;

pub async fn receive_loop(socket: MulticastSocket, guardian: ActoRef<GuardianMsg>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match socket.recv(&mut buf).await {
            Ok((n, _from)) => match serde_json::from_slice::<Envelope>(&buf[..n]) {
                Ok(envelope) => guardian.send(GuardianMsg::Inbound(envelope)),
                Err(e) => tracing::debug!(error = %e, "malformed discovery packet"),
            },
            Err(e) => {
                tracing::warn!(error = %e, "discovery socket recv failed, receiver exiting");
                break;
            }
        }
    }
}
