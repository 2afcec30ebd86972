use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::forge::{ ArpReply, Transmitter };
use crate::poison::PoisonLoop;
use crate::session::SpoofSession;
use crate::{ ArpErrors, ArpResult };

/// Undoes the poisoning on the way out. Best effort: a restorer never fails the
/// shutdown, it returns how many corrective replies actually left.
pub trait Restorer {
    fn restore(&self, session: &SpoofSession, tx: &mut dyn Transmitter) -> usize;
}

/// Leaves the caches alone; they heal when the peers' entries expire.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRestorer;

impl Restorer for NoopRestorer {
    fn restore(&self, _session: &SpoofSession, _tx: &mut dyn Transmitter) -> usize {
        0
    }
}

/// Tells each peer the other's true link-layer address, once.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealingRestorer;

impl Restorer for HealingRestorer {

    fn restore(&self, session: &SpoofSession, tx: &mut dyn Transmitter) -> usize {
        info!("Restoring ARP tables...");

        let (target, gateway) = (session.target, session.gateway);
        let corrections = [
            (gateway, target),
            (target, gateway),
        ];

        let mut sent = 0;
        for (owner, told) in corrections.iter() {
            let true_hw = match owner.hw {
                Some(hw) => hw,
                None => {
                    warn!("true link-layer address of {} {} unknown, not restoring it", owner.role, owner.address);
                    continue;
                }
            };
            match tx.transmit(&ArpReply::healing(owner.address, true_hw, told.address)) {
                Ok(()) => sent += 1,
                Err(e) => warn!("restoring {} at {} failed: {}", owner.address, told.address, e),
            }
        }
        sent
    }
}

/// SIGINT and SIGTERM, registered as soon as this is built so nothing slips
/// through before the loop starts waiting on it.
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {

    #[cfg(unix)]
    pub fn install() -> ArpResult<ShutdownSignals> {
        use tokio::signal::unix::{ signal, SignalKind };
        Ok(ShutdownSignals {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> ArpResult<ShutdownSignals> {
        Ok(ShutdownSignals {})
    }

    #[cfg(unix)]
    pub async fn wait(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => debug!("SIGINT received"),
            _ = self.terminate.recv() => debug!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    pub async fn wait(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Runs the blocking `establish` off the runtime so a signal during interface and
/// peer resolution still ends the run cleanly. `Ok(None)` means `shutdown` won.
pub async fn establish_until<E, F>(establish: E, shutdown: F) -> ArpResult<Option<SpoofSession>>
where
    E: FnOnce() -> ArpResult<SpoofSession> + Send + 'static,
    F: Future<Output = ()>,
{
    let resolving = tokio::task::spawn_blocking(establish);

    tokio::select! {
        joined = resolving => match joined {
            Ok(res) => res.map(Some),
            Err(e) => Err(ArpErrors::Resolution(format!("resolver task failed: {}", e))),
        },
        _ = shutdown => {
            info!("Stopping...");
            Ok(None)
        }
    }
}

/// Runs the poison loop until `shutdown` resolves, then hands the transmitter to
/// `restorer`. A transmission error ends the session without restoring.
pub async fn run_session<T, F>(session: &SpoofSession, interval: Duration, mut tx: T, restorer: &dyn Restorer, shutdown: F) -> ArpResult<u64>
where
    T: Transmitter,
    F: Future<Output = ()>,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let poison = PoisonLoop::new(session, interval);

    let rounds = {
        let looping = poison.run(&mut tx, stop_rx);
        tokio::pin!(looping);

        tokio::select! {
            res = &mut looping => res?,
            _ = shutdown => {
                info!("Stopping...");
                // receiver only goes away once the loop is done
                let _ = stop_tx.send(true);
                looping.await?
            }
        }
    };

    debug!("{} rounds sent", rounds);
    restorer.restore(session, &mut tx);
    Ok(rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use pnet::datalink::MacAddr;
    use tokio::time;
    use crate::poison::tests::Recorder;
    use crate::session::tests::test_session;

    struct Refuse;

    impl Transmitter for Refuse {
        fn transmit(&mut self, _reply: &ArpReply) -> ArpResult<()> {
            Err(ArpErrors::Transmission("eth0: No such device".to_string()))
        }
    }

    #[test]
    fn test_noop_restorer_sends_nothing() {
        let recorder = Recorder::default();
        let mut tx = recorder.clone();
        assert_eq!(NoopRestorer.restore(&test_session(), &mut tx), 0);
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn test_healing_restorer_reasserts_true_mappings() {
        let session = test_session();
        let recorder = Recorder::default();
        let mut tx = recorder.clone();

        assert_eq!(HealingRestorer.restore(&session, &mut tx), 2);

        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![
            ArpReply::healing(Ipv4Addr::new(192, 168, 1, 1), MacAddr::new(0x02, 0, 0, 0, 0, 0xfe), Ipv4Addr::new(192, 168, 1, 10)),
            ArpReply::healing(Ipv4Addr::new(192, 168, 1, 10), MacAddr::new(0x02, 0, 0, 0, 0, 0x10), Ipv4Addr::new(192, 168, 1, 1)),
        ]);
    }

    #[test]
    fn test_healing_restorer_swallows_failures() {
        assert_eq!(HealingRestorer.restore(&test_session(), &mut Refuse), 0);
    }

    #[test]
    fn test_healing_restorer_skips_unknown_hw() {
        let mut session = test_session();
        session.gateway.hw = None;
        let recorder = Recorder::default();
        let mut tx = recorder.clone();

        assert_eq!(HealingRestorer.restore(&session, &mut tx), 1);
        assert_eq!(recorder.sent.lock().unwrap()[0].destination, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop_and_restores() {
        let session = test_session();
        let recorder = Recorder::default();

        let rounds = run_session(&session, Duration::from_secs(2), recorder.clone(), &HealingRestorer,
            time::sleep(Duration::from_millis(5000))).await.unwrap();

        assert_eq!(rounds, 3);
        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3 * 2 + 2);
        assert!(sent[..6].iter().all(|r| r.owner_hw.is_none()));
        assert!(sent[6..].iter().all(|r| r.owner_hw.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_restorer_leaves_only_forged_traffic() {
        let recorder = Recorder::default();

        let rounds = run_session(&test_session(), Duration::from_secs(2), recorder.clone(), &NoopRestorer,
            time::sleep(Duration::from_millis(1000))).await.unwrap();

        assert_eq!(rounds, 1);
        assert_eq!(recorder.count(), 2);
    }

    #[tokio::test]
    async fn test_transmission_error_skips_restoration() {
        let err = run_session(&test_session(), Duration::from_secs(2), Refuse, &HealingRestorer,
            std::future::pending::<()>()).await.unwrap_err();

        assert!(matches!(err, ArpErrors::Transmission(_)));
        assert!(err.to_string().contains("No such device"));
    }

    #[tokio::test]
    async fn test_shutdown_during_resolution_is_clean() {
        let res = establish_until(|| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(test_session())
        }, std::future::ready(())).await;

        assert!(matches!(res, Ok(None)));
    }

    #[tokio::test]
    async fn test_resolved_session_is_handed_back() {
        let session = establish_until(|| Ok(test_session()), std::future::pending::<()>()).await
            .unwrap()
            .unwrap();

        assert_eq!(session.target.address, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(session.gateway.address, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[tokio::test]
    async fn test_resolution_error_is_fatal() {
        let res = establish_until(|| Err(ArpErrors::Resolution("no reply from 10.254.254.1".to_string())),
            std::future::pending::<()>()).await;

        assert!(matches!(res, Err(ArpErrors::Resolution(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_during_resolution_is_clean() {
        let mut signals = ShutdownSignals::install().unwrap();

        let res = establish_until(|| {
            let status = std::process::Command::new("kill")
                .arg("-TERM")
                .arg(std::process::id().to_string())
                .status();
            assert!(matches!(status, Ok(s) if s.success()));
            std::thread::sleep(Duration::from_millis(500));
            Ok(test_session())
        }, signals.wait());

        assert!(matches!(time::timeout(Duration::from_secs(5), res).await, Ok(Ok(None))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_resolves_shutdown() {
        let mut signals = ShutdownSignals::install().unwrap();

        let status = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        time::timeout(Duration::from_secs(5), signals.wait()).await
            .expect("SIGTERM was not delivered");
    }
}
