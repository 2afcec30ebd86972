#[macro_use] extern crate log;

pub mod config;
pub mod session;
pub mod neighbor;
pub mod forge;
pub mod poison;
pub mod lifecycle;

pub use config::SpoofConfig;
pub use session::{ Role, Target, SpoofSession };
pub use forge::{ ArpReply, Transmitter, DatalinkTransmitter };
pub use poison::PoisonLoop;
pub use lifecycle::{ Restorer, NoopRestorer, HealingRestorer, ShutdownSignals, establish_until, run_session };

pub type ArpResult<T> = std::result::Result<T, ArpErrors>;

#[derive(Debug, thiserror::Error)]
pub enum ArpErrors{

    #[error("{0}")]
    Usage(String),

    #[error("ResolutionError: {0}")]
    Resolution(String),

    #[error("TransmissionError: {0}")]
    Transmission(String),

    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

}
