use std::net::Ipv4Addr;
use std::time::Duration;

use crate::{ ArpErrors, ArpResult };

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Everything the operator can tell us on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct SpoofConfig {
    pub target:    Ipv4Addr,
    pub gateway:   Ipv4Addr,
    pub interface: Option<String>,
    pub interval:  Duration,
    pub restore:   bool,
}

impl SpoofConfig {

    /// Parses `<TARGET> <GATEWAY> [INTERFACE]` plus the optional `--interval <secs>`
    /// and `--restore` flags. `args` must not contain the program name.
    pub fn from_args<I, S>(args: I) -> ArpResult<SpoofConfig>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut positional: Vec<String> = Vec::new();
        let mut interval = DEFAULT_INTERVAL;
        let mut restore = false;

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_ref() {
                "--restore" => restore = true,
                "--interval" => {
                    let raw = iter.next()
                        .ok_or_else(|| ArpErrors::Usage("--interval requires a value in seconds".to_string()))?;
                    interval = parse_interval(raw.as_ref())?;
                },
                other => positional.push(other.to_string()),
            }
        }

        if positional.len() < 2 {
            return Err(ArpErrors::Usage(format!("expected 2 addresses, got {}", positional.len())));
        }
        if positional.len() > 3 {
            return Err(ArpErrors::Usage(format!("unexpected argument '{}'", positional[3])));
        }

        let target  = parse_address(&positional[0])?;
        let gateway = parse_address(&positional[1])?;
        let interface = positional.get(2).cloned();

        Ok(SpoofConfig{ target, gateway, interface, interval, restore })
    }
}

fn parse_address(raw: &str) -> ArpResult<Ipv4Addr> {
    raw.parse::<Ipv4Addr>()
        .map_err(|_| ArpErrors::Usage(format!("'{}' is not a valid IPv4 address", raw)))
}

fn parse_interval(raw: &str) -> ArpResult<Duration> {
    let usage = || ArpErrors::Usage(format!("'{}' is not a positive number of seconds", raw));

    let secs = raw.parse::<f64>().map_err(|_| usage())?;
    match Duration::try_from_secs_f64(secs) {
        // anything that rounds down to zero would never wait between rounds
        Ok(interval) if !interval.is_zero() => Ok(interval),
        _ => Err(usage()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_addresses_and_interface() {
        let cfg = SpoofConfig::from_args(["192.168.1.10", "192.168.1.1", "eth0"]).unwrap();

        assert_eq!(cfg.target, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(cfg.gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(cfg.interface.as_deref(), Some("eth0"));
        assert_eq!(cfg.interval, DEFAULT_INTERVAL);
        assert!(!cfg.restore);
    }

    #[test]
    fn test_interface_is_optional() {
        let cfg = SpoofConfig::from_args(["10.0.0.5", "10.0.0.1"]).unwrap();
        assert_eq!(cfg.interface, None);
    }

    #[test]
    fn test_too_few_addresses_is_usage_error() {
        let none: [&str; 0] = [];
        assert!(matches!(SpoofConfig::from_args(none), Err(ArpErrors::Usage(_))));
        assert!(matches!(SpoofConfig::from_args(["10.0.0.5"]), Err(ArpErrors::Usage(_))));
        assert!(matches!(SpoofConfig::from_args(["10.0.0.5", "--restore"]), Err(ArpErrors::Usage(_))));
    }

    #[test]
    fn test_bad_address_is_usage_error() {
        let err = SpoofConfig::from_args(["10.0.0.300", "10.0.0.1"]).unwrap_err();
        assert!(matches!(err, ArpErrors::Usage(_)));
        assert!(err.to_string().contains("10.0.0.300"));
    }

    #[test]
    fn test_flags() {
        let cfg = SpoofConfig::from_args(["--restore", "10.0.0.5", "--interval", "0.5", "10.0.0.1"]).unwrap();
        assert!(cfg.restore);
        assert_eq!(cfg.interval, Duration::from_millis(500));
        assert_eq!(cfg.interface, None);
    }

    #[test]
    fn test_bad_interval() {
        assert!(SpoofConfig::from_args(["10.0.0.5", "10.0.0.1", "--interval", "0"]).is_err());
        assert!(SpoofConfig::from_args(["10.0.0.5", "10.0.0.1", "--interval", "soon"]).is_err());
        assert!(SpoofConfig::from_args(["10.0.0.5", "10.0.0.1", "--interval"]).is_err());
    }

    #[test]
    fn test_out_of_range_interval_is_usage_error() {
        for raw in ["1e30", "inf", "NaN", "-2", "1e-12"] {
            let res = SpoofConfig::from_args(["10.0.0.5", "10.0.0.1", "--interval", raw]);
            assert!(matches!(res, Err(ArpErrors::Usage(_))), "--interval {} accepted", raw);
        }
    }

    #[test]
    fn test_extra_positional_rejected() {
        assert!(SpoofConfig::from_args(["10.0.0.5", "10.0.0.1", "eth0", "eth1"]).is_err());
    }
}
